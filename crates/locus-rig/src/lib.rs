#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Localizes a set of rigidly mounted cameras with known sub-poses as one
//! unit. Two strategies are provided: a naive one that resects every camera
//! independently and fuses the per-camera poses, and a generalized
//! (non-central camera) consensus that scores candidate rig poses by
//! angular bearing error across all cameras simultaneously, since pixel
//! reprojection errors are not comparable between cameras with different
//! intrinsics.

/// Generalized (non-central) rig resection.
pub mod generalized;

/// Independent per-camera localization with pose fusion.
pub mod naive;

/// Shared rig data types.
pub mod types;

mod refine;

pub use generalized::localize_rig_generalized;
pub use naive::localize_rig_naive;
pub use types::{RigCameraObservations, RigCameraResult, RigError, RigResectionParams, RigResult};
