#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Minimal geometric toolbox shared by the localization crates: the SO(3)
//! rotation group, rigid world-to-frame transforms and the bearing-angle
//! metric used by generalized (multi-camera) resection.

/// Angular metrics on bearing vectors.
pub mod metrics;

/// Rigid transforms mapping points between frames.
pub mod pose;

/// Special Orthogonal group SO(3) for 3D rotations.
pub mod so3;

pub use metrics::bearing_angle;
pub use pose::Pose;
pub use so3::So3;
