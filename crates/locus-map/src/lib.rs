#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Data model consumed by the localization engine: calibrated camera models,
//! landmark descriptors and the immutable [`Map`] accessor over a
//! previously reconstructed scene. The map is validated once at
//! construction and never mutated afterwards, so concurrent localization
//! calls can share one instance without locking.

/// Pinhole camera models with radial distortion.
pub mod camera;

/// Feature descriptors attached to landmarks and query keypoints.
pub mod descriptor;

/// The read-only reconstructed scene accessor.
pub mod map;

pub use camera::{CameraError, CameraModel, PinholeIntrinsics, RadialDistortion};
pub use descriptor::{Descriptor, DescriptorKind};
pub use map::{IntrinsicId, Landmark, LandmarkId, Map, MapError, View, ViewId};
