#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Locus
//!
//! Locus localizes newly captured images against a previously reconstructed
//! 3D map: given the map's landmarks with descriptors and a query image (or
//! a synchronized set of images from a rigid multi-camera rig), it recovers
//! the 6-DoF camera pose through descriptor matching, robust resection and
//! optional joint intrinsic refinement.
//!
//! The top-level crate hosts the localization façade and re-exports the
//! underlying crates:
//!
//! - [`geometry`] - rotations, rigid transforms, bearing metrics
//! - [`map`] - camera models, descriptors and the read-only scene accessor
//! - [`matching`] - ratio-test correspondence search
//! - [`pnp`] - robust single-camera resection
//! - [`rig`] - multi-camera rig fusion
//!
//! ## Example
//!
//! ```no_run
//! use locus::{LocalizerParameters, Localizer, MapLocalizer, NullDescriber};
//! # fn load_map() -> locus::map::Map { unimplemented!() }
//!
//! let map = load_map();
//! let localizer = MapLocalizer::new(map, Box::new(NullDescriber));
//!
//! let params = LocalizerParameters::default();
//! # let features = locus::matching::QueryFeatures::default();
//! let result = localizer.localize_features(&features, (1920, 1080), &params, None);
//! if result.valid {
//!     println!("camera center: {:?}", result.pose.center());
//! }
//! ```

#[doc(inline)]
pub use locus_geometry as geometry;

#[doc(inline)]
pub use locus_map as map;

#[doc(inline)]
pub use locus_match as matching;

#[doc(inline)]
pub use locus_pnp as pnp;

#[doc(inline)]
pub use locus_rig as rig;

/// Localization tuning knobs with their documented defaults.
pub mod config;

/// Query images and the external feature-extraction seam.
pub mod describer;

/// Match visualization dumps for debugging.
mod debug;

/// The localization façade.
pub mod localizer;

/// Localization outcome types.
pub mod result;

pub use config::{DescriberPreset, LocalizerParameters};
pub use describer::{DescribeError, FeatureDescriber, NullDescriber, QueryImage};
pub use localizer::{Localizer, MapLocalizer};
pub use result::{LocalizationResult, RigLocalizationResult};
