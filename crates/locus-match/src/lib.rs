#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Produces candidate 2D-3D associations for resection: each query
//! descriptor is matched against the kind-compatible landmark descriptors of
//! the map with the classical two-nearest-neighbour ratio test. Repeated
//! proposals of the same association across matching passes are counted in
//! an [`OccurrenceMap`] and later bias consensus sampling.

/// The ratio-test matcher.
pub mod matcher;

/// Multiplicity bookkeeping for repeated association proposals.
pub mod occurrence;

pub use matcher::{match_features, Correspondence, MatchError, QueryFeatures};
pub use occurrence::{CorrespondenceKey, OccurrenceMap};
