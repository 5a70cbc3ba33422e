use std::collections::HashMap;

use locus_map::LandmarkId;

use crate::matcher::Correspondence;

/// Value key identifying one 3D-2D association.
///
/// Keyed by landmark id and query feature index rather than by reference, so
/// the same association proposed by independent matching passes collapses
/// onto one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrespondenceKey {
    /// Landmark side of the association.
    pub landmark: LandmarkId,
    /// Query feature side of the association.
    pub feature: usize,
}

impl From<&Correspondence> for CorrespondenceKey {
    fn from(c: &Correspondence) -> Self {
        Self {
            landmark: c.landmark,
            feature: c.feature,
        }
    }
}

/// Counts how many independent matching passes proposed each association.
///
/// The multiplicities are later used as sampling weights in the consensus
/// loop, biasing minimal samples towards frequently proposed pairs.
#[derive(Debug, Clone, Default)]
pub struct OccurrenceMap {
    counts: HashMap<CorrespondenceKey, usize>,
}

impl OccurrenceMap {
    /// Empty occurrence map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one proposal of an association.
    pub fn record(&mut self, key: CorrespondenceKey) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Record every correspondence of one matching pass.
    pub fn record_pass(&mut self, correspondences: &[Correspondence]) {
        for c in correspondences {
            self.record(c.into());
        }
    }

    /// Number of passes that proposed this association.
    pub fn count(&self, key: &CorrespondenceKey) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Number of distinct associations seen so far.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether nothing was recorded yet.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sampling weights for a correspondence set, one per entry.
    ///
    /// Associations never recorded get weight 1 so they remain sampleable.
    pub fn weights(&self, correspondences: &[Correspondence]) -> Vec<f64> {
        correspondences
            .iter()
            .map(|c| self.count(&c.into()).max(1) as f64)
            .collect()
    }
}
