use locus_map::{Descriptor, LandmarkId, Map};
use thiserror::Error;

/// Error types for matching.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Keypoint and descriptor arrays disagree in length.
    #[error("query has {keypoints} keypoints but {descriptors} descriptors")]
    MismatchedQueryLengths {
        /// Number of keypoints
        keypoints: usize,
        /// Number of descriptors
        descriptors: usize,
    },

    /// The ratio threshold is outside the meaningful (0, 1] range.
    #[error("distance ratio must be in (0, 1], got {0}")]
    InvalidRatio(f64),
}

/// Pre-extracted features of one query image.
#[derive(Debug, Clone, Default)]
pub struct QueryFeatures {
    /// Detected keypoint positions in pixels.
    pub keypoints: Vec<[f64; 2]>,
    /// One descriptor per keypoint.
    pub descriptors: Vec<Descriptor>,
}

impl QueryFeatures {
    /// Number of features.
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    /// Whether the query carries no features.
    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// One candidate 2D-3D association between a query keypoint and a landmark.
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondence {
    /// Matched landmark id.
    pub landmark: LandmarkId,
    /// Index of the query feature.
    pub feature: usize,
    /// Landmark position in the world frame.
    pub world: [f64; 3],
    /// Observed keypoint position in pixels.
    pub pixel: [f64; 2],
    /// Descriptor distance of the accepted match.
    pub distance: f64,
}

/// Match query descriptors against the map's landmark descriptors.
///
/// For each query descriptor the two nearest kind-compatible landmark
/// descriptors are found; the nearest is accepted only when it is clearly
/// less ambiguous than the runner-up, i.e. `best < ratio * second_best`.
/// Exact ties between the two nearest candidates are rejected as ambiguous,
/// which also makes the result independent of landmark iteration order. A
/// query descriptor with a single compatible candidate is accepted
/// unconditionally (there is nothing to be ambiguous with).
///
/// Pure function of its inputs: re-running on identical inputs yields an
/// identical correspondence set.
pub fn match_features(
    query: &QueryFeatures,
    map: &Map,
    ratio: f64,
) -> Result<Vec<Correspondence>, MatchError> {
    if query.keypoints.len() != query.descriptors.len() {
        return Err(MatchError::MismatchedQueryLengths {
            keypoints: query.keypoints.len(),
            descriptors: query.descriptors.len(),
        });
    }
    if !(ratio > 0.0 && ratio <= 1.0) {
        return Err(MatchError::InvalidRatio(ratio));
    }

    let mut correspondences = Vec::new();

    for (feature, descriptor) in query.descriptors.iter().enumerate() {
        let Some(nearest) = two_nearest(descriptor, map) else {
            continue;
        };

        let accepted = match nearest.second_distance {
            Some(second) => nearest.distance < ratio * second,
            // single candidate in the map: nothing to disambiguate against
            None => true,
        };
        if !accepted {
            continue;
        }

        correspondences.push(Correspondence {
            landmark: nearest.landmark,
            feature,
            world: nearest.world,
            pixel: query.keypoints[feature],
            distance: nearest.distance,
        });
    }

    log::debug!(
        "matched {}/{} query features against {} landmarks",
        correspondences.len(),
        query.descriptors.len(),
        map.landmark_count()
    );

    Ok(correspondences)
}

struct NearestPair {
    landmark: LandmarkId,
    world: [f64; 3],
    distance: f64,
    second_distance: Option<f64>,
}

fn two_nearest(descriptor: &Descriptor, map: &Map) -> Option<NearestPair> {
    let mut best: Option<NearestPair> = None;

    for (landmark_id, landmark) in map.landmarks() {
        let Some(distance) = descriptor.distance(&landmark.descriptor) else {
            continue;
        };
        match &mut best {
            None => {
                best = Some(NearestPair {
                    landmark: landmark_id,
                    world: landmark.position,
                    distance,
                    second_distance: None,
                });
            }
            Some(pair) => {
                if distance < pair.distance {
                    pair.second_distance = Some(pair.distance);
                    pair.landmark = landmark_id;
                    pair.world = landmark.position;
                    pair.distance = distance;
                } else {
                    match pair.second_distance {
                        Some(second) if distance >= second => {}
                        _ => pair.second_distance = Some(distance),
                    }
                }
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_map::{CameraModel, Landmark, Map, PinholeIntrinsics, View};
    use std::collections::BTreeMap;

    fn map_with_descriptors(descriptors: Vec<Descriptor>) -> Map {
        let mut views = BTreeMap::new();
        views.insert(
            0,
            View {
                view_id: 0,
                intrinsic_id: 0,
                image_name: "seed.jpg".to_string(),
            },
        );
        let mut intrinsics = BTreeMap::new();
        intrinsics.insert(
            0,
            CameraModel::pinhole(PinholeIntrinsics::new(800.0, 800.0, 400.0, 300.0), 800, 600)
                .unwrap(),
        );
        let mut landmarks = BTreeMap::new();
        for (i, descriptor) in descriptors.into_iter().enumerate() {
            landmarks.insert(
                i as u64,
                Landmark {
                    position: [i as f64, 0.0, 5.0],
                    descriptor,
                    observations: vec![0],
                },
            );
        }
        Map::new(views, intrinsics, BTreeMap::new(), landmarks).unwrap()
    }

    fn query(descriptors: Vec<Descriptor>) -> QueryFeatures {
        let keypoints = (0..descriptors.len()).map(|i| [i as f64, 1.0]).collect();
        QueryFeatures {
            keypoints,
            descriptors,
        }
    }

    #[test]
    fn test_unambiguous_match_accepted() {
        let map = map_with_descriptors(vec![
            Descriptor::Float(vec![0.0, 0.0]),
            Descriptor::Float(vec![10.0, 10.0]),
        ]);
        let q = query(vec![Descriptor::Float(vec![0.1, 0.0])]);
        let matches = match_features(&q, &map, 0.8).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].landmark, 0);
        assert_eq!(matches[0].feature, 0);
    }

    #[test]
    fn test_ambiguous_match_rejected() {
        // two landmarks nearly equidistant from the query descriptor
        let map = map_with_descriptors(vec![
            Descriptor::Float(vec![1.0, 0.0]),
            Descriptor::Float(vec![-1.0, 0.0]),
        ]);
        let q = query(vec![Descriptor::Float(vec![0.0, 0.0])]);
        let matches = match_features(&q, &map, 0.8).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_exact_tie_rejected() {
        let map = map_with_descriptors(vec![
            Descriptor::Float(vec![1.0, 0.0]),
            Descriptor::Float(vec![-1.0, 0.0]),
        ]);
        let q = query(vec![Descriptor::Float(vec![0.0, 0.0])]);
        // even a ratio of 1.0 must reject an exact tie
        let matches = match_features(&q, &map, 1.0).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_kind_narrowing() {
        let map = map_with_descriptors(vec![
            Descriptor::Binary(vec![0b1111_0000]),
            Descriptor::Float(vec![0.0, 0.0]),
        ]);
        // binary query may only match the binary landmark
        let q = query(vec![Descriptor::Binary(vec![0b1111_0001])]);
        let matches = match_features(&q, &map, 0.8).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].landmark, 0);
    }

    #[test]
    fn test_idempotent() {
        let map = map_with_descriptors(vec![
            Descriptor::Float(vec![0.0, 0.0]),
            Descriptor::Float(vec![5.0, 5.0]),
            Descriptor::Float(vec![9.0, -3.0]),
        ]);
        let q = query(vec![
            Descriptor::Float(vec![0.2, 0.1]),
            Descriptor::Float(vec![5.2, 4.9]),
        ]);
        let first = match_features(&q, &map, 0.8).unwrap();
        let second = match_features(&q, &map, 0.8).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_ratio() {
        let map = map_with_descriptors(vec![Descriptor::Float(vec![0.0, 0.0])]);
        let q = query(vec![Descriptor::Float(vec![0.0, 0.0])]);
        assert!(match_features(&q, &map, 0.0).is_err());
        assert!(match_features(&q, &map, 1.5).is_err());
    }

    #[test]
    fn test_mismatched_query() {
        let map = map_with_descriptors(vec![Descriptor::Float(vec![0.0, 0.0])]);
        let q = QueryFeatures {
            keypoints: vec![[0.0, 0.0], [1.0, 1.0]],
            descriptors: vec![Descriptor::Float(vec![0.0, 0.0])],
        };
        assert!(matches!(
            match_features(&q, &map, 0.8),
            Err(MatchError::MismatchedQueryLengths { .. })
        ));
    }
}
