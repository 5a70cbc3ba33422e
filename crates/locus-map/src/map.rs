use std::collections::BTreeMap;

use locus_geometry::Pose;
use thiserror::Error;

use crate::camera::CameraModel;
use crate::descriptor::Descriptor;

/// Identifier of a reconstructed view.
pub type ViewId = u32;

/// Identifier of a calibrated intrinsic group.
pub type IntrinsicId = u32;

/// Identifier of a triangulated landmark.
pub type LandmarkId = u64;

/// Errors raised while assembling a [`Map`].
#[derive(Debug, Error)]
pub enum MapError {
    /// A landmark observation references a view that does not exist.
    #[error("landmark {landmark} observes unknown view {view}")]
    UnknownObservedView {
        /// Offending landmark
        landmark: LandmarkId,
        /// Referenced view id
        view: ViewId,
    },

    /// A posed view references an intrinsic group that does not exist.
    #[error("view {view} references unknown intrinsic {intrinsic}")]
    UnknownIntrinsic {
        /// Offending view
        view: ViewId,
        /// Referenced intrinsic id
        intrinsic: IntrinsicId,
    },

    /// A pose entry references a view that does not exist.
    #[error("pose entry references unknown view {view}")]
    UnknownPosedView {
        /// Referenced view id
        view: ViewId,
    },
}

/// Metadata of one reconstructed view (image) of the scene.
#[derive(Debug, Clone)]
pub struct View {
    /// View identifier
    pub view_id: ViewId,
    /// Intrinsic group this view was captured with
    pub intrinsic_id: IntrinsicId,
    /// Source image name, informational only
    pub image_name: String,
}

/// A triangulated 3D point with its descriptor and visibility list.
#[derive(Debug, Clone)]
pub struct Landmark {
    /// Position in the world frame
    pub position: [f64; 3],
    /// Descriptor associated with this landmark
    pub descriptor: Descriptor,
    /// Views in which the landmark was observed
    pub observations: Vec<ViewId>,
}

/// Read-only accessor over a reconstructed scene.
///
/// Construction validates the referential invariants once; afterwards the
/// map is immutable and safe to share across concurrent localization calls.
#[derive(Debug, Clone)]
pub struct Map {
    views: BTreeMap<ViewId, View>,
    intrinsics: BTreeMap<IntrinsicId, CameraModel>,
    poses: BTreeMap<ViewId, Pose>,
    landmarks: BTreeMap<LandmarkId, Landmark>,
}

impl Map {
    /// Assemble a map, checking that landmark observations reference known
    /// views and that every posed view references a known intrinsic group.
    pub fn new(
        views: BTreeMap<ViewId, View>,
        intrinsics: BTreeMap<IntrinsicId, CameraModel>,
        poses: BTreeMap<ViewId, Pose>,
        landmarks: BTreeMap<LandmarkId, Landmark>,
    ) -> Result<Self, MapError> {
        for (&view_id, _) in poses.iter() {
            let view = views
                .get(&view_id)
                .ok_or(MapError::UnknownPosedView { view: view_id })?;
            if !intrinsics.contains_key(&view.intrinsic_id) {
                return Err(MapError::UnknownIntrinsic {
                    view: view_id,
                    intrinsic: view.intrinsic_id,
                });
            }
        }
        for (&landmark_id, landmark) in landmarks.iter() {
            for &view_id in &landmark.observations {
                if !views.contains_key(&view_id) {
                    return Err(MapError::UnknownObservedView {
                        landmark: landmark_id,
                        view: view_id,
                    });
                }
            }
        }
        Ok(Self {
            views,
            intrinsics,
            poses,
            landmarks,
        })
    }

    /// Number of landmarks in the map.
    pub fn landmark_count(&self) -> usize {
        self.landmarks.len()
    }

    /// Number of views in the map.
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Look up one view.
    pub fn view(&self, id: ViewId) -> Option<&View> {
        self.views.get(&id)
    }

    /// Look up the camera model of one intrinsic group.
    pub fn intrinsic(&self, id: IntrinsicId) -> Option<&CameraModel> {
        self.intrinsics.get(&id)
    }

    /// Look up the pose of one view, if it was reconstructed.
    pub fn pose(&self, id: ViewId) -> Option<&Pose> {
        self.poses.get(&id)
    }

    /// Look up one landmark.
    pub fn landmark(&self, id: LandmarkId) -> Option<&Landmark> {
        self.landmarks.get(&id)
    }

    /// Iterate landmarks in ascending id order.
    pub fn landmarks(&self) -> impl Iterator<Item = (LandmarkId, &Landmark)> {
        self.landmarks.iter().map(|(&id, lm)| (id, lm))
    }

    /// Iterate views in ascending id order.
    pub fn views(&self) -> impl Iterator<Item = (ViewId, &View)> {
        self.views.iter().map(|(&id, v)| (id, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PinholeIntrinsics;

    fn one_view(views: &mut BTreeMap<ViewId, View>, view_id: ViewId, intrinsic_id: IntrinsicId) {
        views.insert(
            view_id,
            View {
                view_id,
                intrinsic_id,
                image_name: format!("img_{view_id}.jpg"),
            },
        );
    }

    fn one_camera() -> CameraModel {
        CameraModel::pinhole(PinholeIntrinsics::new(800.0, 800.0, 400.0, 300.0), 800, 600)
            .unwrap()
    }

    #[test]
    fn test_valid_map() {
        let mut views = BTreeMap::new();
        one_view(&mut views, 0, 0);
        let mut intrinsics = BTreeMap::new();
        intrinsics.insert(0, one_camera());
        let mut poses = BTreeMap::new();
        poses.insert(0, Pose::IDENTITY);
        let mut landmarks = BTreeMap::new();
        landmarks.insert(
            7,
            Landmark {
                position: [0.0, 0.0, 5.0],
                descriptor: Descriptor::Float(vec![1.0; 4]),
                observations: vec![0],
            },
        );
        let map = Map::new(views, intrinsics, poses, landmarks).unwrap();
        assert_eq!(map.landmark_count(), 1);
        assert_eq!(map.view_count(), 1);
        assert!(map.pose(0).is_some());
        assert_eq!(map.view(0).unwrap().intrinsic_id, 0);
        assert!(map.intrinsic(0).is_some());
        assert_eq!(map.landmark(7).unwrap().observations, vec![0]);
        assert_eq!(map.landmarks().count(), 1);
        assert_eq!(map.views().next().unwrap().0, 0);
    }

    #[test]
    fn test_rejects_unknown_observed_view() {
        let mut views = BTreeMap::new();
        one_view(&mut views, 0, 0);
        let mut intrinsics = BTreeMap::new();
        intrinsics.insert(0, one_camera());
        let mut landmarks = BTreeMap::new();
        landmarks.insert(
            1,
            Landmark {
                position: [0.0; 3],
                descriptor: Descriptor::Float(vec![0.0; 4]),
                observations: vec![42],
            },
        );
        let err = Map::new(views, intrinsics, BTreeMap::new(), landmarks).unwrap_err();
        assert!(matches!(err, MapError::UnknownObservedView { view: 42, .. }));
    }

    #[test]
    fn test_rejects_pose_with_unknown_intrinsic() {
        let mut views = BTreeMap::new();
        one_view(&mut views, 3, 9);
        let mut poses = BTreeMap::new();
        poses.insert(3, Pose::IDENTITY);
        let err = Map::new(views, BTreeMap::new(), poses, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MapError::UnknownIntrinsic { intrinsic: 9, .. }));
    }

    #[test]
    fn test_rejects_pose_of_unknown_view() {
        let mut poses = BTreeMap::new();
        poses.insert(1, Pose::IDENTITY);
        let err = Map::new(BTreeMap::new(), BTreeMap::new(), poses, BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MapError::UnknownPosedView { view: 1 }));
    }
}
