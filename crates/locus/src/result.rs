use locus_geometry::Pose;
use locus_map::CameraModel;
use locus_match::Correspondence;

/// Outcome of one single-camera localization attempt.
///
/// Created fresh per call and never mutated afterwards. When `valid` is
/// false the remaining fields are placeholders and must not feed any
/// pose-dependent computation.
#[derive(Debug, Clone)]
pub struct LocalizationResult {
    /// Whether the attempt produced a usable pose.
    pub valid: bool,
    /// Estimated world-to-camera pose.
    pub pose: Pose,
    /// Inlier 2D-3D associations supporting the pose.
    pub inliers: Vec<Correspondence>,
    /// Final intrinsics, refined when intrinsic refinement ran.
    pub camera: Option<CameraModel>,
    /// Root-mean-square reprojection error over the inliers in pixels,
    /// when the pipeline computed one.
    pub reproj_rmse: Option<f64>,
}

impl LocalizationResult {
    /// Result of a failed attempt; carries no usable pose.
    pub fn invalid() -> Self {
        Self {
            valid: false,
            pose: Pose::IDENTITY,
            inliers: Vec::new(),
            camera: None,
            reproj_rmse: None,
        }
    }

    /// Number of inlier associations.
    pub fn inlier_count(&self) -> usize {
        self.inliers.len()
    }
}

/// Outcome of one rig localization attempt.
#[derive(Debug, Clone)]
pub struct RigLocalizationResult {
    /// Whether the attempt produced a usable rig pose.
    pub valid: bool,
    /// Estimated world-to-rig transform.
    pub pose: Pose,
    /// Per-camera results, aligned with the input cameras; cameras
    /// excluded from the solution carry an invalid entry.
    pub cameras: Vec<LocalizationResult>,
    /// Number of cameras that contributed to the rig pose, so callers can
    /// judge confidence after partial failures.
    pub contributing_cameras: usize,
}

impl RigLocalizationResult {
    /// Result of a failed attempt over `camera_count` cameras.
    pub fn invalid(camera_count: usize) -> Self {
        Self {
            valid: false,
            pose: Pose::IDENTITY,
            cameras: (0..camera_count)
                .map(|_| LocalizationResult::invalid())
                .collect(),
            contributing_cameras: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_result_is_empty() {
        let r = LocalizationResult::invalid();
        assert!(!r.valid);
        assert_eq!(r.inlier_count(), 0);
        assert!(r.camera.is_none());
    }

    #[test]
    fn test_invalid_rig_result_covers_all_cameras() {
        let r = RigLocalizationResult::invalid(3);
        assert!(!r.valid);
        assert_eq!(r.cameras.len(), 3);
        assert_eq!(r.contributing_cameras, 0);
    }
}
