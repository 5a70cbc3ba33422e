//! Shared rig data types.

use locus_geometry::Pose;
use locus_map::CameraModel;
use locus_pnp::ResectionParams;
use thiserror::Error;

/// Error types for rig localization.
#[derive(Debug, Error)]
pub enum RigError {
    /// The rig description carries no cameras.
    #[error("rig localization requires at least one camera")]
    NoCameras,

    /// Every camera failed to localize individually.
    #[error("all {total} rig cameras failed to localize")]
    AllCamerasFailed {
        /// Number of cameras attempted
        total: usize,
    },

    /// No camera contributes enough correspondences for a minimal sample.
    #[error("no rig camera carries the {required} correspondences needed for a minimal sample")]
    NoSampleCamera {
        /// Minimal sample size
        required: usize,
    },

    /// The joint consensus stayed below the required inlier count.
    #[error("rig consensus produced only {actual} angular inliers, {required} required")]
    InsufficientInliers {
        /// Minimum consensus size required
        required: usize,
        /// Largest consensus size found
        actual: usize,
    },
}

/// Observations and calibration of one rig camera.
#[derive(Debug, Clone)]
pub struct RigCameraObservations {
    /// Landmark positions in the world frame, one per correspondence.
    pub world: Vec<[f64; 3]>,
    /// Observed pixels, aligned with `world`.
    pub pixels: Vec<[f64; 2]>,
    /// Calibrated model of this camera.
    pub camera: CameraModel,
    /// Fixed transform from the rig reference frame to this camera's
    /// frame; never estimated.
    pub sub_pose: Pose,
}

/// Parameters of a rig localization.
#[derive(Debug, Clone)]
pub struct RigResectionParams {
    /// Maximum bearing angle in radians for a correspondence to count as
    /// an inlier of the generalized resection.
    pub angular_threshold: f64,
    /// Hard ceiling on consensus iterations.
    pub max_iterations: usize,
    /// Desired probability of drawing one outlier-free minimal sample.
    pub confidence: f64,
    /// Minimum joint consensus size below which the rig localization
    /// fails.
    pub min_inliers: usize,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Per-camera resection settings used by the naive strategy.
    pub resection: ResectionParams,
}

impl Default for RigResectionParams {
    fn default() -> Self {
        Self {
            // 0.1 degree
            angular_threshold: 0.1_f64.to_radians(),
            max_iterations: 1024,
            confidence: 0.99,
            min_inliers: locus_pnp::ransac::MINIMAL_SAMPLE_SIZE,
            random_seed: None,
            resection: ResectionParams::default(),
        }
    }
}

/// Per-camera outcome inside a successful rig localization.
#[derive(Debug, Clone)]
pub struct RigCameraResult {
    /// World-to-camera pose implied by the rig pose and the sub-pose.
    pub pose: Pose,
    /// Indices of this camera's inlier correspondences.
    pub inliers: Vec<usize>,
}

/// Result of a rig localization.
#[derive(Debug, Clone)]
pub struct RigResult {
    /// Estimated world-to-rig transform.
    pub pose: Pose,
    /// Per-camera outcomes; `None` for cameras excluded from the solution.
    pub per_camera: Vec<Option<RigCameraResult>>,
    /// Number of cameras that contributed to the pose, reported so callers
    /// can judge confidence after partial failures.
    pub contributing_cameras: usize,
}
