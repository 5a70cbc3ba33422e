use std::path::PathBuf;

use locus_pnp::RobustEstimatorKind;

/// Feature-extraction preset forwarded to the external describer.
///
/// Higher presets extract more features and cost more time; the mapping to
/// concrete detector settings is owned by the describer implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DescriberPreset {
    /// Fastest, fewest features.
    Low,
    /// Reduced feature count.
    Medium,
    /// Balanced default of most describers.
    Normal,
    /// Dense extraction.
    High,
    /// Densest extraction, used for offline localization.
    #[default]
    Ultra,
}

/// Tuning knobs of a localization call.
///
/// Immutable once constructed; every localization entry point takes it by
/// reference and no call mutates it. All fields have documented defaults.
#[derive(Debug, Clone)]
pub struct LocalizerParameters {
    /// Directory for visual debug dumps; `None` disables them (default).
    pub visual_debug: Option<PathBuf>,
    /// Refine the query intrinsics jointly with the pose (default false).
    pub refine_intrinsics: bool,
    /// Distance ratio of the descriptor ratio test (default 0.8).
    pub dist_ratio: f64,
    /// Feature-extraction preset for raw query images (default `Ultra`).
    pub feature_preset: DescriberPreset,
    /// Maximum reprojection error accepted for resection in pixels
    /// (default unbounded; the adaptive estimator needs no cap).
    pub error_max: f64,
    /// Robust estimator used for resection (default a-contrario RANSAC).
    pub resection_estimator: RobustEstimatorKind,
    /// Robust estimator used for geometric match verification in
    /// localizers that perform one (default a-contrario RANSAC).
    pub matching_estimator: RobustEstimatorKind,
    /// Force the naive per-camera rig strategy instead of the generalized
    /// (non-central camera) solver (default false).
    pub use_naive_rig: bool,
    /// Maximum angular error in radians for the generalized rig resection
    /// (default 0.1 degree, about 0.0017 rad).
    pub angular_threshold: f64,
}

impl Default for LocalizerParameters {
    fn default() -> Self {
        Self {
            visual_debug: None,
            refine_intrinsics: false,
            dist_ratio: 0.8,
            feature_preset: DescriberPreset::default(),
            error_max: f64::INFINITY,
            resection_estimator: RobustEstimatorKind::AcRansac,
            matching_estimator: RobustEstimatorKind::AcRansac,
            use_naive_rig: false,
            angular_threshold: 0.1_f64.to_radians(),
        }
    }
}
