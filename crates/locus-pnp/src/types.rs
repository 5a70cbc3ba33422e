//! Common data types shared across the resection pipeline.

use locus_geometry::Pose;
use thiserror::Error;

/// Error types for pose estimation.
#[derive(Debug, Error)]
pub enum PnPError {
    /// Fewer correspondences than the solver's minimal sample size.
    #[error("resection requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required
        required: usize,
        /// Actual number of correspondences provided
        actual: usize,
    },

    /// Input slices disagree in length.
    #[error("mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedLengths {
        /// Label for the left-hand slice
        left_name: &'static str,
        /// Length of the left-hand slice
        left_len: usize,
        /// Label for the right-hand slice
        right_name: &'static str,
        /// Length of the right-hand slice
        right_len: usize,
    },

    /// No consensus set of sufficient size was found.
    #[error("consensus produced only {actual} inliers, {required} required")]
    InsufficientInliers {
        /// Minimum consensus size required
        required: usize,
        /// Largest consensus size found
        actual: usize,
    },

    /// The correspondence geometry does not constrain a pose.
    #[error("degenerate correspondence configuration: {0}")]
    DegenerateConfiguration(&'static str),

    /// Singular value decomposition failed.
    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    /// The fixed-threshold estimator was selected without a finite error cap.
    #[error("fixed-threshold RANSAC requires a finite maximum reprojection error")]
    ThresholdRequired,
}

/// Pose estimate produced by a single run of a PnP solver.
///
/// The pose maps coordinates from the **world** frame to the **camera**
/// frame.
#[derive(Debug, Clone)]
pub struct PnPSolution {
    /// Estimated world-to-camera pose.
    pub pose: Pose,
    /// Root-mean-square reprojection error in pixels over the input set.
    pub reproj_rmse: f64,
}
