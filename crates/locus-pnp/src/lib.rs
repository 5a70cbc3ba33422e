#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Given 2D-3D correspondences and a calibrated camera model, this crate
//! estimates the camera pose while rejecting outlier associations. The
//! minimal solver is EPnP; around it sits a consensus loop that is either a
//! classical fixed-threshold RANSAC or an a-contrario variant that estimates
//! the inlier threshold from the residual distribution itself. The winning
//! consensus set is polished by Levenberg-Marquardt, optionally refining the
//! camera intrinsics jointly with the pose.
//!
//! ## Example
//!
//! ```rust
//! use locus_map::{CameraModel, PinholeIntrinsics};
//! use locus_pnp::{estimate_pose_robust, ResectionParams};
//!
//! let camera = CameraModel::pinhole(
//!     PinholeIntrinsics::new(800.0, 800.0, 400.0, 300.0),
//!     800,
//!     600,
//! )?;
//!
//! // six landmarks in front of the camera, observed at their projections
//! let world = vec![
//!     [0.0, 0.0, 5.0],
//!     [1.0, 0.0, 5.0],
//!     [0.0, 1.0, 5.0],
//!     [-1.0, 0.5, 4.0],
//!     [0.5, -1.0, 6.0],
//!     [0.3, 0.8, 4.5],
//! ];
//! let pixels: Vec<[f64; 2]> = world
//!     .iter()
//!     .map(|p| [800.0 * p[0] / p[2] + 400.0, 800.0 * p[1] / p[2] + 300.0])
//!     .collect();
//!
//! let params = ResectionParams {
//!     random_seed: Some(7),
//!     ..Default::default()
//! };
//! let result = estimate_pose_robust(&world, &pixels, &camera, &params, None)?;
//! assert_eq!(result.inliers.len(), 6);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Efficient Perspective-n-Point (EPnP) solver.
pub mod epnp;

/// A-contrario inlier threshold selection for the adaptive estimator.
pub mod adaptive;

/// Robust consensus loop around the minimal solver.
pub mod ransac;

/// Levenberg-Marquardt refinement of pose and intrinsics.
pub mod refine;

/// Common data types shared across the resection pipeline.
pub mod types;

mod ops;

pub use epnp::{solve_epnp, EpnpParams};
pub use ransac::{estimate_pose_robust, ResectionParams, ResectionResult, RobustEstimatorKind};
pub use refine::{refine_pose, RefineParams, Refinement};
pub use types::{PnPError, PnPSolution};
