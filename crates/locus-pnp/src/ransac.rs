//! Robust consensus loop around the EPnP minimal solver.

use glam::{DMat3, DVec3};
use locus_map::CameraModel;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::adaptive::select_inlier_threshold;
use crate::epnp::{solve_epnp, EpnpParams};
use crate::ops::{project_sq_error, spread_rank};
use crate::refine::{refine_pose, RefineParams};
use crate::types::{PnPError, PnPSolution};

/// Minimal sample size of the calibrated resection solver.
pub const MINIMAL_SAMPLE_SIZE: usize = 4;

/// Family of robust estimator used by the consensus loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RobustEstimatorKind {
    /// Classical RANSAC with a caller-supplied pixel threshold.
    Ransac,
    /// A-contrario RANSAC estimating its own inlier threshold.
    #[default]
    AcRansac,
}

/// Parameters of the robust resection.
#[derive(Debug, Clone)]
pub struct ResectionParams {
    /// Which consensus scheme classifies inliers.
    pub estimator: RobustEstimatorKind,
    /// Hard ceiling on consensus iterations.
    pub max_iterations: usize,
    /// Maximum reprojection error in pixels. The fixed-threshold estimator
    /// requires it finite; the adaptive estimator treats it as an optional
    /// cap on its self-estimated threshold.
    pub error_max: f64,
    /// Desired probability of drawing at least one outlier-free sample.
    pub confidence: f64,
    /// Minimum consensus size below which the estimation fails.
    pub min_inliers: usize,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Refinement of the winning consensus set.
    pub refine: RefineParams,
}

impl Default for ResectionParams {
    fn default() -> Self {
        Self {
            estimator: RobustEstimatorKind::default(),
            max_iterations: 1024,
            error_max: f64::INFINITY,
            confidence: 0.99,
            min_inliers: MINIMAL_SAMPLE_SIZE,
            random_seed: None,
            refine: RefineParams::default(),
        }
    }
}

/// Result of a robust resection.
#[derive(Debug, Clone)]
pub struct ResectionResult {
    /// Estimated world-to-camera pose.
    pub pose: locus_geometry::Pose,
    /// Indices of the inlier correspondences.
    pub inliers: Vec<usize>,
    /// Camera model, refined when intrinsic refinement was requested.
    pub camera: CameraModel,
    /// Root-mean-square reprojection error over the inliers, in pixels.
    pub reproj_rmse: f64,
    /// Inlier threshold in pixels that produced the consensus set.
    pub threshold: f64,
    /// Consensus iterations actually performed.
    pub iterations: usize,
}

struct Candidate {
    solution: PnPSolution,
    inliers: Vec<usize>,
    total_residual: f64,
    threshold: f64,
}

impl Candidate {
    fn beats(&self, other: &Candidate) -> bool {
        match self.inliers.len().cmp(&other.inliers.len()) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.total_residual < other.total_residual,
        }
    }
}

/// Estimate a camera pose from 2D-3D correspondences while rejecting
/// outliers.
///
/// `pixels` are raw (possibly distorted) observations in `camera`'s image;
/// they are undistorted once up front so the solver and the scoring operate
/// on ideal pinhole coordinates. `weights`, when given, bias minimal-sample
/// selection towards frequently proposed correspondences (see the
/// occurrence map of the matching crate).
pub fn estimate_pose_robust(
    world: &[[f64; 3]],
    pixels: &[[f64; 2]],
    camera: &CameraModel,
    params: &ResectionParams,
    weights: Option<&[f64]>,
) -> Result<ResectionResult, PnPError> {
    let n = world.len();
    if n != pixels.len() {
        return Err(PnPError::MismatchedLengths {
            left_name: "world points",
            left_len: world.len(),
            right_name: "image points",
            right_len: pixels.len(),
        });
    }
    if let Some(w) = weights {
        if w.len() != n {
            return Err(PnPError::MismatchedLengths {
                left_name: "world points",
                left_len: n,
                right_name: "sampling weights",
                right_len: w.len(),
            });
        }
    }
    if n < MINIMAL_SAMPLE_SIZE {
        return Err(PnPError::InsufficientCorrespondences {
            required: MINIMAL_SAMPLE_SIZE,
            actual: n,
        });
    }
    if params.estimator == RobustEstimatorKind::Ransac && !params.error_max.is_finite() {
        return Err(PnPError::ThresholdRequired);
    }

    let ideal_pixels = camera.undistort_points(pixels);
    let intrinsics = camera.intrinsics;
    let image_area = (camera.width * camera.height) as f64;
    let epnp_params = EpnpParams::default();

    let mut rng: StdRng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    // With exactly the minimal number of correspondences there is nothing
    // to sample; fit directly and let the residuals tell the story.
    let (candidate, iterations) = if n == MINIMAL_SAMPLE_SIZE {
        (fit_all_points(world, &ideal_pixels, &intrinsics, &epnp_params)?, 0)
    } else {
        consensus_loop(
            world,
            &ideal_pixels,
            &intrinsics,
            image_area,
            &epnp_params,
            params,
            weights,
            &mut rng,
        )?
    };

    let min_required = params.min_inliers.max(MINIMAL_SAMPLE_SIZE);
    if candidate.inliers.len() < min_required {
        return Err(PnPError::InsufficientInliers {
            required: min_required,
            actual: candidate.inliers.len(),
        });
    }

    // A consensus set that cannot constrain a pose must be rejected before
    // refinement rather than silently polished into a wrong answer.
    let inlier_world: Vec<[f64; 3]> = candidate.inliers.iter().map(|&i| world[i]).collect();
    if spread_rank(&inlier_world) < 2 {
        return Err(PnPError::DegenerateConfiguration("collinear consensus set"));
    }

    // Refit on the full consensus set, then polish with LM.
    let inlier_ideal: Vec<[f64; 2]> = candidate.inliers.iter().map(|&i| ideal_pixels[i]).collect();
    let refit = match solve_epnp(&inlier_world, &inlier_ideal, &intrinsics, &epnp_params) {
        Ok(solution) => solution,
        Err(e) => {
            log::debug!("inlier refit failed ({e}), keeping consensus pose");
            candidate.solution.clone()
        }
    };

    let inlier_raw: Vec<[f64; 2]> = candidate.inliers.iter().map(|&i| pixels[i]).collect();
    let refinement = refine_pose(&inlier_world, &inlier_raw, camera, &refit.pose, &params.refine)?;

    log::debug!(
        "resection: {}/{} inliers after {} iterations (threshold {:.3}px, rmse {:.5}px)",
        candidate.inliers.len(),
        n,
        iterations,
        candidate.threshold,
        refinement.rmse
    );

    Ok(ResectionResult {
        pose: refinement.pose,
        inliers: candidate.inliers,
        camera: refinement.camera,
        reproj_rmse: refinement.rmse,
        threshold: candidate.threshold,
        iterations,
    })
}

fn fit_all_points(
    world: &[[f64; 3]],
    ideal_pixels: &[[f64; 2]],
    intrinsics: &locus_map::PinholeIntrinsics,
    epnp_params: &EpnpParams,
) -> Result<Candidate, PnPError> {
    if spread_rank(world) < 2 {
        return Err(PnPError::DegenerateConfiguration("collinear sample"));
    }
    let solution = solve_epnp(world, ideal_pixels, intrinsics, epnp_params)?;
    let rotation = solution.pose.rotation_matrix();
    let translation = solution.pose.translation;
    if !all_depths_positive(&rotation, &translation, world) {
        return Err(PnPError::DegenerateConfiguration("points behind camera"));
    }
    let total_residual = solution.reproj_rmse * solution.reproj_rmse * world.len() as f64;
    Ok(Candidate {
        inliers: (0..world.len()).collect(),
        total_residual,
        threshold: solution.reproj_rmse.max(1e-12),
        solution,
    })
}

#[allow(clippy::too_many_arguments)]
fn consensus_loop(
    world: &[[f64; 3]],
    ideal_pixels: &[[f64; 2]],
    intrinsics: &locus_map::PinholeIntrinsics,
    image_area: f64,
    epnp_params: &EpnpParams,
    params: &ResectionParams,
    weights: Option<&[f64]>,
    rng: &mut StdRng,
) -> Result<(Candidate, usize), PnPError> {
    let n = world.len();
    let mut indices: Vec<usize> = (0..n).collect();
    let mut best: Option<Candidate> = None;
    let mut required_iters = params.max_iterations;
    let mut iter = 0usize;

    while iter < required_iters {
        iter += 1;

        let sample = draw_minimal_sample(&mut indices, weights, rng);
        let sample_world: Vec<[f64; 3]> = sample.iter().map(|&i| world[i]).collect();
        if spread_rank(&sample_world) < 2 {
            continue;
        }
        let sample_pixels: Vec<[f64; 2]> = sample.iter().map(|&i| ideal_pixels[i]).collect();

        let Ok(solution) = solve_epnp(&sample_world, &sample_pixels, intrinsics, epnp_params)
        else {
            continue;
        };
        let rotation = solution.pose.rotation_matrix();
        let translation = solution.pose.translation;
        if !all_depths_positive(&rotation, &translation, &sample_world) {
            continue;
        }

        let candidate = match params.estimator {
            RobustEstimatorKind::Ransac => score_fixed(
                world,
                ideal_pixels,
                &rotation,
                &translation,
                intrinsics,
                params.error_max,
                solution,
            ),
            RobustEstimatorKind::AcRansac => score_adaptive(
                world,
                ideal_pixels,
                &rotation,
                &translation,
                intrinsics,
                image_area,
                params.error_max,
                solution,
            ),
        };
        let Some(candidate) = candidate else {
            continue;
        };

        if best.as_ref().map_or(true, |b| candidate.beats(b)) {
            // shrink the remaining iterations from the current inlier ratio
            let inlier_ratio = candidate.inliers.len() as f64 / n as f64;
            required_iters = required_iters.min(adapt_iterations(
                inlier_ratio,
                params.confidence,
                params.max_iterations,
            ));
            best = Some(candidate);
        }
    }

    let best = best.ok_or(PnPError::InsufficientInliers {
        required: params.min_inliers.max(MINIMAL_SAMPLE_SIZE),
        actual: 0,
    })?;
    Ok((best, iter))
}

/// Draw a minimal sample, uniformly or weighted by occurrence counts.
fn draw_minimal_sample(
    indices: &mut [usize],
    weights: Option<&[f64]>,
    rng: &mut StdRng,
) -> Vec<usize> {
    match weights {
        None => {
            indices.shuffle(rng);
            indices[..MINIMAL_SAMPLE_SIZE].to_vec()
        }
        Some(w) => {
            let mut picked: Vec<usize> = Vec::with_capacity(MINIMAL_SAMPLE_SIZE);
            let total: f64 = w.iter().sum();
            let mut attempts = 0usize;
            while picked.len() < MINIMAL_SAMPLE_SIZE {
                attempts += 1;
                if attempts > 64 * MINIMAL_SAMPLE_SIZE {
                    // weights too concentrated; fall back to uniform for
                    // the remainder of the sample
                    indices.shuffle(rng);
                    for &idx in indices.iter() {
                        if !picked.contains(&idx) {
                            picked.push(idx);
                            if picked.len() == MINIMAL_SAMPLE_SIZE {
                                break;
                            }
                        }
                    }
                    break;
                }
                let mut target = rng.random::<f64>() * total;
                let mut chosen = indices.len() - 1;
                for (i, &wi) in w.iter().enumerate() {
                    if target < wi {
                        chosen = i;
                        break;
                    }
                    target -= wi;
                }
                if !picked.contains(&chosen) {
                    picked.push(chosen);
                }
            }
            picked
        }
    }
}

fn score_fixed(
    world: &[[f64; 3]],
    ideal_pixels: &[[f64; 2]],
    rotation: &DMat3,
    translation: &DVec3,
    intrinsics: &locus_map::PinholeIntrinsics,
    threshold: f64,
    solution: PnPSolution,
) -> Option<Candidate> {
    let threshold_sq = threshold * threshold;
    let mut inliers = Vec::new();
    let mut total_residual = 0.0;
    for (idx, (pw, uv)) in world.iter().zip(ideal_pixels.iter()).enumerate() {
        let Some(err_sq) = project_sq_error(pw, uv, rotation, translation, intrinsics) else {
            continue;
        };
        if err_sq < threshold_sq {
            inliers.push(idx);
            total_residual += err_sq;
        }
    }
    if inliers.is_empty() {
        return None;
    }
    Some(Candidate {
        solution,
        inliers,
        total_residual,
        threshold,
    })
}

#[allow(clippy::too_many_arguments)]
fn score_adaptive(
    world: &[[f64; 3]],
    ideal_pixels: &[[f64; 2]],
    rotation: &DMat3,
    translation: &DVec3,
    intrinsics: &locus_map::PinholeIntrinsics,
    image_area: f64,
    cap: f64,
    solution: PnPSolution,
) -> Option<Candidate> {
    let mut errors: Vec<(f64, usize)> = world
        .iter()
        .zip(ideal_pixels.iter())
        .enumerate()
        .map(|(idx, (pw, uv))| {
            let err = project_sq_error(pw, uv, rotation, translation, intrinsics)
                .map_or(f64::INFINITY, f64::sqrt);
            (err, idx)
        })
        .collect();
    errors.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let sorted: Vec<f64> = errors.iter().map(|(e, _)| *e).collect();
    let selection = select_inlier_threshold(&sorted, MINIMAL_SAMPLE_SIZE, image_area, cap)?;

    let mut inliers: Vec<usize> = errors[..selection.inlier_count]
        .iter()
        .map(|&(_, idx)| idx)
        .collect();
    inliers.sort_unstable();
    let total_residual: f64 = errors[..selection.inlier_count]
        .iter()
        .map(|&(e, _)| e * e)
        .sum();

    Some(Candidate {
        solution,
        inliers,
        total_residual,
        threshold: selection.threshold,
    })
}

/// Iterations needed to reach `confidence` of one outlier-free sample.
fn adapt_iterations(inlier_ratio: f64, confidence: f64, ceiling: usize) -> usize {
    if inlier_ratio <= 0.0 {
        return ceiling;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }
    let ws = inlier_ratio.powi(MINIMAL_SAMPLE_SIZE as i32);
    if ws <= 1e-12 {
        return ceiling;
    }
    if ws >= 1.0 - 1e-12 {
        return 1;
    }
    let est = ((1.0 - confidence).max(1e-12).ln() / (1.0 - ws).ln()).ceil();
    if est.is_finite() && est > 0.0 {
        (est as usize).min(ceiling)
    } else {
        ceiling
    }
}

fn all_depths_positive(rotation: &DMat3, translation: &DVec3, world: &[[f64; 3]]) -> bool {
    world.iter().all(|pw| {
        let pc = *rotation * DVec3::from_array(*pw) + *translation;
        pc.z > 0.0
    })
}
