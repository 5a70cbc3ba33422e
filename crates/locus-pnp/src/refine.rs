//! Levenberg-Marquardt refinement of pose and intrinsics.

use glam::DVec3;
use locus_geometry::{Pose, So3};
use locus_map::{CameraModel, PinholeIntrinsics, RadialDistortion};

use crate::ops::solve_dense;
use crate::types::PnPError;

// Residual assigned to points that fall behind the camera during a trial
// step, steering the optimizer back to valid poses.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e4;

const POSE_PARAMS: usize = 6;
const INTRINSIC_PARAMS: usize = 7;

/// Parameters controlling the LM refinement.
#[derive(Debug, Clone)]
pub struct RefineParams {
    /// Maximum number of LM iterations.
    pub max_iters: usize,
    /// Convergence threshold on the decrease of the squared error.
    pub eps: f64,
    /// Initial damping factor.
    pub lambda_init: f64,
    /// Multiplicative damping update.
    pub lambda_mul: f64,
    /// Refine focal length, principal point and distortion jointly with
    /// the pose.
    pub refine_intrinsics: bool,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            max_iters: 50,
            eps: 1e-14,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
            refine_intrinsics: false,
        }
    }
}

/// Outcome of the LM refinement.
#[derive(Debug, Clone)]
pub struct Refinement {
    /// Refined world-to-camera pose.
    pub pose: Pose,
    /// Camera model; differs from the input only when intrinsic refinement
    /// was enabled.
    pub camera: CameraModel,
    /// Root-mean-square reprojection error in pixels after refinement.
    pub rmse: f64,
    /// LM iterations performed.
    pub iterations: usize,
    /// Whether the decrease criterion was met.
    pub converged: bool,
}

/// Refine a pose by minimizing pixel reprojection error over an inlier set.
///
/// `pixels` are the raw observations; the projection model applies the
/// camera's distortion, so enabling `refine_intrinsics` adjusts focal
/// length, principal point and the three radial coefficients jointly with
/// the pose. The Jacobian is built by central differences and the normal
/// equations are solved densely, the problem being at most 13-dimensional.
pub fn refine_pose(
    world: &[[f64; 3]],
    pixels: &[[f64; 2]],
    camera: &CameraModel,
    initial_pose: &Pose,
    params: &RefineParams,
) -> Result<Refinement, PnPError> {
    let n = world.len();
    if n != pixels.len() {
        return Err(PnPError::MismatchedLengths {
            left_name: "world points",
            left_len: world.len(),
            right_name: "image points",
            right_len: pixels.len(),
        });
    }
    if n < 3 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 3,
            actual: n,
        });
    }

    let mut refine_intrinsics = params.refine_intrinsics;
    if refine_intrinsics && 2 * n < POSE_PARAMS + INTRINSIC_PARAMS {
        log::debug!("too few correspondences to refine intrinsics, refining pose only");
        refine_intrinsics = false;
    }
    let num_params = if refine_intrinsics {
        POSE_PARAMS + INTRINSIC_PARAMS
    } else {
        POSE_PARAMS
    };

    let rvec = initial_pose.rotation.log();
    let mut x = vec![0.0; num_params];
    x[0] = rvec.x;
    x[1] = rvec.y;
    x[2] = rvec.z;
    x[3] = initial_pose.translation.x;
    x[4] = initial_pose.translation.y;
    x[5] = initial_pose.translation.z;
    if refine_intrinsics {
        let intr = camera.intrinsics;
        let dist = camera.distortion.unwrap_or_default();
        x[6] = intr.fx;
        x[7] = intr.fy;
        x[8] = intr.cx;
        x[9] = intr.cy;
        x[10] = dist.k1;
        x[11] = dist.k2;
        x[12] = dist.k3;
    }

    let template = camera.clone();
    let project_all = |x: &[f64], out: &mut [f64]| -> f64 {
        let cam = apply_params(&template, x, refine_intrinsics);
        let rotation = So3::exp(DVec3::new(x[0], x[1], x[2])).matrix();
        let translation = DVec3::new(x[3], x[4], x[5]);

        let mut sum_sq = 0.0;
        for (i, (pw, uv)) in world.iter().zip(pixels.iter()).enumerate() {
            let pc = rotation * DVec3::from_array(*pw) + translation;
            let (du, dv) = match cam.project(pc) {
                Some(projected) => (projected.x - uv[0], projected.y - uv[1]),
                None => (BEHIND_CAMERA_RESIDUAL, BEHIND_CAMERA_RESIDUAL),
            };
            out[2 * i] = du;
            out[2 * i + 1] = dv;
            sum_sq += du * du + dv * dv;
        }
        sum_sq
    };

    let mut residuals = vec![0.0; 2 * n];
    let mut residuals_p = vec![0.0; 2 * n];
    let mut residuals_m = vec![0.0; 2 * n];
    let mut jacobian = vec![0.0; 2 * n * num_params];

    let mut lambda = params.lambda_init;
    let mut err_sq = project_all(&x, &mut residuals);
    let mut iterations = 0;
    let mut converged = false;

    while iterations < params.max_iters {
        iterations += 1;

        for k in 0..num_params {
            let h = step_size(&x, k);
            let mut x_plus = x.clone();
            let mut x_minus = x.clone();
            x_plus[k] += h;
            x_minus[k] -= h;
            project_all(&x_plus, &mut residuals_p);
            project_all(&x_minus, &mut residuals_m);
            for i in 0..(2 * n) {
                jacobian[i * num_params + k] = (residuals_p[i] - residuals_m[i]) / (2.0 * h);
            }
        }

        // normal equations (J^T J + lambda I) delta = -J^T r
        let mut a = vec![0.0; num_params * num_params];
        let mut b = vec![0.0; num_params];
        for i in 0..(2 * n) {
            let r_val = residuals[i];
            for c in 0..num_params {
                let j_ic = jacobian[i * num_params + c];
                b[c] += j_ic * r_val;
                for d in 0..num_params {
                    a[c * num_params + d] += j_ic * jacobian[i * num_params + d];
                }
            }
        }
        for d in 0..num_params {
            a[d * num_params + d] += lambda;
        }
        let mut rhs: Vec<f64> = b.iter().map(|v| -v).collect();

        match solve_dense(&mut a, &mut rhs) {
            Some(delta) => {
                let mut x_new = x.clone();
                for (xi, di) in x_new.iter_mut().zip(delta.iter()) {
                    *xi += di;
                }
                let err_sq_new = project_all(&x_new, &mut residuals_p);
                if err_sq_new < err_sq {
                    x = x_new;
                    residuals.copy_from_slice(&residuals_p);
                    let decrease = err_sq - err_sq_new;
                    err_sq = err_sq_new;
                    lambda = (lambda / params.lambda_mul).max(1e-15);
                    if decrease < params.eps {
                        converged = true;
                        break;
                    }
                } else {
                    lambda *= params.lambda_mul;
                }
            }
            None => {
                lambda *= params.lambda_mul;
            }
        }
    }

    let pose = Pose::from_axis_angle(
        DVec3::new(x[0], x[1], x[2]),
        DVec3::new(x[3], x[4], x[5]),
    );
    let refined_camera = apply_params(&template, &x, refine_intrinsics);
    let rmse = (err_sq / (2.0 * n as f64)).sqrt();

    Ok(Refinement {
        pose,
        camera: refined_camera,
        rmse,
        iterations,
        converged,
    })
}

fn apply_params(template: &CameraModel, x: &[f64], refine_intrinsics: bool) -> CameraModel {
    if !refine_intrinsics {
        return template.clone();
    }
    let mut cam = template.clone();
    cam.intrinsics = PinholeIntrinsics::new(x[6], x[7], x[8], x[9]);
    cam.distortion = Some(RadialDistortion::new(x[10], x[11], x[12]));
    cam
}

fn step_size(x: &[f64], k: usize) -> f64 {
    match k {
        // rotation entries are radians around unity
        0..=2 => 1e-6,
        3..=5 => {
            let t_scale = x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
            1e-6 * t_scale
        }
        // focal and principal point scale with their magnitude
        6..=9 => 1e-6 * x[k].abs().max(1.0),
        // distortion coefficients live near zero
        _ => 1e-8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_map::PinholeIntrinsics;

    fn camera() -> CameraModel {
        CameraModel::pinhole(PinholeIntrinsics::new(800.0, 800.0, 400.0, 300.0), 800, 600)
            .unwrap()
    }

    fn scene() -> Vec<[f64; 3]> {
        vec![
            [0.4, -0.3, 4.1],
            [-0.6, 0.2, 5.3],
            [0.8, 0.7, 4.7],
            [-0.2, -0.8, 6.0],
            [0.1, 0.5, 5.5],
            [0.9, -0.6, 4.4],
            [-0.7, -0.1, 4.9],
            [0.3, 0.9, 5.8],
        ]
    }

    fn project(pose: &Pose, cam: &CameraModel, world: &[[f64; 3]]) -> Vec<[f64; 2]> {
        world
            .iter()
            .map(|p| {
                let px = cam.project(pose.transform(DVec3::from_array(*p))).unwrap();
                [px.x, px.y]
            })
            .collect()
    }

    fn ground_truth() -> Pose {
        Pose::new(
            So3::from_axis_angle(DVec3::new(0.2, 1.0, -0.1), 0.25),
            DVec3::new(0.1, -0.15, 0.3),
        )
    }

    #[test]
    fn test_refine_converges_from_perturbed_pose() {
        let cam = camera();
        let pose_true = ground_truth();
        let world = scene();
        let pixels = project(&pose_true, &cam, &world);

        let perturbed = Pose::new(
            pose_true.rotation * So3::from_axis_angle(DVec3::X, 0.02),
            pose_true.translation + DVec3::new(0.03, -0.02, 0.05),
        );

        let refinement =
            refine_pose(&world, &pixels, &cam, &perturbed, &RefineParams::default()).unwrap();
        assert!(refinement.rmse < 1e-6, "rmse {}", refinement.rmse);
        assert!(refinement.pose.translation_distance_to(&pose_true) < 1e-6);
        assert!(refinement.pose.rotation_angle_to(&pose_true) < 1e-6);
    }

    #[test]
    fn test_refine_recovers_focal_length() {
        let cam_true = CameraModel::pinhole(
            PinholeIntrinsics::new(820.0, 820.0, 400.0, 300.0),
            800,
            600,
        )
        .unwrap();
        let pose_true = ground_truth();
        let world = scene();
        let pixels = project(&pose_true, &cam_true, &world);

        // start from a camera whose focal length is off by 20px
        let cam_wrong = camera();
        let params = RefineParams {
            refine_intrinsics: true,
            max_iters: 200,
            ..Default::default()
        };
        let refinement = refine_pose(&world, &pixels, &cam_wrong, &pose_true, &params).unwrap();
        assert!(refinement.rmse < 1e-4, "rmse {}", refinement.rmse);
        assert!(
            (refinement.camera.intrinsics.fx - 820.0).abs() < 1.0,
            "fx {}",
            refinement.camera.intrinsics.fx
        );
    }

    #[test]
    fn test_refine_does_not_touch_camera_without_flag() {
        let cam = camera();
        let pose_true = ground_truth();
        let world = scene();
        let pixels = project(&pose_true, &cam, &world);
        let refinement =
            refine_pose(&world, &pixels, &cam, &pose_true, &RefineParams::default()).unwrap();
        assert_eq!(refinement.camera, cam);
    }

    #[test]
    fn test_refine_too_few_points() {
        let cam = camera();
        let world = [[0.0, 0.0, 5.0], [1.0, 0.0, 5.0]];
        let pixels = [[400.0, 300.0], [560.0, 300.0]];
        assert!(matches!(
            refine_pose(&world, &pixels, &cam, &Pose::IDENTITY, &RefineParams::default()),
            Err(PnPError::InsufficientCorrespondences { .. })
        ));
    }
}
