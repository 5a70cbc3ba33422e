use glam::DVec3;
use locus_geometry::{bearing_angle, Pose, So3};

/// One angular observation used by the rig refinement: a world point, the
/// unit bearing it was observed under, and the sub-pose of its camera.
pub(crate) struct AngularObservation {
    pub world: DVec3,
    pub bearing: DVec3,
    pub sub_pose: Pose,
}

const MAX_ITERS: usize = 50;
const STOP_EPS: f64 = 1e-16;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MUL: f64 = 10.0;
const STEP_ROT: f64 = 1e-6;

/// Refine a rig pose by minimizing bearing angles over the inlier union.
///
/// Small problem, fixed size: 6 parameters, one angular residual per
/// observation, central-difference Jacobian, dense 6x6 normal equations.
pub(crate) fn refine_rig_pose(observations: &[AngularObservation], initial: &Pose) -> Pose {
    if observations.len() < 3 {
        return *initial;
    }

    let rvec = initial.rotation.log();
    let mut x = [
        rvec.x,
        rvec.y,
        rvec.z,
        initial.translation.x,
        initial.translation.y,
        initial.translation.z,
    ];

    let residuals_of = |x: &[f64; 6], out: &mut [f64]| -> f64 {
        let rig = Pose::from_axis_angle(DVec3::new(x[0], x[1], x[2]), DVec3::new(x[3], x[4], x[5]));
        let mut sum_sq = 0.0;
        for (i, obs) in observations.iter().enumerate() {
            let camera_pose = obs.sub_pose.compose(&rig);
            let predicted = camera_pose.transform(obs.world);
            let angle = bearing_angle(predicted, obs.bearing);
            out[i] = angle;
            sum_sq += angle * angle;
        }
        sum_sq
    };

    let n = observations.len();
    let mut residuals = vec![0.0; n];
    let mut residuals_p = vec![0.0; n];
    let mut residuals_m = vec![0.0; n];
    let mut jacobian = vec![0.0; n * 6];

    let mut lambda = LAMBDA_INIT;
    let mut err_sq = residuals_of(&x, &mut residuals);

    for _ in 0..MAX_ITERS {
        let t_scale = x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
        for k in 0..6 {
            let h = if k < 3 { STEP_ROT } else { STEP_ROT * t_scale };
            let mut x_plus = x;
            let mut x_minus = x;
            x_plus[k] += h;
            x_minus[k] -= h;
            residuals_of(&x_plus, &mut residuals_p);
            residuals_of(&x_minus, &mut residuals_m);
            for i in 0..n {
                jacobian[i * 6 + k] = (residuals_p[i] - residuals_m[i]) / (2.0 * h);
            }
        }

        let mut a = [0.0; 36];
        let mut b = [0.0; 6];
        for i in 0..n {
            let r_val = residuals[i];
            for c in 0..6 {
                let j_ic = jacobian[i * 6 + c];
                b[c] += j_ic * r_val;
                for d in 0..6 {
                    a[c * 6 + d] += j_ic * jacobian[i * 6 + d];
                }
            }
        }
        for d in 0..6 {
            a[d * 6 + d] += lambda;
        }
        let mut rhs = [-b[0], -b[1], -b[2], -b[3], -b[4], -b[5]];

        match solve_6x6(&mut a, &mut rhs) {
            Some(delta) => {
                let mut x_new = x;
                for (xi, di) in x_new.iter_mut().zip(delta.iter()) {
                    *xi += di;
                }
                let err_sq_new = residuals_of(&x_new, &mut residuals_p);
                if err_sq_new < err_sq {
                    x = x_new;
                    residuals.copy_from_slice(&residuals_p);
                    let decrease = err_sq - err_sq_new;
                    err_sq = err_sq_new;
                    lambda = (lambda / LAMBDA_MUL).max(1e-15);
                    if decrease < STOP_EPS {
                        break;
                    }
                } else {
                    lambda *= LAMBDA_MUL;
                }
            }
            None => lambda *= LAMBDA_MUL,
        }
    }

    Pose::new(
        So3::exp(DVec3::new(x[0], x[1], x[2])),
        DVec3::new(x[3], x[4], x[5]),
    )
}

// Dense 6x6 solver, Gaussian elimination with partial pivoting.
fn solve_6x6(a: &mut [f64; 36], b: &mut [f64; 6]) -> Option<[f64; 6]> {
    for i in 0..6 {
        let mut piv = i;
        let mut max_val = a[i * 6 + i].abs();
        for r in (i + 1)..6 {
            let v = a[r * 6 + i].abs();
            if v > max_val {
                max_val = v;
                piv = r;
            }
        }
        if max_val < 1e-14 {
            return None;
        }
        if piv != i {
            for c in i..6 {
                a.swap(i * 6 + c, piv * 6 + c);
            }
            b.swap(i, piv);
        }
        let diag = a[i * 6 + i];
        for c in i..6 {
            a[i * 6 + c] /= diag;
        }
        b[i] /= diag;
        for r in (i + 1)..6 {
            let factor = a[r * 6 + i];
            if factor == 0.0 {
                continue;
            }
            for c in i..6 {
                a[r * 6 + c] -= factor * a[i * 6 + c];
            }
            b[r] -= factor * b[i];
        }
    }
    for i in (0..6).rev() {
        for r in 0..i {
            let factor = a[r * 6 + i];
            if factor != 0.0 {
                a[r * 6 + i] = 0.0;
                b[r] -= factor * b[i];
            }
        }
    }
    Some(*b)
}
