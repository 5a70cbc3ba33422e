//! Efficient Perspective-n-Point (EPnP) solver.
//!
//! Paper: Lepetit, Moreno-Noguer, Fua, "EPnP: An Accurate O(n) Solution to
//! the PnP Problem", IJCV 2008.

use glam::{DMat3, DVec3};
use locus_geometry::Pose;
use locus_map::PinholeIntrinsics;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3, Vector4};

use crate::ops::{compute_centroid, fit_rigid_transform, gauss_newton_betas, CP_PAIRS};
use crate::types::{PnPError, PnPSolution};

/// Parameters controlling the EPnP solver.
#[derive(Debug, Clone)]
pub struct EpnpParams {
    /// Tolerance handed to the least-squares SVD solves.
    pub svd_tol: f64,
    /// Epsilon for determinant checks before falling back to a
    /// pseudo-inverse.
    pub eps: f64,
}

impl Default for EpnpParams {
    fn default() -> Self {
        Self {
            svd_tol: 1e-12,
            eps: 1e-12,
        }
    }
}

/// Solve Perspective-n-Point with EPnP.
///
/// # Arguments
/// * `world` - 3D coordinates in the world frame, `N >= 4`.
/// * `pixels` - Corresponding undistorted pixel coordinates.
/// * `intrinsics` - Pinhole intrinsics the pixels are expressed in.
/// * `params` - Numeric tolerances.
///
/// The returned pose maps world coordinates into the camera frame.
pub fn solve_epnp(
    world: &[[f64; 3]],
    pixels: &[[f64; 2]],
    intrinsics: &PinholeIntrinsics,
    params: &EpnpParams,
) -> Result<PnPSolution, PnPError> {
    let n = world.len();
    if n != pixels.len() {
        return Err(PnPError::MismatchedLengths {
            left_name: "world points",
            left_len: world.len(),
            right_name: "image points",
            right_len: pixels.len(),
        });
    }
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let cw = select_control_points(world);
    let alphas = compute_barycentric(world, &cw, params.eps)?;

    // 2N x 12 design matrix whose null space holds the camera-frame
    // control points; the eigenvectors of M^T M span all 12 right singular
    // directions even for minimal samples where 2N < 12
    let m = build_m(&alphas, pixels, intrinsics);
    let mtm = m.transpose() * &m;
    let eig = mtm.symmetric_eigen();

    // 12x4 null-space basis, column 0 = smallest eigenvalue outward; betas
    // are expressed in this column order everywhere below
    let mut order: Vec<usize> = (0..12).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[a]
            .partial_cmp(&eig.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut null4 = DMatrix::<f64>::zeros(12, 4);
    for (i, &col) in order.iter().take(4).enumerate() {
        null4.set_column(i, &eig.eigenvectors.column(col).into_owned());
    }

    let l = build_l6x10(&null4);
    let rho = rho_ctrlpts(&cw);
    let rho_vec = DVector::<f64>::from_column_slice(&rho);

    let betas: Vec<[f64; 4]> = [
        estimate_beta(&[0, 1, 3, 6], &l, &rho_vec, params.svd_tol),
        estimate_beta(&[0, 1, 2], &l, &rho_vec, params.svd_tol),
        estimate_beta(&[0, 1, 2, 3, 4], &l, &rho_vec, params.svd_tol),
    ]
    .into_iter()
    .flatten()
    .map(|b| gauss_newton_betas(b, &null4, &rho))
    .collect();

    if betas.is_empty() {
        return Err(PnPError::SvdFailed(
            "no usable beta initialization".to_string(),
        ));
    }

    let mut best: Option<(f64, Matrix3<f64>, Vector3<f64>)> = None;
    for beta in &betas {
        let Some((r, t)) = pose_from_betas(beta, &null4, &alphas, world) else {
            continue;
        };
        let err = reproj_rmse(world, pixels, &r, &t, intrinsics);
        if best.as_ref().map_or(true, |(e, _, _)| err < *e) {
            best = Some((err, r, t));
        }
    }

    let (err, r, t) = best.ok_or(PnPError::DegenerateConfiguration(
        "no beta candidate produced a pose",
    ))?;

    let rotation = DMat3::from_cols(
        DVec3::new(r[(0, 0)], r[(1, 0)], r[(2, 0)]),
        DVec3::new(r[(0, 1)], r[(1, 1)], r[(2, 1)]),
        DVec3::new(r[(0, 2)], r[(1, 2)], r[(2, 2)]),
    );
    let translation = DVec3::new(t.x, t.y, t.z);

    Ok(PnPSolution {
        pose: Pose::from_matrix_parts(&rotation, translation),
        reproj_rmse: err,
    })
}

/// Control points: centroid plus displacements along the principal axes.
fn select_control_points(world: &[[f64; 3]]) -> [[f64; 3]; 4] {
    let c = compute_centroid(world);

    let mut cov = Matrix3::<f64>::zeros();
    for p in world {
        let d = Vector3::from(*p) - c;
        cov += d * d.transpose();
    }
    cov /= world.len() as f64;

    let eig = cov.symmetric_eigen();
    let mut axes: Vec<(f64, Vector3<f64>)> = (0..3)
        .map(|i| (eig.eigenvalues[i].max(0.0), eig.eigenvectors.column(i).into_owned()))
        .collect();
    axes.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut cw = [[0.0; 3]; 4];
    cw[0] = [c.x, c.y, c.z];
    for (i, (lambda, axis)) in axes.iter().enumerate() {
        let d = c + lambda.sqrt() * axis;
        cw[i + 1] = [d.x, d.y, d.z];
    }
    cw
}

/// Barycentric coordinates of the world points w.r.t. the control points.
fn compute_barycentric(
    world: &[[f64; 3]],
    cw: &[[f64; 3]; 4],
    eps: f64,
) -> Result<Vec<[f64; 4]>, PnPError> {
    let c0 = Vector3::from(cw[0]);
    let b = Matrix3::from_columns(&[
        Vector3::from(cw[1]) - c0,
        Vector3::from(cw[2]) - c0,
        Vector3::from(cw[3]) - c0,
    ]);

    // Degenerate (planar) control tetrahedra fall back to a pseudo-inverse.
    let b_inv = if b.determinant().abs() > eps {
        b.try_inverse()
            .ok_or(PnPError::DegenerateConfiguration("control points"))?
    } else {
        b.pseudo_inverse(eps)
            .map_err(|e| PnPError::SvdFailed(e.to_string()))?
    };

    Ok(world
        .iter()
        .map(|p| {
            let lamb = b_inv * (Vector3::from(*p) - c0);
            [1.0 - (lamb.x + lamb.y + lamb.z), lamb.x, lamb.y, lamb.z]
        })
        .collect())
}

/// Build the 2N x 12 EPnP design matrix.
fn build_m(
    alphas: &[[f64; 4]],
    pixels: &[[f64; 2]],
    intrinsics: &PinholeIntrinsics,
) -> DMatrix<f64> {
    let n = alphas.len();
    let mut m = DMatrix::<f64>::zeros(2 * n, 12);

    for (i, (a, uv)) in alphas.iter().zip(pixels.iter()).enumerate() {
        let row_x = 2 * i;
        let row_y = row_x + 1;
        for (j, &alpha) in a.iter().enumerate() {
            let base = 3 * j;
            m[(row_x, base)] = alpha * intrinsics.fx;
            m[(row_x, base + 2)] = alpha * (intrinsics.cx - uv[0]);
            m[(row_y, base + 1)] = alpha * intrinsics.fy;
            m[(row_y, base + 2)] = alpha * (intrinsics.cy - uv[1]);
        }
    }
    m
}

/// Build the 6x10 system relating pairwise beta products to the
/// control-point distances.
fn build_l6x10(null4: &DMatrix<f64>) -> [[f64; 10]; 6] {
    let mut v_cp: Vec<[Vector3<f64>; 4]> = Vec::with_capacity(4);
    for c in 0..4 {
        let col = null4.column(c);
        let mut blocks = [Vector3::zeros(); 4];
        for (k, block) in blocks.iter_mut().enumerate() {
            *block = Vector3::new(col[3 * k], col[3 * k + 1], col[3 * k + 2]);
        }
        v_cp.push(blocks);
    }

    let dv: Vec<Vec<Vector3<f64>>> = (0..4)
        .map(|i| {
            CP_PAIRS
                .iter()
                .map(|&(a, b)| v_cp[i][a] - v_cp[i][b])
                .collect()
        })
        .collect();

    let mut l = [[0.0; 10]; 6];
    for (j, row) in l.iter_mut().enumerate() {
        row[0] = dv[0][j].dot(&dv[0][j]);
        row[1] = 2.0 * dv[0][j].dot(&dv[1][j]);
        row[2] = dv[1][j].dot(&dv[1][j]);
        row[3] = 2.0 * dv[0][j].dot(&dv[2][j]);
        row[4] = 2.0 * dv[1][j].dot(&dv[2][j]);
        row[5] = dv[2][j].dot(&dv[2][j]);
        row[6] = 2.0 * dv[0][j].dot(&dv[3][j]);
        row[7] = 2.0 * dv[1][j].dot(&dv[3][j]);
        row[8] = 2.0 * dv[2][j].dot(&dv[3][j]);
        row[9] = dv[3][j].dot(&dv[3][j]);
    }
    l
}

/// Squared distances between the four world-frame control points.
fn rho_ctrlpts(cw: &[[f64; 3]; 4]) -> [f64; 6] {
    CP_PAIRS.map(|(i, j)| {
        cw[i]
            .iter()
            .zip(cw[j].iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>()
    })
}

/// Pick the 6 x k subsystem for the selected beta products.
fn l_submatrix(l: &[[f64; 10]; 6], cols: &[usize]) -> DMatrix<f64> {
    let data: Vec<f64> = cols
        .iter()
        .flat_map(|&c| (0..6).map(move |r| l[r][c]))
        .collect();
    DMatrix::<f64>::from_column_slice(6, cols.len(), &data)
}

/// Solve one beta initialization case from a column subset of L.
///
/// The columns of L correspond to the products
/// `[b11, b12, b22, b13, b23, b33, b14, b24, b34, b44]`; the three
/// supported subsets mirror the reference EPnP approximations.
fn estimate_beta(
    cols: &[usize],
    l: &[[f64; 10]; 6],
    rho: &DVector<f64>,
    tol_svd: f64,
) -> Option<[f64; 4]> {
    let l_sub = l_submatrix(l, cols);
    let sol = l_sub.svd(true, true).solve(rho, tol_svd).ok()?;
    let x = sol.column(0);

    match cols.len() {
        // x = [b11, b12, b13, b14]
        4 => {
            let b1 = x[0].abs().sqrt();
            if b1 == 0.0 {
                return None;
            }
            let sign = if x[0] < 0.0 { -1.0 } else { 1.0 };
            Some([sign * b1, x[1] / b1, x[2] / b1, x[3] / b1])
        }
        // x = [b11, b12, b22]
        3 => {
            let mut beta = [0.0; 4];
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[1] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
            } else {
                beta[0] = x[0].sqrt();
                beta[1] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
            Some(beta)
        }
        // x = [b11, b12, b22, b13, b23]
        5 => {
            let mut beta = [0.0; 4];
            if x[0] < 0.0 {
                beta[0] = (-x[0]).sqrt();
                beta[1] = if x[2] > 0.0 { 0.0 } else { (-x[2]).sqrt() };
                beta[2] = x[3] / (-x[0]).sqrt();
            } else {
                beta[0] = x[0].sqrt();
                beta[1] = if x[2] < 0.0 { 0.0 } else { x[2].sqrt() };
                beta[2] = x[3] / x[0].sqrt();
            }
            if x[1] < 0.0 {
                beta[0] = -beta[0];
            }
            Some(beta)
        }
        _ => None,
    }
}

/// Recover (R, t) from a beta vector.
///
/// The betas combine the null-space columns into camera-frame control
/// points; every world point is then expressed in the camera frame through
/// its barycentric coordinates and the rigid transform between the two
/// point sets is the pose.
fn pose_from_betas(
    betas: &[f64; 4],
    null4: &DMatrix<f64>,
    alphas: &[[f64; 4]],
    world: &[[f64; 3]],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    let beta_vec = Vector4::from(*betas);
    let cc_flat = null4 * beta_vec;

    let mut cc = [Vector3::<f64>::zeros(); 4];
    for (i, c) in cc.iter_mut().enumerate() {
        *c = Vector3::new(cc_flat[3 * i], cc_flat[3 * i + 1], cc_flat[3 * i + 2]);
    }

    let mut pc: Vec<Vector3<f64>> = alphas
        .iter()
        .map(|a| (0..4).map(|j| a[j] * cc[j]).sum())
        .collect();

    // the null space is defined up to sign; keep the solution in front of
    // the camera
    if pc[0].z < 0.0 {
        for p in &mut pc {
            *p = -*p;
        }
    }

    let world_vecs: Vec<Vector3<f64>> = world.iter().map(|p| Vector3::from(*p)).collect();
    fit_rigid_transform(&world_vecs, &pc)
}

fn reproj_rmse(
    world: &[[f64; 3]],
    pixels: &[[f64; 2]],
    r: &Matrix3<f64>,
    t: &Vector3<f64>,
    intrinsics: &PinholeIntrinsics,
) -> f64 {
    let mut sum_sq = 0.0;
    for (p, uv) in world.iter().zip(pixels.iter()) {
        let pc = r * Vector3::from(*p) + t;
        let inv_z = 1.0 / pc.z;
        let u_hat = intrinsics.fx * pc.x * inv_z + intrinsics.cx;
        let v_hat = intrinsics.fy * pc.y * inv_z + intrinsics.cy;
        let du = u_hat - uv[0];
        let dv = v_hat - uv[1];
        sum_sq += du * du + dv * dv;
    }
    (sum_sq / world.len() as f64).sqrt()
}
