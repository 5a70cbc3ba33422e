use glam::{DMat3, DVec3};
use locus_map::PinholeIntrinsics;
use nalgebra::{DMatrix, Matrix3, Matrix4, SMatrix, SVector, Vector3, Vector4};

pub(crate) const CP_PAIRS: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// Centroid of a set of 3D points.
pub(crate) fn compute_centroid(pts: &[[f64; 3]]) -> Vector3<f64> {
    let sum = pts
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + Vector3::from(*p));
    sum / pts.len() as f64
}

/// Squared pixel reprojection error of one correspondence.
///
/// Returns `None` for points at or behind the optical center.
pub(crate) fn project_sq_error(
    world_point: &[f64; 3],
    image_point: &[f64; 2],
    rotation: &DMat3,
    translation: &DVec3,
    intrinsics: &PinholeIntrinsics,
) -> Option<f64> {
    let pc = *rotation * DVec3::from_array(*world_point) + *translation;
    if pc.z <= 0.0 {
        return None;
    }
    let inv_z = 1.0 / pc.z;
    let u_hat = intrinsics.fx * pc.x * inv_z + intrinsics.cx;
    let v_hat = intrinsics.fy * pc.y * inv_z + intrinsics.cy;
    let du = u_hat - image_point[0];
    let dv = v_hat - image_point[1];
    Some(du * du + dv * dv)
}

/// Rank of the spatial spread of a point set.
///
/// Counts the eigenvalues of the centered covariance that are significant
/// relative to the largest one: 0 for a single point, 1 for collinear
/// points, 2 for coplanar points, 3 for a fully 3D configuration.
pub(crate) fn spread_rank(pts: &[[f64; 3]]) -> usize {
    if pts.len() < 2 {
        return 0;
    }
    let c = compute_centroid(pts);
    let mut cov = Matrix3::<f64>::zeros();
    for p in pts {
        let d = Vector3::from(*p) - c;
        cov += d * d.transpose();
    }
    cov /= pts.len() as f64;

    let eig = cov.symmetric_eigenvalues();
    let max = eig.iter().cloned().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return 0;
    }
    eig.iter().filter(|&&e| e > 1e-10 * max).count()
}

/// Rigid transform (R, t) minimizing `||R * src + t - dst||` (Kabsch).
pub(crate) fn fit_rigid_transform(
    src: &[Vector3<f64>],
    dst: &[Vector3<f64>],
) -> Option<(Matrix3<f64>, Vector3<f64>)> {
    debug_assert_eq!(src.len(), dst.len());
    let n = src.len() as f64;
    let src_c = src.iter().sum::<Vector3<f64>>() / n;
    let dst_c = dst.iter().sum::<Vector3<f64>>() / n;

    let mut h = Matrix3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        h += (d - dst_c) * (s - src_c).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        // reflection fix: flip the axis of the smallest singular value
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        r = u_fixed * v_t;
    }
    let t = dst_c - r * src_c;
    Some((r, t))
}

/// Gauss-Newton polish of the EPnP betas against the control-point
/// distance constraints `||v(beta)_i - v(beta)_j||^2 = rho_ij`.
pub(crate) fn gauss_newton_betas(
    beta_init: [f64; 4],
    null4: &DMatrix<f64>,
    rho: &[f64; 6],
) -> [f64; 4] {
    const DAMPING: f64 = 1e-9;
    const STOP_EPS: f64 = 1e-12;
    const MAX_ITERATIONS: usize = 10;

    let mut bet = Vector4::from(beta_init);
    let rho_vec = SVector::<f64, 6>::from_row_slice(rho);

    for _ in 0..MAX_ITERATIONS {
        let mut vs = [Vector3::zeros(); 4];
        for (i, v) in vs.iter_mut().enumerate() {
            let block = null4.fixed_view::<3, 4>(i * 3, 0);
            *v = block * bet;
        }

        let mut f = SVector::<f64, 6>::zeros();
        let mut j = SMatrix::<f64, 6, 4>::zeros();

        for (r, &(a, b)) in CP_PAIRS.iter().enumerate() {
            let diff = vs[a] - vs[b];
            f[r] = diff.norm_squared();

            let rows_a = null4.fixed_rows::<3>(a * 3);
            let rows_b = null4.fixed_rows::<3>(b * 3);
            for k in 0..4 {
                let d_col = rows_a.column(k) - rows_b.column(k);
                j[(r, k)] = 2.0 * diff.dot(&d_col);
            }
        }

        f -= rho_vec;

        let mut a_mat = Matrix4::from(j.transpose() * j);
        let b_vec = Vector4::from(j.transpose() * f);
        for d in 0..4 {
            a_mat[(d, d)] += DAMPING;
        }

        match nalgebra::Cholesky::new(a_mat) {
            Some(chol) => {
                let delta = chol.solve(&b_vec);
                bet -= delta;
                if delta.norm() < STOP_EPS {
                    break;
                }
            }
            None => break,
        }
    }

    bet.into()
}

/// Dense linear solve via Gaussian elimination with partial pivoting.
///
/// `a` is a row-major `n`x`n` matrix; both buffers are consumed in place.
pub(crate) fn solve_dense(a: &mut [f64], b: &mut [f64]) -> Option<Vec<f64>> {
    let n = b.len();
    debug_assert_eq!(a.len(), n * n);

    for i in 0..n {
        let mut piv = i;
        let mut max_val = a[i * n + i].abs();
        for r in (i + 1)..n {
            let v = a[r * n + i].abs();
            if v > max_val {
                max_val = v;
                piv = r;
            }
        }
        if max_val < 1e-14 {
            return None;
        }
        if piv != i {
            for c in i..n {
                a.swap(i * n + c, piv * n + c);
            }
            b.swap(i, piv);
        }
        let diag = a[i * n + i];
        for c in i..n {
            a[i * n + c] /= diag;
        }
        b[i] /= diag;
        for r in (i + 1)..n {
            let factor = a[r * n + i];
            if factor == 0.0 {
                continue;
            }
            for c in i..n {
                a[r * n + c] -= factor * a[i * n + c];
            }
            b[r] -= factor * b[i];
        }
    }

    for i in (0..n).rev() {
        for r in 0..i {
            let factor = a[r * n + i];
            if factor != 0.0 {
                a[r * n + i] = 0.0;
                b[r] -= factor * b[i];
            }
        }
    }

    Some(b.to_vec())
}
