//! Plane-to-plane homography estimation.
//!
//! Direct Linear Transform from four or more correspondences, with Hartley
//! normalization of both point sets. The null vector of `A` is taken as the
//! eigenvector of the smallest eigenvalue of `AᵀA`.

use nalgebra::{DMatrix, Matrix2, Matrix3, Vector3};

/// Project a point through `h`: `h · [x, y, 1]ᵀ → [u, v]`.
///
/// Points mapped to infinity come back as NaN.
pub fn project(h: &Matrix3<f64>, p: [f64; 2]) -> [f64; 2] {
    let q = h * Vector3::new(p[0], p[1], 1.0);
    if q[2].abs() < 1e-15 {
        return [f64::NAN, f64::NAN];
    }
    [q[0] / q[2], q[1] / q[2]]
}

pub fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Translate the centroid to the origin and scale to mean distance √2.
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();
    (t, normalized)
}

/// Least-squares homography with `dst ≈ project(H, src)`.
///
/// Returns `None` for fewer than four pairs or a numerically singular fit.
pub fn estimate(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return None;
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let [sx, sy] = src_n[i];
        let [dx, dy] = dst_n[i];

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);
    let min_idx = (0..9).min_by(|&i, &j| {
        eig.eigenvalues[i]
            .abs()
            .total_cmp(&eig.eigenvalues[j].abs())
    })?;
    let v = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let h = t_dst.try_inverse()? * h_norm * t_src;
    let scale = h[(2, 2)];
    let h = if scale.abs() > 1e-15 { h / scale } else { h };
    if h.determinant().abs() < 1e-12 || h.iter().any(|x| !x.is_finite()) {
        return None;
    }
    Some(h)
}

/// Jacobian of the projection at `p`.
pub fn jacobian(h: &Matrix3<f64>, p: [f64; 2]) -> Matrix2<f64> {
    let q = h * Vector3::new(p[0], p[1], 1.0);
    let w = q[2];
    let (u, v) = (q[0] / w, q[1] / w);
    Matrix2::new(
        (h[(0, 0)] - u * h[(2, 0)]) / w,
        (h[(0, 1)] - u * h[(2, 1)]) / w,
        (h[(1, 0)] - v * h[(2, 0)]) / w,
        (h[(1, 1)] - v * h[(2, 1)]) / w,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_h() -> Matrix3<f64> {
        Matrix3::new(3.9, -0.2, 120.0, 0.25, 4.1, 80.0, 1e-5, -2e-5, 1.0)
    }

    #[test]
    fn recovers_known_homography() {
        let h = sample_h();
        let src = [[14.0, 14.0], [196.0, 14.0], [196.0, 283.0], [14.0, 283.0], [30.0, 14.0]];
        let dst: Vec<[f64; 2]> = src.iter().map(|&p| project(&h, p)).collect();
        let est = estimate(&src, &dst).unwrap();
        for &p in &src {
            assert!(distance(project(&est, p), project(&h, p)) < 1e-6);
        }
        let mid = project(&est, [105.0, 150.0]);
        assert!(distance(mid, project(&h, [105.0, 150.0])) < 1e-6);
    }

    #[test]
    fn too_few_points() {
        assert!(estimate(&[[0.0, 0.0]; 3], &[[0.0, 0.0]; 3]).is_none());
    }

    #[test]
    fn mismatched_lengths() {
        let src = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        assert!(estimate(&src, &src[..3]).is_none());
    }

    #[test]
    fn jacobian_of_scaling() {
        let h = Matrix3::new(4.0, 0.0, 10.0, 0.0, 4.0, 5.0, 0.0, 0.0, 1.0);
        let j = jacobian(&h, [3.0, 7.0]);
        assert!((j[(0, 0)] - 4.0).abs() < 1e-12);
        assert!(j[(0, 1)].abs() < 1e-12);
        assert!((j.determinant() - 16.0).abs() < 1e-9);
    }
}
