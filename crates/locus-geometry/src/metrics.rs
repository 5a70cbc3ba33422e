use glam::DVec3;

/// Angle in radians between two bearing vectors.
///
/// The inputs need not be normalized. Degenerate (zero-length) inputs map to
/// the maximum angle so that callers treating the result as an inlier score
/// reject them.
pub fn bearing_angle(a: DVec3, b: DVec3) -> f64 {
    let denom = a.length() * b.length();
    if denom < f64::EPSILON {
        return std::f64::consts::PI;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos()
}
