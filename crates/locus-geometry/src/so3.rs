use std::ops::Mul;

use glam::{DMat3, DQuat, DVec3};
use rand::Rng;

/// Rotation in 3D space, stored as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct So3 {
    /// Underlying unit quaternion.
    pub q: DQuat,
}

impl So3 {
    /// The identity rotation.
    pub const IDENTITY: Self = Self { q: DQuat::IDENTITY };

    /// Build a rotation from a quaternion, renormalizing it.
    pub fn from_quaternion(q: DQuat) -> Self {
        Self { q: q.normalize() }
    }

    /// Build a rotation from a 3x3 rotation matrix.
    pub fn from_matrix(mat: &DMat3) -> Self {
        Self {
            q: DQuat::from_mat3(mat).normalize(),
        }
    }

    /// Build a rotation around `axis` by `angle` radians.
    pub fn from_axis_angle(axis: DVec3, angle: f64) -> Self {
        Self {
            q: DQuat::from_axis_angle(axis.normalize(), angle),
        }
    }

    /// Draw a uniformly distributed random rotation.
    pub fn from_random(rng: &mut impl Rng) -> Self {
        let r1: f64 = rng.random();
        let r2: f64 = rng.random();
        let r3: f64 = rng.random();

        let two_pi = 2.0 * std::f64::consts::PI;
        let w = (1.0 - r1).sqrt() * (two_pi * r2).sin();
        let x = (1.0 - r1).sqrt() * (two_pi * r2).cos();
        let y = r1.sqrt() * (two_pi * r3).sin();
        let z = r1.sqrt() * (two_pi * r3).cos();

        Self {
            q: DQuat::from_xyzw(x, y, z, w),
        }
    }

    /// Rotation matrix representation.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_quat(self.q)
    }

    /// Inverse rotation.
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.inverse(),
        }
    }

    /// Lie algebra -> Lie group (axis-angle exponential map).
    pub fn exp(v: DVec3) -> Self {
        let theta = v.length();
        if theta < f64::EPSILON {
            return Self::IDENTITY;
        }
        Self {
            q: DQuat::from_axis_angle(v / theta, theta),
        }
    }

    /// Lie group -> Lie algebra (axis-angle logarithm).
    pub fn log(&self) -> DVec3 {
        // canonicalize to the hemisphere with w >= 0 so the angle is in [0, pi]
        let q = if self.q.w < 0.0 { -self.q } else { self.q };
        let vec = DVec3::new(q.x, q.y, q.z);
        let sin_half = vec.length();
        if sin_half < f64::EPSILON {
            return 2.0 * vec;
        }
        let angle = 2.0 * sin_half.atan2(q.w);
        vec * (angle / sin_half)
    }

    /// Skew-symmetric matrix of `v` (vector space -> Lie algebra).
    pub fn hat(v: DVec3) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(0.0, v.z, -v.y),
            DVec3::new(-v.z, 0.0, v.x),
            DVec3::new(v.y, -v.x, 0.0),
        )
    }

    /// Rotation angle in radians between `self` and `other`.
    pub fn angle_to(&self, other: &So3) -> f64 {
        (self.inverse() * *other).log().length()
    }
}

impl Mul for So3 {
    type Output = So3;

    fn mul(self, rhs: Self) -> Self::Output {
        So3 {
            q: (self.q * rhs.q).normalize(),
        }
    }
}

impl Mul<DVec3> for So3 {
    type Output = DVec3;

    fn mul(self, rhs: DVec3) -> Self::Output {
        self.q * rhs
    }
}
