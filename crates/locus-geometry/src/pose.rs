use std::ops::Mul;

use glam::{DMat3, DVec3};

use crate::so3::So3;

/// Rigid transform mapping points from the world frame to a local frame.
///
/// For a camera pose this is the world-to-camera convention: a landmark `p`
/// in world coordinates lands in the camera frame as `pose.transform(p)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    /// Rotation part.
    pub rotation: So3,
    /// Translation part.
    pub translation: DVec3,
}

impl Pose {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: So3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Build a pose from rotation and translation.
    pub fn new(rotation: So3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build a pose from a rotation matrix and a translation vector.
    pub fn from_matrix_parts(rotation: &DMat3, translation: DVec3) -> Self {
        Self {
            rotation: So3::from_matrix(rotation),
            translation,
        }
    }

    /// Build a pose from an axis-angle rotation vector and a translation.
    pub fn from_axis_angle(rvec: DVec3, translation: DVec3) -> Self {
        Self {
            rotation: So3::exp(rvec),
            translation,
        }
    }

    /// Map a point from the world frame into the local frame.
    pub fn transform(&self, p: DVec3) -> DVec3 {
        self.rotation * p + self.translation
    }

    /// Compose two transforms; `self.compose(rhs)` applies `rhs` first.
    pub fn compose(&self, rhs: &Pose) -> Pose {
        Pose {
            rotation: self.rotation * rhs.rotation,
            translation: self.rotation * rhs.translation + self.translation,
        }
    }

    /// Inverse transform (local frame back to world frame).
    pub fn inverse(&self) -> Pose {
        let inv_rot = self.rotation.inverse();
        Pose {
            rotation: inv_rot,
            translation: -(inv_rot * self.translation),
        }
    }

    /// Rotation matrix of this pose.
    pub fn rotation_matrix(&self) -> DMat3 {
        self.rotation.matrix()
    }

    /// Rotational distance to `other` in radians.
    pub fn rotation_angle_to(&self, other: &Pose) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }

    /// Euclidean distance between the two translation parts.
    pub fn translation_distance_to(&self, other: &Pose) -> f64 {
        (self.translation - other.translation).length()
    }

    /// Camera center in world coordinates (for a world-to-camera pose).
    pub fn center(&self) -> DVec3 {
        -(self.rotation.inverse() * self.translation)
    }
}

impl Mul for Pose {
    type Output = Pose;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(&rhs)
    }
}
