use glam::{DVec2, DVec3};
use thiserror::Error;

/// Error types for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Invalid camera intrinsics matrix
    #[error("invalid camera intrinsics matrix: {0}")]
    InvalidIntrinsics(String),

    /// Image dimensions are zero
    #[error("image dimensions must be non-zero, got {width}x{height}")]
    InvalidImageSize {
        /// Image width in pixels
        width: usize,
        /// Image height in pixels
        height: usize,
    },
}

/// Intrinsic parameters of a pinhole camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeIntrinsics {
    /// Focal length in x direction
    pub fx: f64,
    /// Focal length in y direction
    pub fy: f64,
    /// Principal point x coordinate
    pub cx: f64,
    /// Principal point y coordinate
    pub cy: f64,
}

impl PinholeIntrinsics {
    /// Create intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Create intrinsics from a 3x3 calibration matrix.
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> Result<Self, CameraError> {
        if k[0][1] != 0.0 || k[1][0] != 0.0 || k[2][0] != 0.0 || k[2][1] != 0.0 || k[2][2] != 1.0 {
            return Err(CameraError::InvalidIntrinsics(
                "matrix must have the form [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]".to_string(),
            ));
        }
        Ok(Self {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
        })
    }

    /// Convert to a 3x3 calibration matrix.
    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }
}

/// Radial distortion with up to three coefficients (the `K3` model).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RadialDistortion {
    /// First radial coefficient
    pub k1: f64,
    /// Second radial coefficient
    pub k2: f64,
    /// Third radial coefficient
    pub k3: f64,
}

impl RadialDistortion {
    /// Create distortion from the three radial coefficients.
    pub fn new(k1: f64, k2: f64, k3: f64) -> Self {
        Self { k1, k2, k3 }
    }

    /// Whether any coefficient is non-zero.
    pub fn is_active(&self) -> bool {
        self.k1 != 0.0 || self.k2 != 0.0 || self.k3 != 0.0
    }

    /// Radial scale factor for a squared normalized radius.
    pub fn factor(&self, r2: f64) -> f64 {
        let r4 = r2 * r2;
        1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r4 * r2
    }
}

/// A calibrated camera: pinhole intrinsics, optional radial distortion and
/// the image dimensions the calibration refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    /// Pinhole intrinsics
    pub intrinsics: PinholeIntrinsics,
    /// Radial distortion (None for an ideal pinhole)
    pub distortion: Option<RadialDistortion>,
    /// Image width in pixels
    pub width: usize,
    /// Image height in pixels
    pub height: usize,
}

impl CameraModel {
    const UNDISTORT_ITERATIONS: usize = 10;
    const UNDISTORT_EPS: f64 = 1e-12;

    /// Create an ideal pinhole camera.
    pub fn pinhole(
        intrinsics: PinholeIntrinsics,
        width: usize,
        height: usize,
    ) -> Result<Self, CameraError> {
        if width == 0 || height == 0 {
            return Err(CameraError::InvalidImageSize { width, height });
        }
        Ok(Self {
            intrinsics,
            distortion: None,
            width,
            height,
        })
    }

    /// Create a camera with radial distortion.
    pub fn with_distortion(
        intrinsics: PinholeIntrinsics,
        distortion: RadialDistortion,
        width: usize,
        height: usize,
    ) -> Result<Self, CameraError> {
        let mut cam = Self::pinhole(intrinsics, width, height)?;
        cam.distortion = Some(distortion);
        Ok(cam)
    }

    /// Whether the camera carries active distortion.
    pub fn has_distortion(&self) -> bool {
        self.distortion.as_ref().is_some_and(|d| d.is_active())
    }

    /// Project a camera-frame point to (distorted) pixel coordinates.
    ///
    /// Returns `None` for points at or behind the optical center.
    pub fn project(&self, point_camera: DVec3) -> Option<DVec2> {
        if point_camera.z <= 0.0 {
            return None;
        }
        let x = point_camera.x / point_camera.z;
        let y = point_camera.y / point_camera.z;
        let (xd, yd) = self.distort_normalized(x, y);
        Some(DVec2::new(
            self.intrinsics.fx * xd + self.intrinsics.cx,
            self.intrinsics.fy * yd + self.intrinsics.cy,
        ))
    }

    /// Apply distortion to an ideal pixel position.
    pub fn distort_point(&self, pixel: DVec2) -> DVec2 {
        let x = (pixel.x - self.intrinsics.cx) / self.intrinsics.fx;
        let y = (pixel.y - self.intrinsics.cy) / self.intrinsics.fy;
        let (xd, yd) = self.distort_normalized(x, y);
        DVec2::new(
            self.intrinsics.fx * xd + self.intrinsics.cx,
            self.intrinsics.fy * yd + self.intrinsics.cy,
        )
    }

    /// Remove distortion from an observed pixel position.
    ///
    /// Fixed-point iteration on normalized coordinates; converges in a few
    /// steps for moderate radial distortion.
    pub fn undistort_point(&self, pixel: DVec2) -> DVec2 {
        let Some(distortion) = self.distortion.filter(|d| d.is_active()) else {
            return pixel;
        };

        let xd = (pixel.x - self.intrinsics.cx) / self.intrinsics.fx;
        let yd = (pixel.y - self.intrinsics.cy) / self.intrinsics.fy;

        let mut x = xd;
        let mut y = yd;
        for _ in 0..Self::UNDISTORT_ITERATIONS {
            let factor = distortion.factor(x * x + y * y);
            let x_new = xd / factor;
            let y_new = yd / factor;
            let dx = x_new - x;
            let dy = y_new - y;
            x = x_new;
            y = y_new;
            if dx.abs() < Self::UNDISTORT_EPS && dy.abs() < Self::UNDISTORT_EPS {
                break;
            }
        }

        DVec2::new(
            self.intrinsics.fx * x + self.intrinsics.cx,
            self.intrinsics.fy * y + self.intrinsics.cy,
        )
    }

    /// Undistort a batch of pixel positions.
    pub fn undistort_points(&self, pixels: &[[f64; 2]]) -> Vec<[f64; 2]> {
        pixels
            .iter()
            .map(|&[x, y]| {
                let p = self.undistort_point(DVec2::new(x, y));
                [p.x, p.y]
            })
            .collect()
    }

    /// Unit bearing vector in the camera frame for an observed pixel.
    pub fn bearing(&self, pixel: DVec2) -> DVec3 {
        let ideal = self.undistort_point(pixel);
        DVec3::new(
            (ideal.x - self.intrinsics.cx) / self.intrinsics.fx,
            (ideal.y - self.intrinsics.cy) / self.intrinsics.fy,
            1.0,
        )
        .normalize()
    }

    /// Whether a pixel position falls inside the image bounds.
    pub fn contains(&self, pixel: DVec2) -> bool {
        pixel.x >= 0.0
            && pixel.y >= 0.0
            && pixel.x < self.width as f64
            && pixel.y < self.height as f64
    }

    fn distort_normalized(&self, x: f64, y: f64) -> (f64, f64) {
        match self.distortion.filter(|d| d.is_active()) {
            Some(d) => {
                let factor = d.factor(x * x + y * y);
                (x * factor, y * factor)
            }
            None => (x, y),
        }
    }
}
