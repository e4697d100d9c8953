//! Camera system

use crate::config::DepthConvention;
use crate::shadows::projection;
use glam::{Mat4, Vec2, Vec3};

const MIN_NEAR: f32 = 1.0e-4;
const MIN_FOV: f32 = 1.0e-3;
const MIN_ASPECT: f32 = 1.0e-4;

/// Perspective projection parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerspectiveProjection {
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width / height
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for PerspectiveProjection {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_4, // 45 degrees
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl PerspectiveProjection {
    pub fn new(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Copy with degenerate values pushed back into a usable range.
    ///
    /// Zero-sized windows and bad config produce NaNs or infinities further
    /// down the pipeline, so every consumer goes through this first.
    pub fn sanitized(&self) -> Self {
        let near = if self.near.is_finite() {
            self.near.max(MIN_NEAR)
        } else {
            MIN_NEAR
        };
        let far = if self.far.is_finite() && self.far > near {
            self.far
        } else {
            near * 2.0 + 1.0
        };
        let fov_y = if self.fov_y.is_finite() {
            self.fov_y.clamp(MIN_FOV, std::f32::consts::PI - MIN_FOV)
        } else {
            Self::default().fov_y
        };
        let aspect = if self.aspect.is_finite() {
            self.aspect.max(MIN_ASPECT)
        } else {
            1.0
        };
        Self {
            fov_y,
            aspect,
            near,
            far,
        }
    }

    pub fn matrix(&self, convention: DepthConvention) -> Mat4 {
        let p = self.sanitized();
        projection::perspective(p.fov_y, p.aspect, p.near, p.far, convention)
    }

    /// Half width / half height of the near plane in view space.
    pub fn near_plane_half_extents(&self) -> Vec2 {
        let p = self.sanitized();
        let half_height = p.near * (p.fov_y * 0.5).tan();
        Vec2::new(half_height * p.aspect, half_height)
    }

    /// Update aspect ratio from a render target size
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if width > 0.0 && height > 0.0 {
            self.aspect = width / height;
        }
    }
}

/// Camera for viewing the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: PerspectiveProjection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: PerspectiveProjection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection: PerspectiveProjection::default(),
        }
    }

    pub fn with_projection(mut self, projection: PerspectiveProjection) -> Self {
        self.projection = projection;
        self
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), self.up_vector())
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self, convention: DepthConvention) -> Mat4 {
        self.projection.matrix(convention)
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self, convention: DepthConvention) -> Mat4 {
        self.projection_matrix(convention) * self.view_matrix()
    }

    /// Get the forward direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position)
            .try_normalize()
            .unwrap_or(Vec3::NEG_Z)
    }

    /// Get the right direction
    pub fn right(&self) -> Vec3 {
        let forward = self.forward();
        forward
            .cross(self.up)
            .try_normalize()
            .unwrap_or_else(|| forward.any_orthonormal_vector())
    }

    /// Up vector orthogonal to forward and right
    pub fn up_vector(&self) -> Vec3 {
        self.right().cross(self.forward())
    }

    /// Update aspect ratio for perspective projection
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        self.projection.set_aspect(width, height);
    }
}
