//! Projection and depth reconstruction helpers
//!
//! Every function that produces or inverts device depth takes the
//! [`DepthConvention`] explicitly. glam's `*_rh` projections map view depth to
//! `[0, 1]`; reversed-Z is obtained by composing with [`depth_reversal`].

use crate::config::DepthConvention;
use glam::{Mat4, Vec3, Vec4};

/// Matrix mapping clip-space `z` to `w - z`, or identity for standard depth.
pub fn depth_reversal(convention: DepthConvention) -> Mat4 {
    match convention {
        DepthConvention::Standard => Mat4::IDENTITY,
        DepthConvention::ReversedZ => Mat4::from_cols(
            Vec4::X,
            Vec4::Y,
            Vec4::new(0.0, 0.0, -1.0, 0.0),
            Vec4::new(0.0, 0.0, 1.0, 1.0),
        ),
    }
}

pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32, convention: DepthConvention) -> Mat4 {
    depth_reversal(convention) * Mat4::perspective_rh(fov_y, aspect, near, far)
}

#[allow(clippy::too_many_arguments)]
pub fn orthographic(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
    convention: DepthConvention,
) -> Mat4 {
    depth_reversal(convention) * Mat4::orthographic_rh(left, right, bottom, top, near, far)
}

/// Depth value a cleared depth target holds (the far plane).
pub fn clear_depth(convention: DepthConvention) -> f32 {
    match convention {
        DepthConvention::Standard => 1.0,
        DepthConvention::ReversedZ => 0.0,
    }
}

/// Constants to recover view distance from perspective device depth.
///
/// Returns `(x, y, near, far)` such that `distance = 1 / (x * depth + y)`.
pub fn perspective_depth_params(near: f32, far: f32, convention: DepthConvention) -> Vec4 {
    let range = (far - near) / (near * far);
    match convention {
        DepthConvention::Standard => Vec4::new(-range, 1.0 / near, near, far),
        DepthConvention::ReversedZ => Vec4::new(range, 1.0 / far, near, far),
    }
}

/// Constants to recover view distance from orthographic device depth.
///
/// Returns `(x, y, near, far)` such that `distance = x * depth + y`.
pub fn orthographic_depth_params(near: f32, far: f32, convention: DepthConvention) -> Vec4 {
    match convention {
        DepthConvention::Standard => Vec4::new(far - near, near, near, far),
        DepthConvention::ReversedZ => Vec4::new(-(far - near), far, near, far),
    }
}

pub fn linearize_perspective_depth(depth: f32, params: Vec4) -> f32 {
    let denom = params.x * depth + params.y;
    if denom.abs() <= f32::EPSILON {
        params.w
    } else {
        1.0 / denom
    }
}

pub fn linearize_orthographic_depth(depth: f32, params: Vec4) -> f32 {
    params.x * depth + params.y
}

/// Clip space to shadow-map UV: `x, y` into `[0, 1]` with `v` pointing down,
/// depth left untouched.
pub fn clip_to_uv() -> Mat4 {
    Mat4::from_cols(
        Vec4::new(0.5, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -0.5, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(0.5, 0.5, 0.0, 1.0),
    )
}

/// Cube face look directions and up vectors in `+X, -X, +Y, -Y, +Z, -Z` layer order.
pub const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

pub fn cube_face_view(position: Vec3, face: usize) -> Mat4 {
    let (direction, up) = CUBE_FACES[face % 6];
    Mat4::look_at_rh(position, position + direction, up)
}

/// View matrix looking down `direction`, with an up vector that never
/// degenerates.
pub fn look_along(eye: Vec3, direction: Vec3) -> Mat4 {
    let forward = direction.try_normalize().unwrap_or(Vec3::NEG_Z);
    let up = if forward.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };
    Mat4::look_at_rh(eye, eye + forward, up)
}
