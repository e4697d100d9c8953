//! GPU-side light records

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

/// Color alpha of a light that is shadowed this frame is its strength; these
/// are the two other states.
pub const ALPHA_SHADOW_SKIPPED: f32 = 0.0;
pub const ALPHA_SHADOWS_DISABLED: f32 = -1.0;

pub const PUNCTUAL_KIND_POINT: f32 = 0.0;
pub const PUNCTUAL_KIND_SPOT: f32 = 1.0;

/// Point or spot light in the structured light buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPunctualLight {
    /// rgb = color * intensity, a = shadow strength / skipped / disabled
    pub color: Vec4,
    /// xyz = world position, w = shadow slot or -1
    pub position: Vec4,
    /// xyz = world direction, w = 0 point / 1 spot
    pub direction: Vec4,
    /// range, 1 / range², spot angle scale, spot angle offset
    pub params: Vec4,
}

/// Directional light uniform
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSunLight {
    /// rgb = color * intensity, a = shadow strength / skipped / disabled
    pub color: Vec4,
    /// xyz = direction the light travels, w = 1 when the sun casts shadows
    pub direction: Vec4,
    /// rgb = shadow tint, a = unused
    pub shadow_color: Vec4,
    /// depth bias, normal bias, penumbra, sample count
    pub shadow_bias: Vec4,
}

impl GpuSunLight {
    pub fn is_shadowing(&self) -> bool {
        self.direction.w > 0.5
    }
}
