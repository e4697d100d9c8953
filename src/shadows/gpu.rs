//! Shadow uniform blocks
//!
//! Fixed-capacity arrays sized by the compile-time shadow caps. Slots past
//! the frame's shadowing count are zero, and the whole block is zero when the
//! category's atlas was not created this frame.

use crate::config::{
    K_MAX_CASCADE_COUNT, K_MAX_SHADOWING_POINT_LIGHT_COUNT, K_MAX_SHADOWING_SPOT_LIGHT_COUNT,
};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

pub const POINT_SHADOW_FACE_COUNT: usize = K_MAX_SHADOWING_POINT_LIGHT_COUNT * 6;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSunShadowData {
    pub world_to_shadow: [Mat4; K_MAX_CASCADE_COUNT],
    /// xyz = world center, w = radius
    pub culling_spheres: [Vec4; K_MAX_CASCADE_COUNT],
    pub depth_params: [Vec4; K_MAX_CASCADE_COUNT],
    /// depth bias, normal bias, penumbra, sample count
    pub bias: Vec4,
    /// created (0/1), cascade count, resolution, 1 / resolution
    pub info: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSpotShadowData {
    /// Indexed by shadow slot
    pub world_to_shadow: [Mat4; K_MAX_SHADOWING_SPOT_LIGHT_COUNT],
    pub depth_params: [Vec4; K_MAX_SHADOWING_SPOT_LIGHT_COUNT],
    pub bias: [Vec4; K_MAX_SHADOWING_SPOT_LIGHT_COUNT],
    /// created (0/1), light count, resolution, 1 / resolution
    pub info: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPointShadowData {
    /// Indexed by `slot * 6 + face`
    pub world_to_shadow: [Mat4; POINT_SHADOW_FACE_COUNT],
    /// All faces of a light share one projection
    pub depth_params: [Vec4; K_MAX_SHADOWING_POINT_LIGHT_COUNT],
    pub bias: [Vec4; K_MAX_SHADOWING_POINT_LIGHT_COUNT],
    /// created (0/1), light count, resolution, 1 / resolution
    pub info: Vec4,
}

impl GpuSunShadowData {
    pub fn is_created(&self) -> bool {
        self.info.x > 0.5
    }
}

impl GpuSpotShadowData {
    pub fn is_created(&self) -> bool {
        self.info.x > 0.5
    }
}

impl GpuPointShadowData {
    pub fn is_created(&self) -> bool {
        self.info.x > 0.5
    }
}
