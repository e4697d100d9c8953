//! Forward+ tile light culling
//!
//! The screen is split into square tiles. For every tile the kernel builds a
//! sub-frustum from the camera near plane and keeps the indices of the
//! punctual lights (and optionally reflection probes) whose bounds touch it.
//! Output is one fixed-size record per tile: `[count, index_0, .., index_n]`.

pub mod kernel;
pub mod shader;

use crate::config::LightingSettings;
use crate::lighting::{LightCategory, LightRecord};
use crate::scene::{Camera, VisibleReflectionProbe};
use crate::shadows::projection;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec4, Vec4};

/// Workgroup edge of the culling kernel; one workgroup per tile
pub const WORKGROUP_SIZE: u32 = 8;

/// Binding slots of the culling kernel
pub const BINDING_UNIFORMS: u32 = 0;
pub const BINDING_LIGHTS: u32 = 1;
pub const BINDING_LIGHT_TILES: u32 = 2;
pub const BINDING_PROBES: u32 = 3;
pub const BINDING_PROBE_TILES: u32 = 4;
pub const BINDING_DEPTH: u32 = 5;

/// Cone half angle stored for sphere-only bounds
pub const SPHERE_ONLY: f32 = -1.0;

/// Tile grid covering a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

impl TileGrid {
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let tile_size = tile_size.max(1);
        Self {
            width,
            height,
            tile_size,
            tiles_x: width.div_ceil(tile_size),
            tiles_y: height.div_ceil(tile_size),
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    /// u32 elements of a tile index buffer for this grid
    pub fn index_buffer_len(&self, per_tile_data_size: u32) -> usize {
        self.tile_count() as usize * per_tile_data_size as usize
    }

    pub fn workgroups(&self) -> [u32; 3] {
        [self.tiles_x, self.tiles_y, 1]
    }
}

/// Light or probe bounds as seen by the culling kernel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuCullingLight {
    /// xyz = world position, w = radius
    pub bound: Vec4,
    /// xyz = cone axis, w = cone half angle or [`SPHERE_ONLY`]
    pub axis_angle: Vec4,
}

impl GpuCullingLight {
    pub fn sphere(position: glam::Vec3, radius: f32) -> Self {
        Self {
            bound: position.extend(radius),
            axis_angle: Vec4::new(0.0, 0.0, 0.0, SPHERE_ONLY),
        }
    }

    pub fn is_cone(&self) -> bool {
        self.axis_angle.w >= 0.0
    }
}

/// Kernel uniform block. Laid out as whole vec4s to match WGSL alignment.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TileCullingUniforms {
    /// World to view
    pub view: Mat4,
    /// xy = near plane bottom-left corner, z = -near, w = far
    pub near_bottom_left: Vec4,
    /// xy = tile footprint on the near plane, zw = near plane half extents
    pub tile_footprint: Vec4,
    /// Perspective depth linearization constants of the camera
    pub depth_params: Vec4,
    /// tiles x, tiles y, tile size, per-tile data size
    pub grid: UVec4,
    /// width, height, light count, probe count
    pub buffer: UVec4,
    /// split depth, depth bound, probes enabled, unused
    pub flags: UVec4,
}

impl TileCullingUniforms {
    pub fn near(&self) -> f32 {
        -self.near_bottom_left.z
    }

    pub fn far(&self) -> f32 {
        self.near_bottom_left.w
    }

    pub fn light_count(&self) -> u32 {
        self.buffer.z
    }

    pub fn probe_count(&self) -> u32 {
        self.buffer.w
    }

    pub fn per_tile_data_size(&self) -> u32 {
        self.grid.w
    }

    pub fn split_depth(&self) -> bool {
        self.flags.x != 0 && self.flags.y != 0
    }

    pub fn probes_enabled(&self) -> bool {
        self.flags.z != 0
    }
}

/// CPU half of the culling step: derives the per-frame kernel constants.
#[derive(Debug, Clone, Copy)]
pub struct TileCullingSetup {
    pub grid: TileGrid,
    pub uniforms: TileCullingUniforms,
}

impl TileCullingSetup {
    pub fn new(camera: &Camera, grid: &TileGrid, settings: &LightingSettings) -> Self {
        let projection = camera.projection.sanitized();
        let half = projection.near_plane_half_extents();

        let tile_size = grid.tile_size as f32;
        let footprint_x = tile_size * 2.0 * half.x / grid.width as f32;
        let footprint_y = tile_size * 2.0 * half.y / grid.height as f32;

        let uniforms = TileCullingUniforms {
            view: camera.view_matrix(),
            near_bottom_left: Vec4::new(-half.x, -half.y, -projection.near, projection.far),
            tile_footprint: Vec4::new(footprint_x, footprint_y, half.x, half.y),
            depth_params: projection::perspective_depth_params(
                projection.near,
                projection.far,
                settings.depth_convention,
            ),
            grid: UVec4::new(
                grid.tiles_x,
                grid.tiles_y,
                grid.tile_size,
                settings.per_tile_data_size.max(2),
            ),
            buffer: UVec4::new(grid.width, grid.height, 0, 0),
            flags: UVec4::new(
                settings.split_depth_culling as u32,
                0,
                settings.reflection_probe_tiles as u32,
                0,
            ),
        };

        Self {
            grid: *grid,
            uniforms,
        }
    }

    pub fn with_counts(mut self, light_count: u32, probe_count: u32) -> Self {
        self.uniforms.buffer.z = light_count;
        self.uniforms.buffer.w = probe_count;
        self
    }

    /// Record whether a depth buffer will be bound to the kernel
    pub fn with_depth(mut self, depth_bound: bool) -> Self {
        self.uniforms.flags.y = depth_bound as u32;
        self
    }
}

/// Pack the punctual lights into culling bounds, same order as the light buffer.
pub fn pack_culling_lights(lights: &[LightRecord], out: &mut Vec<GpuCullingLight>) {
    out.clear();
    out.extend(lights.iter().map(|light| match light.category {
        LightCategory::Spot => GpuCullingLight {
            bound: light.position.extend(light.range),
            axis_angle: light.direction.extend(light.outer_angle),
        },
        _ => GpuCullingLight::sphere(light.position, light.range),
    }));
}

pub fn pack_culling_probes(probes: &[VisibleReflectionProbe], out: &mut Vec<GpuCullingLight>) {
    out.clear();
    out.extend(
        probes
            .iter()
            .map(|probe| GpuCullingLight::sphere(probe.position, probe.influence_radius.max(0.0))),
    );
}

/// Read-only view over a tile index buffer read back from the GPU
#[derive(Debug, Clone, Copy)]
pub struct TileIndexBuffer<'a> {
    data: &'a [u32],
    per_tile_data_size: u32,
}

impl<'a> TileIndexBuffer<'a> {
    pub fn new(data: &'a [u32], per_tile_data_size: u32) -> Self {
        Self {
            data,
            per_tile_data_size: per_tile_data_size.max(1),
        }
    }

    pub fn tile_count(&self) -> usize {
        self.data.len() / self.per_tile_data_size as usize
    }

    /// Indices recorded for tile `tile`; empty past the end of the buffer.
    pub fn lights_in_tile(&self, tile: usize) -> &'a [u32] {
        let stride = self.per_tile_data_size as usize;
        let Some(start) = tile.checked_mul(stride) else {
            return &[];
        };
        let Some(record) = self.data.get(start..start.saturating_add(stride)) else {
            return &[];
        };
        let count = (record[0] as usize).min(stride - 1);
        &record[1..1 + count]
    }

    pub fn contains(&self, tile: usize, index: u32) -> bool {
        self.lights_in_tile(tile).contains(&index)
    }
}
