//! CPU reference of the tile culling kernel
//!
//! Runs the same tests as `cull_tiles` in [`super::shader`], one tile at a
//! time in index order. The CPU backend dispatches through here and tests
//! compare GPU readbacks against it.

use super::{GpuCullingLight, TileCullingUniforms};
use crate::shadows::projection::linearize_perspective_depth;
use glam::{Vec3, Vec4, Vec4Swizzles};

/// Depth buffer texels, row 0 at the top of the screen
#[derive(Debug, Clone, Copy)]
pub struct DepthView<'a> {
    pub width: u32,
    pub height: u32,
    pub texels: &'a [f32],
}

impl DepthView<'_> {
    fn texel(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.texels.get((y * self.width + x) as usize).copied()
    }
}

/// View-space frustum of one tile
#[derive(Debug, Clone, Copy)]
pub struct TileFrustum {
    /// Inward facing side planes through the eye: left, right, bottom, top
    pub planes: [Vec3; 4],
    /// Positive view distance range
    pub min_depth: f32,
    pub max_depth: f32,
    /// Near plane rectangle: x0, x1, y_bottom, y_top
    rect: Vec4,
    near: f32,
}

impl TileFrustum {
    pub fn new(uniforms: &TileCullingUniforms, tile_x: u32, tile_y: u32, min_depth: f32, max_depth: f32) -> Self {
        let bottom_left = uniforms.near_bottom_left;
        let footprint = uniforms.tile_footprint;
        let near = -bottom_left.z;

        // Tile rows count down from the top edge of the screen
        let x0 = bottom_left.x + tile_x as f32 * footprint.x;
        let x1 = x0 + footprint.x;
        let y_top = -bottom_left.y - tile_y as f32 * footprint.y;
        let y_bottom = y_top - footprint.y;

        let planes = [
            Vec3::new(near, 0.0, x0).normalize_or_zero(),
            Vec3::new(-near, 0.0, -x1).normalize_or_zero(),
            Vec3::new(0.0, near, y_bottom).normalize_or_zero(),
            Vec3::new(0.0, -near, -y_top).normalize_or_zero(),
        ];

        Self {
            planes,
            min_depth,
            max_depth,
            rect: Vec4::new(x0, x1, y_bottom, y_top),
            near,
        }
    }

    /// Conservative sphere test against the four sides and the depth range
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        if self.planes.iter().any(|plane| plane.dot(center) < -radius) {
            return false;
        }
        let depth = -center.z;
        !(depth + radius < self.min_depth || depth - radius > self.max_depth)
    }

    /// Sphere around the eight corners of the tile's depth slab
    pub fn bounding_sphere(&self) -> Vec4 {
        let mut corners = [Vec3::ZERO; 8];
        let mut i = 0;
        for depth in [self.min_depth, self.max_depth] {
            let scale = depth / self.near;
            for x in [self.rect.x, self.rect.y] {
                for y in [self.rect.z, self.rect.w] {
                    corners[i] = Vec3::new(x * scale, y * scale, -depth);
                    i += 1;
                }
            }
        }
        let center = corners.iter().copied().sum::<Vec3>() / 8.0;
        let radius = corners
            .iter()
            .map(|corner| corner.distance(center))
            .fold(0.0f32, f32::max);
        center.extend(radius)
    }
}

/// Cone against sphere, after Bart Wronski's "cull that cone"
pub fn cone_intersects_sphere(origin: Vec3, axis: Vec3, range: f32, half_angle: f32, sphere: Vec4) -> bool {
    let v = sphere.xyz() - origin;
    let v_len_sq = v.dot(v);
    let v1_len = v.dot(axis);
    let closest = half_angle.cos() * (v_len_sq - v1_len * v1_len).max(0.0).sqrt() - v1_len * half_angle.sin();

    let angle_cull = closest > sphere.w;
    let front_cull = v1_len > sphere.w + range;
    let back_cull = v1_len < -sphere.w;
    !(angle_cull || front_cull || back_cull)
}

fn tile_depth_range(uniforms: &TileCullingUniforms, depth: Option<&DepthView<'_>>, tile_x: u32, tile_y: u32) -> (f32, f32) {
    let (near, far) = (uniforms.near(), uniforms.far());
    let Some(depth) = depth.filter(|_| uniforms.split_depth()) else {
        return (near, far);
    };

    let tile_size = uniforms.grid.z;
    let x_start = tile_x * tile_size;
    let y_start = tile_y * tile_size;

    let mut min_depth = f32::MAX;
    let mut max_depth = 0.0f32;
    for y in y_start..(y_start + tile_size).min(uniforms.buffer.y) {
        for x in x_start..(x_start + tile_size).min(uniforms.buffer.x) {
            if let Some(device) = depth.texel(x, y) {
                let distance = linearize_perspective_depth(device, uniforms.depth_params).clamp(near, far);
                min_depth = min_depth.min(distance);
                max_depth = max_depth.max(distance);
            }
        }
    }

    if min_depth > max_depth {
        (near, far)
    } else {
        (min_depth, max_depth)
    }
}

fn light_touches_tile(uniforms: &TileCullingUniforms, frustum: &TileFrustum, light: &GpuCullingLight) -> bool {
    let center = uniforms.view.transform_point3(light.bound.xyz());
    let radius = light.bound.w;
    if !frustum.intersects_sphere(center, radius) {
        return false;
    }
    if !light.is_cone() {
        return true;
    }
    let axis = uniforms.view.transform_vector3(light.axis_angle.xyz()).normalize_or_zero();
    cone_intersects_sphere(center, axis, radius, light.axis_angle.w, frustum.bounding_sphere())
}

fn cull_list(
    uniforms: &TileCullingUniforms,
    items: &[GpuCullingLight],
    count: u32,
    depth: Option<&DepthView<'_>>,
    out: &mut [u32],
) {
    let per_tile = uniforms.per_tile_data_size() as usize;
    if per_tile < 2 {
        return;
    }
    let capacity = per_tile - 1;
    let items = &items[..items.len().min(count as usize)];

    for tile_y in 0..uniforms.grid.y {
        for tile_x in 0..uniforms.grid.x {
            let tile = (tile_y * uniforms.grid.x + tile_x) as usize;
            let Some(record) = out.get_mut(tile * per_tile..(tile + 1) * per_tile) else {
                continue;
            };

            let (min_depth, max_depth) = tile_depth_range(uniforms, depth, tile_x, tile_y);
            let frustum = TileFrustum::new(uniforms, tile_x, tile_y, min_depth, max_depth);

            let mut count = 0usize;
            for (index, item) in items.iter().enumerate() {
                if count >= capacity {
                    break;
                }
                if light_touches_tile(uniforms, &frustum, item) {
                    record[1 + count] = index as u32;
                    count += 1;
                }
            }
            record[0] = count as u32;
        }
    }
}

/// Fill the per-tile light index records in `out`.
pub fn cull_tiles(
    uniforms: &TileCullingUniforms,
    lights: &[GpuCullingLight],
    depth: Option<&DepthView<'_>>,
    out: &mut [u32],
) {
    cull_list(uniforms, lights, uniforms.light_count(), depth, out);
}

/// Fill the per-tile reflection probe index records in `out`.
pub fn cull_probe_tiles(
    uniforms: &TileCullingUniforms,
    probes: &[GpuCullingLight],
    depth: Option<&DepthView<'_>>,
    out: &mut [u32],
) {
    cull_list(uniforms, probes, uniforms.probe_count(), depth, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DepthConvention, LightingSettings};
    use crate::scene::{Camera, PerspectiveProjection};
    use crate::shadows::projection;
    use crate::tile_culling::{TileCullingSetup, TileGrid, TileIndexBuffer};
    use rstest::rstest;

    fn camera() -> Camera {
        Camera::new(Vec3::ZERO, Vec3::NEG_Z).with_projection(PerspectiveProjection::new(60.0, 1.0, 0.5, 100.0))
    }

    fn setup(grid: &TileGrid, settings: &LightingSettings, lights: u32) -> TileCullingUniforms {
        TileCullingSetup::new(&camera(), grid, settings)
            .with_counts(lights, 0)
            .uniforms
    }

    fn run(uniforms: &TileCullingUniforms, lights: &[GpuCullingLight], grid: &TileGrid, per_tile: u32) -> Vec<u32> {
        let mut out = vec![0xdead_beef; grid.index_buffer_len(per_tile)];
        cull_tiles(uniforms, lights, None, &mut out);
        out
    }

    #[test]
    fn no_lights_writes_zero_headers() {
        let settings = LightingSettings::default();
        let grid = TileGrid::new(50, 40, 16);
        let uniforms = setup(&grid, &settings, 0);
        let out = run(&uniforms, &[], &grid, settings.per_tile_data_size);

        let view = TileIndexBuffer::new(&out, settings.per_tile_data_size);
        assert_eq!(view.tile_count(), grid.tile_count() as usize);
        for tile in 0..view.tile_count() {
            assert!(view.lights_in_tile(tile).is_empty());
        }
    }

    #[test]
    fn light_behind_camera_is_in_no_tile() {
        let settings = LightingSettings::default();
        let grid = TileGrid::new(64, 64, 16);
        let uniforms = setup(&grid, &settings, 1);
        let lights = [GpuCullingLight::sphere(Vec3::new(0.0, 0.0, 10.0), 2.0)];
        let out = run(&uniforms, &lights, &grid, settings.per_tile_data_size);

        let view = TileIndexBuffer::new(&out, settings.per_tile_data_size);
        assert!((0..view.tile_count()).all(|tile| !view.contains(tile, 0)));
    }

    #[test]
    fn light_containing_frustum_is_in_every_tile() {
        let settings = LightingSettings::default();
        let grid = TileGrid::new(100, 70, 16);
        let uniforms = setup(&grid, &settings, 1);
        let lights = [GpuCullingLight::sphere(Vec3::new(0.0, 0.0, -50.0), 500.0)];
        let out = run(&uniforms, &lights, &grid, settings.per_tile_data_size);

        let view = TileIndexBuffer::new(&out, settings.per_tile_data_size);
        assert!((0..view.tile_count()).all(|tile| view.lights_in_tile(tile) == [0]));
    }

    #[test]
    fn off_center_light_only_hits_its_side() {
        let settings = LightingSettings::default();
        let grid = TileGrid::new(64, 64, 16);
        let uniforms = setup(&grid, &settings, 1);
        // Well to the right of the view axis, near the top
        let lights = [GpuCullingLight::sphere(Vec3::new(8.0, 8.0, -20.0), 1.0)];
        let out = run(&uniforms, &lights, &grid, settings.per_tile_data_size);

        let view = TileIndexBuffer::new(&out, settings.per_tile_data_size);
        let top_right = (grid.tiles_x - 1) as usize;
        let bottom_left = ((grid.tiles_y - 1) * grid.tiles_x) as usize;
        assert!(view.contains(top_right, 0));
        assert!(!view.contains(bottom_left, 0));
    }

    #[test]
    fn overflow_never_spills_into_neighbors() {
        let settings = LightingSettings {
            per_tile_data_size: 8,
            ..Default::default()
        };
        let grid = TileGrid::new(48, 16, 16);
        let lights: Vec<_> = (0..20)
            .map(|i| GpuCullingLight::sphere(Vec3::new(0.0, 0.0, -10.0 - i as f32), 1000.0))
            .collect();
        let uniforms = setup(&grid, &settings, lights.len() as u32);
        let out = run(&uniforms, &lights, &grid, 8);

        for tile in 0..grid.tile_count() as usize {
            let record = &out[tile * 8..(tile + 1) * 8];
            assert_eq!(record[0], 7);
            assert_eq!(&record[1..], &[0, 1, 2, 3, 4, 5, 6]);
        }
    }

    #[test]
    fn short_output_buffer_skips_tiles() {
        let settings = LightingSettings::default();
        let grid = TileGrid::new(64, 16, 16);
        let uniforms = setup(&grid, &settings, 1);
        let lights = [GpuCullingLight::sphere(Vec3::new(0.0, 0.0, -5.0), 100.0)];
        let mut out = vec![0u32; 64 * 2 + 10];
        cull_tiles(&uniforms, &lights, None, &mut out);
        assert_eq!(out[0], 1);
        assert_eq!(out[64], 1);
        assert!(out[128..].iter().all(|&v| v == 0));
    }

    #[test]
    fn spot_pointing_away_is_culled() {
        let settings = LightingSettings::default();
        let grid = TileGrid::new(32, 32, 16);
        let uniforms = setup(&grid, &settings, 2);
        let position = Vec3::new(0.0, 0.0, -10.0);
        let lights = [
            GpuCullingLight {
                bound: position.extend(6.0),
                axis_angle: Vec3::NEG_Z.extend(0.3),
            },
            GpuCullingLight {
                bound: position.extend(6.0),
                axis_angle: Vec3::Z.extend(0.3),
            },
        ];
        let out = run(&uniforms, &lights, &grid, settings.per_tile_data_size);
        let view = TileIndexBuffer::new(&out, settings.per_tile_data_size);

        // Pointing away from the camera the cone still covers the center tiles
        assert!((0..4).any(|tile| view.contains(tile, 0)));
        assert!((0..4).any(|tile| view.contains(tile, 1)));

        // With a shallow frustum a cone pointing right misses the left column
        let shallow = Camera::new(Vec3::ZERO, Vec3::NEG_Z)
            .with_projection(PerspectiveProjection::new(60.0, 1.0, 0.5, 10.0));
        let uniforms = TileCullingSetup::new(&shallow, &grid, &settings)
            .with_counts(1, 0)
            .uniforms;
        let sideways = [GpuCullingLight {
            bound: Vec3::new(8.0, 0.0, -5.0).extend(30.0),
            axis_angle: Vec3::X.extend(0.2),
        }];
        let out = run(&uniforms, &sideways, &grid, settings.per_tile_data_size);
        let view = TileIndexBuffer::new(&out, settings.per_tile_data_size);
        assert!(!view.contains(0, 0));
        assert!(!view.contains(2, 0));
        assert!(view.contains(1, 0));
        assert!(view.contains(3, 0));
    }

    #[rstest]
    #[case::standard(DepthConvention::Standard)]
    #[case::reversed(DepthConvention::ReversedZ)]
    fn split_depth_rejects_light_in_front_of_geometry(#[case] convention: DepthConvention) {
        let settings = LightingSettings {
            depth_convention: convention,
            ..Default::default()
        };
        let grid = TileGrid::new(16, 16, 16);
        let uniforms = TileCullingSetup::new(&camera(), &grid, &settings)
            .with_counts(2, 0)
            .with_depth(true)
            .uniforms;

        // A wall at distance 40 fills the tile
        let projection = projection::perspective(60f32.to_radians(), 1.0, 0.5, 100.0, convention);
        let clip = projection * Vec4::new(0.0, 0.0, -40.0, 1.0);
        let texels = vec![clip.z / clip.w; 16 * 16];
        let depth = DepthView {
            width: 16,
            height: 16,
            texels: &texels,
        };

        let lights = [
            GpuCullingLight::sphere(Vec3::new(0.0, 0.0, -5.0), 1.0),
            GpuCullingLight::sphere(Vec3::new(0.0, 0.0, -40.0), 1.0),
        ];
        let mut out = vec![0u32; 64];
        cull_tiles(&uniforms, &lights, Some(&depth), &mut out);
        assert_eq!(&out[..2], &[1, 1]);

        // Without the depth buffer both lights survive
        let mut out = vec![0u32; 64];
        cull_tiles(&uniforms, &lights, None, &mut out);
        assert_eq!(&out[..3], &[2, 0, 1]);
    }

    #[test]
    fn cone_test_matches_obvious_cases() {
        let sphere_ahead = Vec4::new(0.0, 0.0, -5.0, 0.5);
        assert!(cone_intersects_sphere(Vec3::ZERO, Vec3::NEG_Z, 10.0, 0.2, sphere_ahead));
        assert!(!cone_intersects_sphere(Vec3::ZERO, Vec3::Z, 10.0, 0.2, sphere_ahead));
        assert!(!cone_intersects_sphere(Vec3::ZERO, Vec3::NEG_Z, 3.0, 0.2, sphere_ahead));
    }
}
