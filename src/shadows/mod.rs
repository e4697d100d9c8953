//! Shadow atlas planning
//!
//! Turns the collector's shadow casting lights into per-slice view and
//! projection matrices and describes the depth atlas each category renders
//! into. Sun cascades and spot lights use 2D array atlases, point lights use a
//! cube array with six layers per light. A category with nothing to render
//! gets no atlas and a zeroed uniform block.

pub mod cascades;
mod gpu;
pub mod projection;

pub use gpu::*;

use crate::backend::types::{TextureDescriptor, TextureDimension, TextureFormat, TextureUsage};
use crate::config::{LightingSettings, ShadowQuality, K_MAX_CASCADE_COUNT};
use crate::lighting::{LightCollector, LightRecord};
use crate::scene::Camera;
use bytemuck::Zeroable;
use glam::{Mat4, Vec4};

/// Widest spot cone a single perspective slice can cover
const MAX_SPOT_FOV: f32 = std::f32::consts::PI - 0.01;
const MIN_SPOT_FOV: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowCategory {
    Sun,
    Spot,
    Point,
}

impl ShadowCategory {
    pub fn sub_views_per_light(&self, cascade_count: u32) -> u32 {
        match self {
            ShadowCategory::Sun => cascade_count.clamp(1, K_MAX_CASCADE_COUNT as u32),
            ShadowCategory::Spot => 1,
            ShadowCategory::Point => 6,
        }
    }

    pub fn dimension(&self) -> TextureDimension {
        match self {
            ShadowCategory::Sun | ShadowCategory::Spot => TextureDimension::D2Array,
            ShadowCategory::Point => TextureDimension::CubeArray,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ShadowCategory::Sun => "Sun Shadow Atlas",
            ShadowCategory::Spot => "Spot Shadow Atlas",
            ShadowCategory::Point => "Point Shadow Atlas",
        }
    }
}

/// Depth atlas description for one category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowAtlasDesc {
    pub category: ShadowCategory,
    /// Square slice edge in texels
    pub resolution: u32,
    /// `shadowing lights * sub-views per light`
    pub layers: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
}

impl ShadowAtlasDesc {
    pub fn texture_descriptor(&self) -> TextureDescriptor {
        TextureDescriptor {
            label: Some(self.category.label().to_string()),
            width: self.resolution,
            height: self.resolution,
            layers: self.layers,
            dimension: self.dimension,
            format: self.format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        }
    }
}

/// One rendered slice of a shadow atlas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSubView {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    /// World space to `(u, v, depth)` in the slice
    pub world_to_shadow_uv: Mat4,
    /// Constants to linearize the slice's depth
    pub depth_params: Vec4,
    /// Cascades only: xyz = world center, w = radius
    pub culling_sphere: Vec4,
}

impl ShadowSubView {
    pub fn new(view: Mat4, projection: Mat4, depth_params: Vec4) -> Self {
        let view_projection = projection * view;
        Self {
            view,
            projection,
            view_projection,
            world_to_shadow_uv: projection::clip_to_uv() * view_projection,
            depth_params,
            culling_sphere: Vec4::ZERO,
        }
    }
}

/// Plan for one shadow category.
///
/// Sub-views are light-major: slot `s` owns layers
/// `s * sub_views_per_light .. (s + 1) * sub_views_per_light`.
#[derive(Debug, Clone, Default)]
pub struct ShadowCategoryPlan {
    pub atlas: Option<ShadowAtlasDesc>,
    pub sub_views: Vec<ShadowSubView>,
    /// Index into the collector's punctual list per slot (0 for the sun)
    pub light_indices: Vec<usize>,
    pub qualities: Vec<ShadowQuality>,
}

impl ShadowCategoryPlan {
    pub fn created(&self) -> bool {
        self.atlas.is_some()
    }

    pub fn shadowing_count(&self) -> usize {
        self.light_indices.len()
    }

    fn clear(&mut self) {
        self.atlas = None;
        self.sub_views.clear();
        self.light_indices.clear();
        self.qualities.clear();
    }

    fn info(&self) -> Vec4 {
        match &self.atlas {
            Some(atlas) => Vec4::new(
                1.0,
                self.shadowing_count() as f32,
                atlas.resolution as f32,
                1.0 / atlas.resolution as f32,
            ),
            None => Vec4::ZERO,
        }
    }
}

fn quality_vector(quality: &ShadowQuality) -> Vec4 {
    Vec4::new(
        quality.depth_bias,
        quality.normal_bias,
        quality.penumbra,
        quality.sample_count as f32,
    )
}

/// Shadow plan of one frame
#[derive(Debug, Clone, Default)]
pub struct ShadowPlan {
    pub sun: ShadowCategoryPlan,
    pub spot: ShadowCategoryPlan,
    pub point: ShadowCategoryPlan,
}

impl ShadowPlan {
    pub fn category(&self, category: ShadowCategory) -> &ShadowCategoryPlan {
        match category {
            ShadowCategory::Sun => &self.sun,
            ShadowCategory::Spot => &self.spot,
            ShadowCategory::Point => &self.point,
        }
    }

    pub fn gpu_sun_data(&self) -> GpuSunShadowData {
        let mut data = GpuSunShadowData::zeroed();
        if !self.sun.created() {
            return data;
        }
        for (cascade, sub_view) in self.sun.sub_views.iter().enumerate().take(K_MAX_CASCADE_COUNT) {
            data.world_to_shadow[cascade] = sub_view.world_to_shadow_uv;
            data.culling_spheres[cascade] = sub_view.culling_sphere;
            data.depth_params[cascade] = sub_view.depth_params;
        }
        if let Some(quality) = self.sun.qualities.first() {
            data.bias = quality_vector(quality);
        }
        data.info = self.sun.info();
        // The sun has a single slot; report the cascade count instead
        data.info.y = self.sun.sub_views.len() as f32;
        data
    }

    pub fn gpu_spot_data(&self) -> GpuSpotShadowData {
        let mut data = GpuSpotShadowData::zeroed();
        if !self.spot.created() {
            return data;
        }
        for (slot, sub_view) in self.spot.sub_views.iter().enumerate().take(data.world_to_shadow.len()) {
            data.world_to_shadow[slot] = sub_view.world_to_shadow_uv;
            data.depth_params[slot] = sub_view.depth_params;
        }
        for (slot, quality) in self.spot.qualities.iter().enumerate().take(data.bias.len()) {
            data.bias[slot] = quality_vector(quality);
        }
        data.info = self.spot.info();
        data
    }

    pub fn gpu_point_data(&self) -> GpuPointShadowData {
        let mut data = GpuPointShadowData::zeroed();
        if !self.point.created() {
            return data;
        }
        for (face, sub_view) in self.point.sub_views.iter().enumerate().take(data.world_to_shadow.len()) {
            data.world_to_shadow[face] = sub_view.world_to_shadow_uv;
        }
        for (slot, sub_views) in self.point.sub_views.chunks(6).enumerate().take(data.depth_params.len()) {
            data.depth_params[slot] = sub_views[0].depth_params;
        }
        for (slot, quality) in self.point.qualities.iter().enumerate().take(data.bias.len()) {
            data.bias[slot] = quality_vector(quality);
        }
        data.info = self.point.info();
        data
    }
}

/// Plans shadow atlases every frame, reusing its arrays
#[derive(Debug, Default)]
pub struct ShadowAtlasPlanner {
    plan: ShadowPlan,
}

impl ShadowAtlasPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent plan
    pub fn current(&self) -> &ShadowPlan {
        &self.plan
    }

    pub fn plan(
        &mut self,
        collector: &LightCollector,
        camera: &Camera,
        settings: &LightingSettings,
    ) -> &ShadowPlan {
        self.plan.sun.clear();
        self.plan.spot.clear();
        self.plan.point.clear();

        self.plan_sun(collector, camera, settings);
        self.plan_spots(collector, settings);
        self.plan_points(collector, settings);

        log::trace!(
            "Shadow plan: sun {} slices, spot {} slices, point {} slices",
            self.plan.sun.sub_views.len(),
            self.plan.spot.sub_views.len(),
            self.plan.point.sub_views.len()
        );
        &self.plan
    }

    fn plan_sun(&mut self, collector: &LightCollector, camera: &Camera, settings: &LightingSettings) {
        let Some(sun) = collector.sun().filter(|sun| sun.shadow_slot.is_some()) else {
            return;
        };
        let plan = &mut self.plan.sun;
        let cascade_count = ShadowCategory::Sun.sub_views_per_light(settings.cascade_count);

        let projection = camera.projection.sanitized();
        let shadow_distance = if settings.max_shadow_distance.is_finite() {
            settings.max_shadow_distance.min(projection.far)
        } else {
            projection.far
        };
        let splits = cascades::split_distances(
            projection.near,
            shadow_distance,
            &settings.cascade_split_ratios,
            cascade_count as usize,
        );

        let input = cascades::CascadeInput {
            camera,
            light_direction: sun.direction,
            caster_bounds: &sun.shadow_caster_bounds,
            resolution: settings.sun_shadow_map_size,
            convention: settings.depth_convention,
        };
        cascades::fit_cascades(&input, &splits, &mut plan.sub_views);

        plan.light_indices.push(0);
        plan.qualities.push(sun.shadow_quality);
        plan.atlas = Some(ShadowAtlasDesc {
            category: ShadowCategory::Sun,
            resolution: settings.sun_shadow_map_size.max(1),
            layers: cascade_count,
            dimension: ShadowCategory::Sun.dimension(),
            format: TextureFormat::Depth32Float,
        });
    }

    fn plan_spots(&mut self, collector: &LightCollector, settings: &LightingSettings) {
        let plan = &mut self.plan.spot;
        let convention = settings.depth_convention;
        let spots = collector.shadowing_spot_indices().iter().zip(collector.shadowing_spot_lights());
        for (&index, light) in spots {
            let (near, far) = punctual_depth_range(light, settings);
            let fov = (2.0 * light.outer_angle).clamp(MIN_SPOT_FOV, MAX_SPOT_FOV);
            let view = projection::look_along(light.position, light.direction);
            let proj = projection::perspective(fov, 1.0, near, far, convention);

            plan.sub_views.push(ShadowSubView::new(
                view,
                proj,
                projection::perspective_depth_params(near, far, convention),
            ));
            plan.light_indices.push(index);
            plan.qualities.push(light.shadow_quality);
        }
        if !plan.light_indices.is_empty() {
            plan.atlas = Some(ShadowAtlasDesc {
                category: ShadowCategory::Spot,
                resolution: settings.spot_shadow_map_size.max(1),
                layers: plan.light_indices.len() as u32,
                dimension: ShadowCategory::Spot.dimension(),
                format: TextureFormat::Depth32Float,
            });
        }
    }

    fn plan_points(&mut self, collector: &LightCollector, settings: &LightingSettings) {
        let plan = &mut self.plan.point;
        let convention = settings.depth_convention;
        let points = collector.shadowing_point_indices().iter().zip(collector.shadowing_point_lights());
        for (&index, light) in points {
            let (near, far) = punctual_depth_range(light, settings);
            let proj = projection::perspective(std::f32::consts::FRAC_PI_2, 1.0, near, far, convention);
            let depth_params = projection::perspective_depth_params(near, far, convention);

            for face in 0..6 {
                plan.sub_views.push(ShadowSubView::new(
                    projection::cube_face_view(light.position, face),
                    proj,
                    depth_params,
                ));
            }
            plan.light_indices.push(index);
            plan.qualities.push(light.shadow_quality);
        }
        if !plan.light_indices.is_empty() {
            plan.atlas = Some(ShadowAtlasDesc {
                category: ShadowCategory::Point,
                resolution: settings.point_shadow_map_size.max(1),
                layers: plan.light_indices.len() as u32 * 6,
                dimension: ShadowCategory::Point.dimension(),
                format: TextureFormat::Depth32Float,
            });
        }
    }
}

fn punctual_depth_range(light: &LightRecord, settings: &LightingSettings) -> (f32, f32) {
    let far = light.range;
    let near = settings.punctual_shadow_near_plane.min(far * 0.5).max(f32::EPSILON);
    (near, far)
}
