//! Light collection
//!
//! Classifies the visibility list into the sun and a capped punctual pool and
//! decides which lights get one of the limited shadow slots. A single pass in
//! visibility-list order, so the kept lights are always a prefix of the input
//! for each category and slot numbers are dense.

use super::gpu::*;
use bytemuck::Zeroable;
use crate::config::{
    LightingSettings, ShadowQuality, K_MAX_PUNCTUAL_LIGHT_COUNT, K_MAX_REFLECTION_PROBE_COUNT,
    K_MAX_SHADOWING_POINT_LIGHT_COUNT, K_MAX_SHADOWING_SPOT_LIGHT_COUNT,
};
use crate::scene::{Aabb, LightKind, VisibleLight, VisibleReflectionProbe};
use glam::{Vec3, Vec4};

/// Spot cones narrower than this get a minimum angular falloff width.
const MIN_SPOT_FALLOFF: f32 = 1.0e-4;
const MIN_RANGE: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightCategory {
    Sun,
    Point,
    Spot,
}

/// A collected light
#[derive(Debug, Clone, PartialEq)]
pub struct LightRecord {
    pub category: LightCategory,
    /// rgb = color * intensity, a = shadow strength / skipped / disabled
    pub color: Vec4,
    pub position: Vec3,
    pub direction: Vec3,
    pub range: f32,
    pub inner_angle: f32,
    pub outer_angle: f32,
    /// Dense index within the category's shadow pool
    pub shadow_slot: Option<u32>,
    /// Position in the visibility list this record came from
    pub visible_index: usize,
    pub shadow_quality: ShadowQuality,
    pub shadow_caster_bounds: Aabb,
}

impl LightRecord {
    fn from_visible(
        light: &VisibleLight,
        visible_index: usize,
        shadow_slot: Option<u32>,
        default_quality: &ShadowQuality,
    ) -> Self {
        let (category, inner_angle, outer_angle) = match light.kind {
            LightKind::Directional => (LightCategory::Sun, 0.0, 0.0),
            LightKind::Point => (LightCategory::Point, 0.0, 0.0),
            LightKind::Spot {
                inner_angle,
                outer_angle,
            } => {
                let outer = outer_angle.clamp(0.0, std::f32::consts::FRAC_PI_2);
                (LightCategory::Spot, inner_angle.clamp(0.0, outer), outer)
            }
        };

        let alpha = match shadow_slot {
            Some(_) => light.shadow_strength.min(1.0),
            None if light.shadows_enabled => ALPHA_SHADOW_SKIPPED,
            None => ALPHA_SHADOWS_DISABLED,
        };

        Self {
            category,
            color: (light.color * light.intensity).extend(alpha),
            position: light.position,
            direction: light.direction.try_normalize().unwrap_or(Vec3::NEG_Y),
            range: light.range.max(MIN_RANGE),
            inner_angle,
            outer_angle,
            shadow_slot,
            visible_index,
            shadow_quality: light.shadow_quality.unwrap_or(*default_quality),
            shadow_caster_bounds: light.shadow_caster_bounds,
        }
    }

    /// Angular attenuation as `saturate(cos * scale + offset)`
    pub fn spot_scale_offset(&self) -> (f32, f32) {
        match self.category {
            LightCategory::Spot => {
                let cos_outer = self.outer_angle.cos();
                let cos_inner = self.inner_angle.cos();
                let scale = 1.0 / (cos_inner - cos_outer).max(MIN_SPOT_FALLOFF);
                (scale, -cos_outer * scale)
            }
            _ => (0.0, 1.0),
        }
    }

    pub fn to_gpu_punctual(&self) -> GpuPunctualLight {
        let slot = self.shadow_slot.map_or(-1.0, |slot| slot as f32);
        let kind = match self.category {
            LightCategory::Spot => PUNCTUAL_KIND_SPOT,
            _ => PUNCTUAL_KIND_POINT,
        };
        let (scale, offset) = self.spot_scale_offset();
        GpuPunctualLight {
            color: self.color,
            position: self.position.extend(slot),
            direction: self.direction.extend(kind),
            params: Vec4::new(
                self.range,
                1.0 / (self.range * self.range),
                scale,
                offset,
            ),
        }
    }
}

/// Per-frame counts of what the collector kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightCounts {
    pub sun: bool,
    pub sun_shadowing: bool,
    pub punctual: u32,
    pub point: u32,
    pub spot: u32,
    pub shadowing_point: u32,
    pub shadowing_spot: u32,
    pub reflection_probes: u32,
}

/// What the collector dropped this frame.
///
/// Purely informational: dropping is silent and these never change what is
/// collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DropCounters {
    pub punctual_lights: u32,
    pub point_shadows: u32,
    pub spot_shadows: u32,
    pub extra_suns: u32,
    pub reflection_probes: u32,
}

impl DropCounters {
    pub fn any(&self) -> bool {
        *self != Self::default()
    }
}

/// Frame-local light arrays, cleared and refilled every frame
pub struct LightCollector {
    sun: Option<LightRecord>,
    punctual: Vec<LightRecord>,
    gpu_punctual: Vec<GpuPunctualLight>,
    /// Indices into `punctual`, in slot order
    shadowing_point: Vec<usize>,
    shadowing_spot: Vec<usize>,
    probes: Vec<VisibleReflectionProbe>,
    drops: DropCounters,
}

impl LightCollector {
    pub fn new(settings: &LightingSettings) -> Self {
        let punctual = settings.max_punctual_lights.min(K_MAX_PUNCTUAL_LIGHT_COUNT);
        Self {
            sun: None,
            punctual: Vec::with_capacity(punctual),
            gpu_punctual: Vec::with_capacity(punctual),
            shadowing_point: Vec::with_capacity(K_MAX_SHADOWING_POINT_LIGHT_COUNT),
            shadowing_spot: Vec::with_capacity(K_MAX_SHADOWING_SPOT_LIGHT_COUNT),
            probes: Vec::with_capacity(K_MAX_REFLECTION_PROBE_COUNT),
            drops: DropCounters::default(),
        }
    }

    fn reset(&mut self) {
        self.sun = None;
        self.punctual.clear();
        self.gpu_punctual.clear();
        self.shadowing_point.clear();
        self.shadowing_spot.clear();
        self.probes.clear();
        self.drops = DropCounters::default();
    }

    /// Rebuild the frame's light arrays from the visibility lists.
    pub fn collect(
        &mut self,
        visible_lights: &[VisibleLight],
        visible_probes: &[VisibleReflectionProbe],
        settings: &LightingSettings,
    ) {
        self.reset();

        let max_punctual = settings.max_punctual_lights.min(K_MAX_PUNCTUAL_LIGHT_COUNT);
        let max_point_shadows = settings
            .max_shadowing_point_lights
            .min(K_MAX_SHADOWING_POINT_LIGHT_COUNT);
        let max_spot_shadows = settings
            .max_shadowing_spot_lights
            .min(K_MAX_SHADOWING_SPOT_LIGHT_COUNT);
        let default_quality = &settings.default_shadow_quality;

        for (visible_index, light) in visible_lights.iter().enumerate() {
            match light.kind {
                LightKind::Directional => {
                    if self.sun.is_some() {
                        self.drops.extra_suns += 1;
                        continue;
                    }
                    let slot = light.wants_shadows().then_some(0);
                    self.sun = Some(LightRecord::from_visible(
                        light,
                        visible_index,
                        slot,
                        default_quality,
                    ));
                }
                LightKind::Point | LightKind::Spot { .. } => {
                    if self.punctual.len() >= max_punctual {
                        self.drops.punctual_lights += 1;
                        continue;
                    }

                    let is_spot = matches!(light.kind, LightKind::Spot { .. });
                    let (pool, capacity, dropped) = if is_spot {
                        (
                            &mut self.shadowing_spot,
                            max_spot_shadows,
                            &mut self.drops.spot_shadows,
                        )
                    } else {
                        (
                            &mut self.shadowing_point,
                            max_point_shadows,
                            &mut self.drops.point_shadows,
                        )
                    };

                    let mut slot = None;
                    if light.wants_shadows() {
                        if pool.len() < capacity {
                            slot = Some(pool.len() as u32);
                            pool.push(self.punctual.len());
                        } else {
                            *dropped += 1;
                        }
                    }

                    let record = LightRecord::from_visible(light, visible_index, slot, default_quality);
                    self.gpu_punctual.push(record.to_gpu_punctual());
                    self.punctual.push(record);
                }
            }
        }

        let max_probes = settings
            .max_reflection_probes
            .min(K_MAX_REFLECTION_PROBE_COUNT);
        let kept = visible_probes.len().min(max_probes);
        self.probes.extend_from_slice(&visible_probes[..kept]);
        self.drops.reflection_probes = (visible_probes.len() - kept) as u32;

        if self.drops.any() {
            log::debug!("Light collection over capacity: {:?}", self.drops);
        }
        log::trace!("Collected lights: {:?}", self.counts());
    }

    pub fn sun(&self) -> Option<&LightRecord> {
        self.sun.as_ref()
    }

    pub fn punctual_lights(&self) -> &[LightRecord] {
        &self.punctual
    }

    pub fn gpu_punctual_lights(&self) -> &[GpuPunctualLight] {
        &self.gpu_punctual
    }

    /// Sun uniform; all zero when there is no directional light.
    pub fn gpu_sun_light(&self) -> GpuSunLight {
        let Some(sun) = &self.sun else {
            return GpuSunLight::zeroed();
        };
        let quality = &sun.shadow_quality;
        GpuSunLight {
            color: sun.color,
            direction: sun
                .direction
                .extend(if sun.shadow_slot.is_some() { 1.0 } else { 0.0 }),
            shadow_color: Vec3::from_array(quality.shadow_color).extend(0.0),
            shadow_bias: Vec4::new(
                quality.depth_bias,
                quality.normal_bias,
                quality.penumbra,
                quality.sample_count as f32,
            ),
        }
    }

    /// Shadow casting point lights in slot order
    pub fn shadowing_point_lights(&self) -> impl Iterator<Item = &LightRecord> + '_ {
        self.shadowing_point.iter().map(|&index| &self.punctual[index])
    }

    /// Shadow casting spot lights in slot order
    pub fn shadowing_spot_lights(&self) -> impl Iterator<Item = &LightRecord> + '_ {
        self.shadowing_spot.iter().map(|&index| &self.punctual[index])
    }

    /// Positions in [`Self::punctual_lights`] of the shadow casting point lights, in slot order
    pub fn shadowing_point_indices(&self) -> &[usize] {
        &self.shadowing_point
    }

    /// Positions in [`Self::punctual_lights`] of the shadow casting spot lights, in slot order
    pub fn shadowing_spot_indices(&self) -> &[usize] {
        &self.shadowing_spot
    }

    pub fn reflection_probes(&self) -> &[VisibleReflectionProbe] {
        &self.probes
    }

    pub fn drop_counters(&self) -> &DropCounters {
        &self.drops
    }

    pub fn counts(&self) -> LightCounts {
        let spot = self
            .punctual
            .iter()
            .filter(|light| light.category == LightCategory::Spot)
            .count() as u32;
        LightCounts {
            sun: self.sun.is_some(),
            sun_shadowing: self.sun.as_ref().is_some_and(|s| s.shadow_slot.is_some()),
            punctual: self.punctual.len() as u32,
            point: self.punctual.len() as u32 - spot,
            spot,
            shadowing_point: self.shadowing_point.len() as u32,
            shadowing_spot: self.shadowing_spot.len() as u32,
            reflection_probes: self.probes.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caster_bounds() -> Aabb {
        Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(10.0))
    }

    fn point(i: usize) -> VisibleLight {
        VisibleLight::point(Vec3::new(i as f32, 0.0, 0.0), Vec3::ONE, 1.0, 5.0)
    }

    fn spot(i: usize) -> VisibleLight {
        VisibleLight::spot(
            Vec3::new(0.0, i as f32, 0.0),
            Vec3::NEG_Y,
            Vec3::ONE,
            2.0,
            8.0,
            0.3,
            0.5,
        )
    }

    #[test]
    fn empty_visibility_list() {
        let settings = LightingSettings::default();
        let mut collector = LightCollector::new(&settings);
        collector.collect(&[], &[], &settings);

        assert_eq!(collector.counts(), LightCounts::default());
        assert!(collector.sun().is_none());
        assert_eq!(collector.gpu_sun_light(), GpuSunLight::zeroed());
        assert!(!collector.drop_counters().any());
    }

    #[test]
    fn only_first_directional_is_kept() {
        let settings = LightingSettings::default();
        let mut collector = LightCollector::new(&settings);
        let lights = vec![
            point(0),
            VisibleLight::directional(Vec3::NEG_Y, Vec3::ONE, 3.0),
            VisibleLight::directional(Vec3::X, Vec3::ONE, 1.0),
        ];
        collector.collect(&lights, &[], &settings);

        let sun = collector.sun().unwrap();
        assert_eq!(sun.visible_index, 1);
        assert_eq!(sun.direction, Vec3::NEG_Y);
        assert_eq!(collector.drop_counters().extra_suns, 1);
        assert_eq!(collector.counts().punctual, 1);
    }

    #[test]
    fn punctual_pool_keeps_a_prefix() {
        let settings = LightingSettings {
            max_punctual_lights: 3,
            ..Default::default()
        };
        let mut collector = LightCollector::new(&settings);
        let lights: Vec<_> = (0..6).map(|i| if i % 2 == 0 { point(i) } else { spot(i) }).collect();
        collector.collect(&lights, &[], &settings);

        let kept: Vec<_> = collector
            .punctual_lights()
            .iter()
            .map(|l| l.visible_index)
            .collect();
        assert_eq!(kept, vec![0, 1, 2]);
        assert_eq!(collector.drop_counters().punctual_lights, 3);
        assert_eq!(collector.gpu_punctual_lights().len(), 3);
    }

    #[test]
    fn shadow_slots_are_dense_per_category() {
        let settings = LightingSettings::default();
        let mut collector = LightCollector::new(&settings);
        let lights: Vec<_> = (0..12)
            .map(|i| {
                let light = if i % 3 == 0 { spot(i) } else { point(i) };
                light.with_shadows(1.0, caster_bounds())
            })
            .collect();
        collector.collect(&lights, &[], &settings);

        let point_slots: Vec<_> = collector
            .shadowing_point_lights()
            .map(|l| l.shadow_slot.unwrap())
            .collect();
        let spot_slots: Vec<_> = collector
            .shadowing_spot_lights()
            .map(|l| l.shadow_slot.unwrap())
            .collect();
        assert_eq!(point_slots, vec![0, 1, 2, 3]);
        assert_eq!(spot_slots, vec![0, 1, 2, 3]);
        // 8 point lights asked for shadows, 4 got one
        assert_eq!(collector.drop_counters().point_shadows, 4);
        assert_eq!(collector.drop_counters().spot_shadows, 0);
    }

    #[test]
    fn over_capacity_shadow_caster_still_renders() {
        let settings = LightingSettings {
            max_shadowing_point_lights: 1,
            ..Default::default()
        };
        let mut collector = LightCollector::new(&settings);
        let lights = vec![
            point(0).with_shadows(0.8, caster_bounds()),
            point(1).with_shadows(0.8, caster_bounds()),
            point(2),
        ];
        collector.collect(&lights, &[], &settings);

        let gpu = collector.gpu_punctual_lights();
        assert_eq!(gpu.len(), 3);
        assert_eq!(gpu[0].position.w, 0.0);
        assert_eq!(gpu[0].color.w, 0.8);
        assert_eq!(gpu[1].position.w, -1.0);
        assert_eq!(gpu[1].color.w, ALPHA_SHADOW_SKIPPED);
        assert_eq!(gpu[2].color.w, ALPHA_SHADOWS_DISABLED);
    }

    #[test]
    fn ineligible_lights_do_not_consume_slots() {
        let settings = LightingSettings::default();
        let mut collector = LightCollector::new(&settings);
        let lights = vec![
            point(0).with_shadows(0.0, caster_bounds()),
            point(1).with_shadows(1.0, Aabb::EMPTY),
            point(2).with_shadows(1.0, caster_bounds()),
        ];
        collector.collect(&lights, &[], &settings);

        let shadowing: Vec<_> = collector.shadowing_point_lights().collect();
        assert_eq!(shadowing.len(), 1);
        assert_eq!(shadowing[0].visible_index, 2);
        assert_eq!(shadowing[0].shadow_slot, Some(0));
        assert!(!collector.drop_counters().any());
    }

    #[test]
    fn collection_is_idempotent() {
        let settings = LightingSettings::default();
        let mut collector = LightCollector::new(&settings);
        let lights: Vec<_> = (0..20)
            .map(|i| spot(i).with_shadows(0.5, caster_bounds()))
            .chain(std::iter::once(
                VisibleLight::directional(Vec3::new(1.0, -1.0, 0.0), Vec3::ONE, 2.0)
                    .with_shadows(1.0, caster_bounds()),
            ))
            .collect();

        collector.collect(&lights, &[], &settings);
        let first: Vec<u8> = bytemuck::cast_slice(collector.gpu_punctual_lights()).to_vec();
        let first_sun = collector.gpu_sun_light();

        collector.collect(&lights, &[], &settings);
        let second: &[u8] = bytemuck::cast_slice(collector.gpu_punctual_lights());
        assert_eq!(first.as_slice(), second);
        assert_eq!(first_sun, collector.gpu_sun_light());
    }

    #[test]
    fn sun_shadow_flag_and_quality() {
        let settings = LightingSettings::default();
        let mut collector = LightCollector::new(&settings);
        let quality = ShadowQuality {
            sample_count: 4,
            ..Default::default()
        };
        let lights = vec![VisibleLight::directional(Vec3::NEG_Y, Vec3::ONE, 1.0)
            .with_shadows(1.0, caster_bounds())
            .with_shadow_quality(quality)];
        collector.collect(&lights, &[], &settings);

        let sun = collector.gpu_sun_light();
        assert!(sun.is_shadowing());
        assert_eq!(sun.color.w, 1.0);
        assert_eq!(sun.shadow_bias.w, 4.0);
        assert!(collector.counts().sun_shadowing);
    }

    #[test]
    fn spot_attenuation_is_full_inside_inner_cone() {
        let settings = LightingSettings::default();
        let mut collector = LightCollector::new(&settings);
        collector.collect(&[spot(0)], &[], &settings);

        let record = &collector.punctual_lights()[0];
        let (scale, offset) = record.spot_scale_offset();
        let inside = (0.2f32.cos() * scale + offset).clamp(0.0, 1.0);
        let outside = (0.6f32.cos() * scale + offset).clamp(0.0, 1.0);
        assert_eq!(inside, 1.0);
        assert_eq!(outside, 0.0);
    }

    #[test]
    fn probes_are_capped() {
        let settings = LightingSettings {
            max_reflection_probes: 2,
            ..Default::default()
        };
        let mut collector = LightCollector::new(&settings);
        let probes: Vec<_> = (0..5)
            .map(|i| VisibleReflectionProbe::new(Vec3::splat(i as f32), 1.0))
            .collect();
        collector.collect(&[], &probes, &settings);

        assert_eq!(collector.reflection_probes(), &probes[..2]);
        assert_eq!(collector.drop_counters().reflection_probes, 3);
    }
}
