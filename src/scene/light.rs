//! Visible light and reflection probe inputs
//!
//! These are the entries of the engine's visibility-culled lists for the
//! current camera. They are plain values rebuilt every frame by the host.

use crate::config::ShadowQuality;
use glam::Vec3;

/// Axis-aligned bounding box in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// A box with no volume holds no shadow casters.
    pub fn is_empty(&self) -> bool {
        !(self.min.x < self.max.x && self.min.y < self.max.y && self.min.z < self.max.z)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }
}

/// Light type with the parameters specific to it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Directional light (the sun)
    Directional,
    Point,
    Spot {
        /// Full-intensity half angle in radians
        inner_angle: f32,
        /// Cut-off half angle in radians
        outer_angle: f32,
    },
}

/// One entry of the visibility list
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleLight {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    /// Ignored for directional lights
    pub position: Vec3,
    /// Direction the light travels; ignored for point lights
    pub direction: Vec3,
    /// Ignored for directional lights
    pub range: f32,
    pub shadows_enabled: bool,
    pub shadow_strength: f32,
    /// Bounds of the casters that can throw shadows from this light
    pub shadow_caster_bounds: Aabb,
    /// Per-light override of the default shadow quality
    pub shadow_quality: Option<ShadowQuality>,
}

impl VisibleLight {
    fn base(kind: LightKind, color: Vec3, intensity: f32) -> Self {
        Self {
            kind,
            color,
            intensity,
            position: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            range: 0.0,
            shadows_enabled: false,
            shadow_strength: 0.0,
            shadow_caster_bounds: Aabb::EMPTY,
            shadow_quality: None,
        }
    }

    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize_or_zero(),
            ..Self::base(LightKind::Directional, color, intensity)
        }
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            position,
            range,
            ..Self::base(LightKind::Point, color, intensity)
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn spot(
        position: Vec3,
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        range: f32,
        inner_angle: f32,
        outer_angle: f32,
    ) -> Self {
        Self {
            position,
            direction: direction.normalize_or_zero(),
            range,
            ..Self::base(
                LightKind::Spot {
                    inner_angle,
                    outer_angle,
                },
                color,
                intensity,
            )
        }
    }

    /// Enable shadows with the given strength and caster bounds
    pub fn with_shadows(mut self, strength: f32, caster_bounds: Aabb) -> Self {
        self.shadows_enabled = true;
        self.shadow_strength = strength;
        self.shadow_caster_bounds = caster_bounds;
        self
    }

    pub fn with_shadow_quality(mut self, quality: ShadowQuality) -> Self {
        self.shadow_quality = Some(quality);
        self
    }

    /// Shadows enabled, non-zero strength and something to cast them.
    ///
    /// Capacity is checked separately by the collector.
    pub fn wants_shadows(&self) -> bool {
        self.shadows_enabled && self.shadow_strength > 0.0 && !self.shadow_caster_bounds.is_empty()
    }
}

/// Reflection probe entry of the visibility list
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleReflectionProbe {
    pub position: Vec3,
    /// Radius of the sphere the probe influences
    pub influence_radius: f32,
}

impl VisibleReflectionProbe {
    pub fn new(position: Vec3, influence_radius: f32) -> Self {
        Self {
            position,
            influence_radius,
        }
    }

    /// Probe with a box influence volume, tiled through its bounding sphere
    pub fn from_box(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            position: center,
            influence_radius: half_extents.abs().length(),
        }
    }
}
