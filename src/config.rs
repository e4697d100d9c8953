//! Lighting configuration snapshot
//!
//! [`LightingSettings`] is an immutable value handed to the collector, the
//! shadow planner and the tile culler at the start of every frame. Hosts
//! usually load it from a config file and keep it around unchanged.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard upper bound of point + spot lights in the punctual light buffer.
pub const K_MAX_PUNCTUAL_LIGHT_COUNT: usize = 256;
/// Hard upper bound of shadow casting point lights (six cube faces each).
pub const K_MAX_SHADOWING_POINT_LIGHT_COUNT: usize = 4;
/// Hard upper bound of shadow casting spot lights.
pub const K_MAX_SHADOWING_SPOT_LIGHT_COUNT: usize = 8;
/// Hard upper bound of directional shadow cascades.
pub const K_MAX_CASCADE_COUNT: usize = 4;
/// Hard upper bound of reflection probes considered for tiling.
pub const K_MAX_REFLECTION_PROBE_COUNT: usize = 64;
/// Default screen tile edge in pixels.
pub const K_TILE_SIZE: u32 = 16;
/// u32 slots per tile record: one count header plus up to 63 indices.
pub const K_PER_TILE_DATA_SIZE: u32 = 64;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("tile size must be non-zero")]
    ZeroTileSize,
    #[error("per-tile data size must hold a header and at least one index, got {0}")]
    PerTileDataTooSmall(u32),
    #[error("{name} is {value}, exceeds the maximum of {max}")]
    CapacityTooLarge {
        name: &'static str,
        value: usize,
        max: usize,
    },
    #[error("cascade count must be in 1..={max}, got {value}")]
    InvalidCascadeCount { value: u32, max: usize },
    #[error("{0} shadow map resolution must be non-zero")]
    ZeroShadowResolution(&'static str),
    #[error("{name} must be positive and finite, got {value}")]
    InvalidDistance { name: &'static str, value: f32 },
}

/// Which way device depth runs from near to far.
///
/// Threaded explicitly through every projection and depth reconstruction
/// helper instead of being tested ad hoc at each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DepthConvention {
    /// 0 at the near plane, 1 at the far plane
    #[default]
    Standard,
    /// 1 at the near plane, 0 at the far plane
    ReversedZ,
}

/// Per-light shadow quality parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowQuality {
    /// Constant depth bias in light clip space
    pub depth_bias: f32,
    /// Bias along the surface normal, in shadow texels
    pub normal_bias: f32,
    /// Filter radius of the penumbra, in shadow texels
    pub penumbra: f32,
    /// PCF taps per shaded sample
    pub sample_count: u32,
    /// Tint applied to fully shadowed regions
    pub shadow_color: [f32; 3],
}

impl Default for ShadowQuality {
    fn default() -> Self {
        Self {
            depth_bias: 0.0005,
            normal_bias: 1.0,
            penumbra: 1.5,
            sample_count: 16,
            shadow_color: [0.0, 0.0, 0.0],
        }
    }
}

/// Frame lighting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingSettings {
    /// Point and spot lights kept per frame
    pub max_punctual_lights: usize,
    pub max_shadowing_point_lights: usize,
    pub max_shadowing_spot_lights: usize,
    pub max_reflection_probes: usize,

    /// Edge of a sun cascade slice in texels
    pub sun_shadow_map_size: u32,
    /// Edge of a spot shadow slice in texels
    pub spot_shadow_map_size: u32,
    /// Edge of a point shadow cube face in texels
    pub point_shadow_map_size: u32,

    pub cascade_count: u32,
    /// End of cascades 0..3 as a fraction of the shadow distance; the last
    /// cascade always ends at the shadow distance.
    pub cascade_split_ratios: [f32; 3],
    /// Sun shadows stop at this view distance (clamped to the camera far plane)
    pub max_shadow_distance: f32,
    /// Near plane used by spot and point shadow projections
    pub punctual_shadow_near_plane: f32,

    pub tile_size: u32,
    pub per_tile_data_size: u32,
    pub depth_convention: DepthConvention,
    /// Tighten each tile's depth range from the depth buffer
    pub split_depth_culling: bool,
    /// Also build the reflection probe tile index buffer
    pub reflection_probe_tiles: bool,

    /// Used for lights without an attached [`ShadowQuality`]
    pub default_shadow_quality: ShadowQuality,
}

impl Default for LightingSettings {
    fn default() -> Self {
        Self {
            max_punctual_lights: K_MAX_PUNCTUAL_LIGHT_COUNT,
            max_shadowing_point_lights: K_MAX_SHADOWING_POINT_LIGHT_COUNT,
            max_shadowing_spot_lights: K_MAX_SHADOWING_SPOT_LIGHT_COUNT,
            max_reflection_probes: K_MAX_REFLECTION_PROBE_COUNT,
            sun_shadow_map_size: 2048,
            spot_shadow_map_size: 1024,
            point_shadow_map_size: 512,
            cascade_count: 4,
            cascade_split_ratios: [0.067, 0.2, 0.467],
            max_shadow_distance: 150.0,
            punctual_shadow_near_plane: 0.05,
            tile_size: K_TILE_SIZE,
            per_tile_data_size: K_PER_TILE_DATA_SIZE,
            depth_convention: DepthConvention::Standard,
            split_depth_culling: true,
            reflection_probe_tiles: false,
            default_shadow_quality: ShadowQuality::default(),
        }
    }
}

impl LightingSettings {
    /// Check the snapshot against the compile-time capacities.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_size == 0 {
            return Err(ConfigError::ZeroTileSize);
        }
        if self.per_tile_data_size < 2 {
            return Err(ConfigError::PerTileDataTooSmall(self.per_tile_data_size));
        }

        let capacities = [
            (
                "max_punctual_lights",
                self.max_punctual_lights,
                K_MAX_PUNCTUAL_LIGHT_COUNT,
            ),
            (
                "max_shadowing_point_lights",
                self.max_shadowing_point_lights,
                K_MAX_SHADOWING_POINT_LIGHT_COUNT,
            ),
            (
                "max_shadowing_spot_lights",
                self.max_shadowing_spot_lights,
                K_MAX_SHADOWING_SPOT_LIGHT_COUNT,
            ),
            (
                "max_reflection_probes",
                self.max_reflection_probes,
                K_MAX_REFLECTION_PROBE_COUNT,
            ),
        ];
        for (name, value, max) in capacities {
            if value > max {
                return Err(ConfigError::CapacityTooLarge { name, value, max });
            }
        }

        if self.cascade_count == 0 || self.cascade_count as usize > K_MAX_CASCADE_COUNT {
            return Err(ConfigError::InvalidCascadeCount {
                value: self.cascade_count,
                max: K_MAX_CASCADE_COUNT,
            });
        }

        for (name, size) in [
            ("sun", self.sun_shadow_map_size),
            ("spot", self.spot_shadow_map_size),
            ("point", self.point_shadow_map_size),
        ] {
            if size == 0 {
                return Err(ConfigError::ZeroShadowResolution(name));
            }
        }

        for (name, value) in [
            ("max_shadow_distance", self.max_shadow_distance),
            ("punctual_shadow_near_plane", self.punctual_shadow_near_plane),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::InvalidDistance { name, value });
            }
        }

        Ok(())
    }

    /// Largest index count a tile record can hold.
    pub fn tile_index_capacity(&self) -> u32 {
        self.per_tile_data_size.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = LightingSettings::default();
        assert_eq!(settings.validate(), Ok(()));
        assert_eq!(settings.tile_index_capacity(), K_PER_TILE_DATA_SIZE - 1);
    }

    #[test]
    fn rejects_zero_tile_size() {
        let settings = LightingSettings {
            tile_size: 0,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::ZeroTileSize));
    }

    #[test]
    fn rejects_capacity_above_gpu_arrays() {
        let settings = LightingSettings {
            max_shadowing_spot_lights: K_MAX_SHADOWING_SPOT_LIGHT_COUNT + 1,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::CapacityTooLarge {
                name: "max_shadowing_spot_lights",
                ..
            })
        ));
    }

    #[test]
    fn rejects_bad_cascade_count() {
        for cascade_count in [0, K_MAX_CASCADE_COUNT as u32 + 1] {
            let settings = LightingSettings {
                cascade_count,
                ..Default::default()
            };
            assert!(matches!(
                settings.validate(),
                Err(ConfigError::InvalidCascadeCount { .. })
            ));
        }
    }

    #[test]
    fn rejects_non_finite_shadow_distance() {
        let settings = LightingSettings {
            max_shadow_distance: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidDistance { .. })
        ));
    }

    #[test]
    fn loads_partial_toml() {
        let settings: LightingSettings = toml::from_str(
            r#"
            tile_size = 32
            cascade_count = 2
            depth_convention = "ReversedZ"

            [default_shadow_quality]
            sample_count = 4
            "#,
        )
        .unwrap();

        assert_eq!(settings.tile_size, 32);
        assert_eq!(settings.cascade_count, 2);
        assert_eq!(settings.depth_convention, DepthConvention::ReversedZ);
        assert_eq!(settings.default_shadow_quality.sample_count, 4);
        assert_eq!(
            settings.default_shadow_quality.penumbra,
            ShadowQuality::default().penumbra
        );
        assert_eq!(settings.max_punctual_lights, K_MAX_PUNCTUAL_LIGHT_COUNT);
        assert_eq!(settings.validate(), Ok(()));
    }
}
