//! Per-frame lighting pipeline
//!
//! Runs the CPU half of the frame and declares the GPU half in a frame graph:
//! 1. Light collection - caps and packs the visible lights
//! 2. Shadow atlas planning - slice matrices and atlas descriptors
//! 3. Light upload - transfer pass filling the light and shadow buffers
//! 4. Shadow atlases - one depth pass per created atlas
//! 5. Light culling - Forward+ tile culling compute pass
//!
//! Shading passes added by the host read the returned [`LightingFrameOutputs`].

pub mod light_culling;
pub mod light_upload;
pub mod shadow_pass;

pub use light_culling::{LightCullingBindings, LightCullingPass};
pub use light_upload::{LightUploadPass, LightUploadTargets};
pub use shadow_pass::ShadowAtlasPass;

use crate::backend::types::BufferDescriptor;
use crate::config::LightingSettings;
use crate::error::LightingError;
use crate::lighting::{DropCounters, GpuPunctualLight, GpuSunLight, LightCollector, LightCounts};
use crate::render_graph::*;
use crate::scene::{Camera, VisibleLight, VisibleReflectionProbe};
use crate::shadows::{
    GpuPointShadowData, GpuSpotShadowData, GpuSunShadowData, ShadowAtlasPlanner, ShadowCategory,
    ShadowPlan,
};
use crate::tile_culling::{self, GpuCullingLight, TileCullingSetup, TileGrid};
use std::mem::size_of;

/// What the host hands the pipeline each frame
#[derive(Debug, Clone, Copy)]
pub struct LightingFrameInputs<'a> {
    pub camera: &'a Camera,
    pub visible_lights: &'a [VisibleLight],
    pub visible_probes: &'a [VisibleReflectionProbe],
    /// Render target size in pixels
    pub width: u32,
    pub height: u32,
    /// Scene depth buffer; enables split-depth culling when present
    pub depth: Option<ResourceId>,
}

/// Shadow resources of one category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowAtlasBinding {
    /// `None` when no light of the category casts shadows this frame
    pub atlas: Option<ResourceId>,
    pub created: bool,
    /// Matrix, sphere and depth parameter uniforms; zeroed when not created
    pub data: ResourceId,
}

/// Passes declared for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightingPasses {
    pub light_upload: PassId,
    pub shadow_atlases: Vec<PassId>,
    pub light_culling: PassId,
}

/// Resources consumed by shading passes
#[derive(Debug, Clone)]
pub struct LightingFrameOutputs {
    /// Buffer of [`GpuPunctualLight`]
    pub punctual_lights: ResourceId,
    pub punctual_light_count: u32,
    /// Uniform [`GpuSunLight`]
    pub sun_light: ResourceId,
    pub sun_shadows: ShadowAtlasBinding,
    pub spot_shadows: ShadowAtlasBinding,
    pub point_shadows: ShadowAtlasBinding,
    /// One `per_tile_data_size` record per tile: count, then indices
    pub tile_indices: ResourceId,
    pub probe_tile_indices: Option<ResourceId>,
    pub tile_grid: TileGrid,
    pub counts: LightCounts,
    pub drops: DropCounters,
    pub passes: LightingPasses,
}

/// Orchestrates one frame of lighting work.
///
/// Owns the frame-local arrays and reuses them across frames.
pub struct LightingPipeline {
    settings: LightingSettings,
    collector: LightCollector,
    planner: ShadowAtlasPlanner,
    culling_lights: Vec<GpuCullingLight>,
    culling_probes: Vec<GpuCullingLight>,
}

impl LightingPipeline {
    pub fn new(settings: LightingSettings) -> Result<Self, LightingError> {
        settings.validate()?;
        Ok(Self {
            collector: LightCollector::new(&settings),
            planner: ShadowAtlasPlanner::new(),
            culling_lights: Vec::with_capacity(settings.max_punctual_lights),
            culling_probes: Vec::new(),
            settings,
        })
    }

    pub fn settings(&self) -> &LightingSettings {
        &self.settings
    }

    /// Replace the settings snapshot used from the next frame on
    pub fn set_settings(&mut self, settings: LightingSettings) -> Result<(), LightingError> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn collector(&self) -> &LightCollector {
        &self.collector
    }

    pub fn shadow_plan(&self) -> &ShadowPlan {
        self.planner.current()
    }

    /// Collect, plan and declare this frame's lighting passes in `graph`.
    pub fn prepare_frame(
        &mut self,
        graph: &mut FrameGraph,
        inputs: &LightingFrameInputs<'_>,
    ) -> GraphResult<LightingFrameOutputs> {
        let settings = &self.settings;
        self.collector
            .collect(inputs.visible_lights, inputs.visible_probes, settings);
        let plan = self.planner.plan(&self.collector, inputs.camera, settings);

        let counts = self.collector.counts();
        let probes_enabled = settings.reflection_probe_tiles;
        let grid = TileGrid::new(inputs.width, inputs.height, settings.tile_size);
        let setup = TileCullingSetup::new(inputs.camera, &grid, settings)
            .with_counts(counts.punctual, if probes_enabled { counts.reflection_probes } else { 0 })
            .with_depth(inputs.depth.is_some());

        tile_culling::pack_culling_lights(self.collector.punctual_lights(), &mut self.culling_lights);
        tile_culling::pack_culling_probes(self.collector.reflection_probes(), &mut self.culling_probes);

        // Persistent outputs
        let punctual_lights = graph.declare_buffer(
            "Punctual Lights",
            BufferDescriptor::storage(
                "Punctual Lights",
                (counts.punctual.max(1) as usize * size_of::<GpuPunctualLight>()) as u64,
            ),
        );
        let sun_light = graph.declare_buffer(
            "Sun Light",
            BufferDescriptor::uniform("Sun Light", size_of::<GpuSunLight>() as u64),
        );
        let shadow_data = [
            (ShadowCategory::Sun, size_of::<GpuSunShadowData>()),
            (ShadowCategory::Spot, size_of::<GpuSpotShadowData>()),
            (ShadowCategory::Point, size_of::<GpuPointShadowData>()),
        ]
        .map(|(category, size)| {
            let name = format!("{} Data", category.label());
            graph.declare_buffer(&name, BufferDescriptor::uniform(&name, size as u64))
        });

        let index_bytes = |grid: &TileGrid| (grid.index_buffer_len(settings.per_tile_data_size) * 4) as u64;
        let tile_indices = graph.declare_buffer(
            "Tile Light Indices",
            BufferDescriptor::storage("Tile Light Indices", index_bytes(&grid)),
        );
        let probe_tile_indices = probes_enabled.then(|| {
            graph.declare_buffer(
                "Tile Probe Indices",
                BufferDescriptor::storage("Tile Probe Indices", index_bytes(&grid)),
            )
        });

        // Culling inputs only live until the dispatch
        let culling_bytes = |count: usize| (count.max(1) * size_of::<GpuCullingLight>()) as u64;
        let culling_lights = graph.declare_transient(
            "Culling Lights",
            VirtualResource::Buffer(BufferDescriptor::storage(
                "Culling Lights",
                culling_bytes(self.culling_lights.len()),
            )),
        );
        let culling_probes = probes_enabled.then(|| {
            graph.declare_transient(
                "Culling Probes",
                VirtualResource::Buffer(BufferDescriptor::storage(
                    "Culling Probes",
                    culling_bytes(self.culling_probes.len()),
                )),
            )
        });

        let light_upload = LightUploadPass {
            collector: &self.collector,
            shadows: plan,
            culling_lights: &self.culling_lights,
            culling_probes: &self.culling_probes,
        }
        .add_to_graph(
            graph,
            &LightUploadTargets {
                punctual_lights,
                sun_light,
                sun_shadow_data: shadow_data[0],
                spot_shadow_data: shadow_data[1],
                point_shadow_data: shadow_data[2],
                culling_lights,
                culling_probes,
            },
        )?;

        let mut shadow_atlases = Vec::new();
        let mut bindings = Vec::with_capacity(3);
        for (category, data) in [ShadowCategory::Sun, ShadowCategory::Spot, ShadowCategory::Point]
            .into_iter()
            .zip(shadow_data)
        {
            let category_plan = plan.category(category);
            let atlas = match category_plan.atlas {
                Some(desc) => {
                    let atlas = graph.declare_texture(category.label(), desc.texture_descriptor());
                    let pass = ShadowAtlasPass {
                        plan: category_plan,
                        convention: settings.depth_convention,
                    }
                    .add_to_graph(graph, atlas, data)?;
                    shadow_atlases.push(pass);
                    Some(atlas)
                }
                None => None,
            };
            bindings.push(ShadowAtlasBinding {
                atlas,
                created: atlas.is_some(),
                data,
            });
        }

        let light_culling = LightCullingPass {
            setup: &setup,
            shadow_passes: &shadow_atlases,
        }
        .add_to_graph(
            graph,
            &LightCullingBindings {
                lights: culling_lights,
                light_tiles: tile_indices,
                probes: culling_probes,
                probe_tiles: probe_tile_indices,
                depth: inputs.depth,
            },
        )?;

        log::debug!(
            "Lighting frame: {} punctual lights, {} shadow atlas pass(es), {}x{} tiles",
            counts.punctual,
            shadow_atlases.len(),
            grid.tiles_x,
            grid.tiles_y
        );

        Ok(LightingFrameOutputs {
            punctual_lights,
            punctual_light_count: counts.punctual,
            sun_light,
            sun_shadows: bindings[0],
            spot_shadows: bindings[1],
            point_shadows: bindings[2],
            tile_indices,
            probe_tile_indices,
            tile_grid: grid,
            counts,
            drops: *self.collector.drop_counters(),
            passes: LightingPasses {
                light_upload,
                shadow_atlases,
                light_culling,
            },
        })
    }
}
