//! Light culling compute pass for Forward+

use crate::backend::types::ComputeKernel;
use crate::render_graph::*;
use crate::tile_culling::{self, TileCullingSetup};

/// Resources bound to the culling kernel
#[derive(Debug, Clone, Copy)]
pub struct LightCullingBindings {
    pub lights: ResourceId,
    pub light_tiles: ResourceId,
    pub probes: Option<ResourceId>,
    pub probe_tiles: Option<ResourceId>,
    pub depth: Option<ResourceId>,
}

/// Light culling compute pass
pub struct LightCullingPass<'a> {
    pub setup: &'a TileCullingSetup,
    /// Shadow atlas passes that must finish before culling starts
    pub shadow_passes: &'a [PassId],
}

impl LightCullingPass<'_> {
    pub const NAME: &'static str = "Light Culling";

    pub fn compute_pass(&self, bindings: &LightCullingBindings) -> ComputePass {
        let mut pass = ComputePass::new(ComputeKernel::TileLightCulling, self.setup.grid.workgroups())
            .with_uniforms(bytemuck::bytes_of(&self.setup.uniforms))
            .bind(tile_culling::BINDING_LIGHTS, bindings.lights)
            .bind(tile_culling::BINDING_LIGHT_TILES, bindings.light_tiles);
        if let (Some(probes), Some(probe_tiles)) = (bindings.probes, bindings.probe_tiles) {
            pass = pass
                .bind(tile_culling::BINDING_PROBES, probes)
                .bind(tile_culling::BINDING_PROBE_TILES, probe_tiles);
        }
        if let Some(depth) = bindings.depth {
            pass = pass.bind(tile_culling::BINDING_DEPTH, depth);
        }
        pass
    }

    /// Add the pass. It always runs, even with no lights, so the tile headers
    /// are rewritten every frame.
    pub fn add_to_graph(&self, graph: &mut FrameGraph, bindings: &LightCullingBindings) -> GraphResult<PassId> {
        let pass = graph.add_pass(Self::NAME, Pass::Compute(self.compute_pass(bindings)));
        graph.use_resource(pass, bindings.lights, AccessMode::Read)?;
        if let (Some(probes), Some(probe_tiles)) = (bindings.probes, bindings.probe_tiles) {
            graph.use_resource(pass, probes, AccessMode::Read)?;
            graph.use_resource(pass, probe_tiles, AccessMode::Write)?;
        }
        if let Some(depth) = bindings.depth {
            graph.use_resource(pass, depth, AccessMode::Read)?;
        }
        graph.use_resource(pass, bindings.light_tiles, AccessMode::Write)?;
        for &shadow_pass in self.shadow_passes {
            graph.add_dependency(pass, shadow_pass)?;
        }
        graph.allow_pass_culling(pass, false)?;
        Ok(pass)
    }
}
