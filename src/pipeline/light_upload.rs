//! Light upload transfer pass

use crate::lighting::{GpuPunctualLight, GpuSunLight, LightCollector};
use crate::render_graph::*;
use crate::shadows::ShadowPlan;
use crate::tile_culling::GpuCullingLight;

/// Buffers filled by the upload pass
#[derive(Debug, Clone, Copy)]
pub struct LightUploadTargets {
    pub punctual_lights: ResourceId,
    pub sun_light: ResourceId,
    pub sun_shadow_data: ResourceId,
    pub spot_shadow_data: ResourceId,
    pub point_shadow_data: ResourceId,
    pub culling_lights: ResourceId,
    pub culling_probes: Option<ResourceId>,
}

impl LightUploadTargets {
    fn written(&self) -> impl Iterator<Item = ResourceId> + '_ {
        [
            self.punctual_lights,
            self.sun_light,
            self.sun_shadow_data,
            self.spot_shadow_data,
            self.point_shadow_data,
            self.culling_lights,
        ]
        .into_iter()
        .chain(self.culling_probes)
    }
}

/// Copies the frame's light and shadow records into GPU buffers.
pub struct LightUploadPass<'a> {
    pub collector: &'a LightCollector,
    pub shadows: &'a ShadowPlan,
    pub culling_lights: &'a [GpuCullingLight],
    pub culling_probes: &'a [GpuCullingLight],
}

impl LightUploadPass<'_> {
    pub const NAME: &'static str = "Light Upload";

    fn transfer(&self, targets: &LightUploadTargets) -> TransferPass {
        let mut transfer = TransferPass::new();

        let punctual: &[GpuPunctualLight] = self.collector.gpu_punctual_lights();
        if !punctual.is_empty() {
            transfer.upload(targets.punctual_lights, 0, bytemuck::cast_slice(punctual));
        }
        let sun: GpuSunLight = self.collector.gpu_sun_light();
        transfer.upload(targets.sun_light, 0, bytemuck::bytes_of(&sun));

        // Uniforms of categories without an atlas are uploaded zeroed
        transfer.upload(
            targets.sun_shadow_data,
            0,
            bytemuck::bytes_of(&self.shadows.gpu_sun_data()),
        );
        transfer.upload(
            targets.spot_shadow_data,
            0,
            bytemuck::bytes_of(&self.shadows.gpu_spot_data()),
        );
        transfer.upload(
            targets.point_shadow_data,
            0,
            bytemuck::bytes_of(&self.shadows.gpu_point_data()),
        );

        if !self.culling_lights.is_empty() {
            transfer.upload(targets.culling_lights, 0, bytemuck::cast_slice(self.culling_lights));
        }
        if let Some(probes) = targets.culling_probes {
            if !self.culling_probes.is_empty() {
                transfer.upload(probes, 0, bytemuck::cast_slice(self.culling_probes));
            }
        }
        transfer
    }

    /// Add the pass and declare its writes
    pub fn add_to_graph(&self, graph: &mut FrameGraph, targets: &LightUploadTargets) -> GraphResult<PassId> {
        let pass = graph.add_pass(Self::NAME, Pass::Transfer(self.transfer(targets)));
        for resource in targets.written() {
            graph.use_resource(pass, resource, AccessMode::Write)?;
        }
        Ok(pass)
    }
}
