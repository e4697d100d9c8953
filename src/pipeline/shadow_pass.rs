//! Shadow atlas depth passes

use crate::config::DepthConvention;
use crate::render_graph::*;
use crate::shadows::{projection, ShadowCategoryPlan};

/// Renders every slice of one shadow atlas.
///
/// Each slice is cleared to the far depth of the convention, then handed to
/// the host's [`PassRecorder`] with the slice's view-projection.
pub struct ShadowAtlasPass<'a> {
    pub plan: &'a ShadowCategoryPlan,
    pub convention: DepthConvention,
}

impl ShadowAtlasPass<'_> {
    pub fn graphics_pass(&self, atlas: ResourceId) -> GraphicsPass {
        let clear_depth = projection::clear_depth(self.convention);
        GraphicsPass {
            slices: self
                .plan
                .sub_views
                .iter()
                .enumerate()
                .map(|(layer, sub_view)| DepthSlice {
                    texture: atlas,
                    layer: layer as u32,
                    clear_depth,
                    view_projection: sub_view.view_projection,
                })
                .collect(),
        }
    }

    /// Add the pass. `shadow_data` is read so the matrices are uploaded first.
    pub fn add_to_graph(
        &self,
        graph: &mut FrameGraph,
        atlas: ResourceId,
        shadow_data: ResourceId,
    ) -> GraphResult<PassId> {
        let name = self
            .plan
            .atlas
            .map_or("Shadow Atlas", |desc| desc.category.label());
        let pass = graph.add_pass(name, Pass::Graphics(self.graphics_pass(atlas)));
        graph.use_resource(pass, shadow_data, AccessMode::Read)?;
        graph.use_resource(pass, atlas, AccessMode::Write)?;
        Ok(pass)
    }
}
