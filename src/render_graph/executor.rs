//! Frame graph executor

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::HashMap;

/// Runs a compiled frame graph against a backend.
///
/// Transient resources are created right before their first pass and destroyed
/// right after their last one. Persistent resources stay alive until
/// [`end_frame`](Self::end_frame) so their contents can be read back or bound
/// by later rendering. Imported resources must be bound by the host first.
#[derive(Debug, Default)]
pub struct FrameGraphExecutor {
    /// Buffers created by the executor, mapped by resource ID
    buffers: HashMap<ResourceId, BufferHandle>,
    /// Textures created by the executor, mapped by resource ID
    textures: HashMap<ResourceId, TextureHandle>,

    /// Host-owned resources
    imported_buffers: HashMap<ResourceId, BufferHandle>,
    imported_textures: HashMap<ResourceId, TextureHandle>,

    states: HashMap<ResourceId, ResourceState>,
}

impl FrameGraphExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a host texture to an imported resource for the current frame
    pub fn bind_imported_texture(&mut self, resource: ResourceId, texture: TextureHandle) {
        self.imported_textures.insert(resource, texture);
    }

    /// Bind a host buffer to an imported resource for the current frame
    pub fn bind_imported_buffer(&mut self, resource: ResourceId, buffer: BufferHandle) {
        self.imported_buffers.insert(resource, buffer);
    }

    /// Physical buffer behind `resource`, if it currently exists
    pub fn buffer(&self, resource: ResourceId) -> Option<BufferHandle> {
        self.buffers
            .get(&resource)
            .or_else(|| self.imported_buffers.get(&resource))
            .copied()
    }

    /// Physical texture behind `resource`, if it currently exists
    pub fn texture(&self, resource: ResourceId) -> Option<TextureHandle> {
        self.textures
            .get(&resource)
            .or_else(|| self.imported_textures.get(&resource))
            .copied()
    }

    pub fn resource_state(&self, resource: ResourceId) -> ResourceState {
        self.states
            .get(&resource)
            .copied()
            .unwrap_or(ResourceState::Declared)
    }

    /// Execute every scheduled pass in order
    pub fn execute<B, R>(
        &mut self,
        graph: &FrameGraph,
        compiled: &CompiledGraph,
        backend: &mut B,
        recorder: &mut R,
    ) -> GraphResult<()>
    where
        B: GraphicsBackend,
        R: PassRecorder<B>,
    {
        if !self.buffers.is_empty() || !self.textures.is_empty() {
            log::warn!("Previous frame was not ended, releasing its resources");
            self.release_owned(backend);
        }

        self.states.clear();
        for (index, node) in graph.resources().iter().enumerate() {
            let id = ResourceId(index as u32);
            if node.lifetime == ResourceLifetime::Imported && compiled.span(id).is_some() {
                let bound = match node.resource {
                    VirtualResource::Texture(_) => self.imported_textures.contains_key(&id),
                    VirtualResource::Buffer(_) => self.imported_buffers.contains_key(&id),
                };
                if !bound {
                    return Err(GraphError::MissingImport(node.name.clone()));
                }
                self.states.insert(id, ResourceState::Scheduled);
            }
        }

        for (step, &pass_id) in compiled.pass_order().iter().enumerate() {
            for &resource in compiled.allocations_before(step) {
                self.allocate(graph, resource, backend)?;
            }

            let node = graph.pass_node(pass_id)?;
            log::trace!("Executing {} pass '{}'", node.pass.kind(), node.name);
            for (resource, _) in &node.accesses {
                self.states.insert(*resource, ResourceState::Executing);
            }
            self.run_pass(graph, node, backend, recorder)?;

            for &resource in compiled.releases_after(step) {
                self.release(resource, backend);
            }
        }

        for (index, node) in graph.resources().iter().enumerate() {
            let id = ResourceId(index as u32);
            if node.lifetime == ResourceLifetime::Imported && self.states.contains_key(&id) {
                self.states.insert(id, ResourceState::Retained);
            }
        }

        Ok(())
    }

    /// Release persistent resources and forget imported bindings
    pub fn end_frame<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.release_owned(backend);
        self.imported_buffers.clear();
        self.imported_textures.clear();
    }

    fn allocate<B: GraphicsBackend>(
        &mut self,
        graph: &FrameGraph,
        resource: ResourceId,
        backend: &mut B,
    ) -> GraphResult<()> {
        let node = graph.resource_node(resource)?;
        match &node.resource {
            VirtualResource::Texture(desc) => {
                let handle = backend.create_texture(desc)?;
                self.textures.insert(resource, handle);
            }
            VirtualResource::Buffer(desc) => {
                let handle = backend.create_buffer(desc)?;
                self.buffers.insert(resource, handle);
            }
        }
        self.states.insert(resource, ResourceState::Scheduled);
        Ok(())
    }

    fn release<B: GraphicsBackend>(&mut self, resource: ResourceId, backend: &mut B) {
        if let Some(buffer) = self.buffers.remove(&resource) {
            backend.destroy_buffer(buffer);
        }
        if let Some(texture) = self.textures.remove(&resource) {
            backend.destroy_texture(texture);
        }
        self.states.insert(resource, ResourceState::Released);
    }

    fn release_owned<B: GraphicsBackend>(&mut self, backend: &mut B) {
        let owned: Vec<ResourceId> = self
            .buffers
            .keys()
            .chain(self.textures.keys())
            .copied()
            .collect();
        for resource in owned {
            self.release(resource, backend);
        }
    }

    fn buffer_for(&self, graph: &FrameGraph, resource: ResourceId) -> GraphResult<BufferHandle> {
        let node = graph.resource_node(resource)?;
        if node.resource.is_texture() {
            return Err(GraphError::ResourceKindMismatch(node.name.clone(), "buffer"));
        }
        self.buffer(resource)
            .ok_or(GraphError::InvalidResourceHandle(resource))
    }

    fn texture_for(&self, graph: &FrameGraph, resource: ResourceId) -> GraphResult<TextureHandle> {
        let node = graph.resource_node(resource)?;
        if !node.resource.is_texture() {
            return Err(GraphError::ResourceKindMismatch(node.name.clone(), "texture"));
        }
        self.texture(resource)
            .ok_or(GraphError::InvalidResourceHandle(resource))
    }

    fn run_pass<B, R>(
        &self,
        graph: &FrameGraph,
        node: &PassNode,
        backend: &mut B,
        recorder: &mut R,
    ) -> GraphResult<()>
    where
        B: GraphicsBackend,
        R: PassRecorder<B>,
    {
        match &node.pass {
            Pass::Transfer(transfer) => {
                for upload in &transfer.uploads {
                    let buffer = self.buffer_for(graph, upload.target)?;
                    backend.write_buffer(buffer, upload.offset, &upload.data)?;
                }
            }
            Pass::Compute(compute) => {
                let bindings = compute
                    .bindings
                    .iter()
                    .map(|&(slot, resource)| -> GraphResult<(u32, BoundResource)> {
                        let bound = if graph.resource_node(resource)?.resource.is_texture() {
                            BoundResource::Texture(self.texture_for(graph, resource)?)
                        } else {
                            BoundResource::Buffer(self.buffer_for(graph, resource)?)
                        };
                        Ok((slot, bound))
                    })
                    .collect::<GraphResult<Vec<_>>>()?;
                backend.dispatch(&ComputeDispatch {
                    kernel: compute.kernel,
                    workgroups: compute.workgroups,
                    uniforms: &compute.uniforms,
                    bindings: &bindings,
                })?;
            }
            Pass::Graphics(graphics) => {
                for slice in &graphics.slices {
                    let texture = self.texture_for(graph, slice.texture)?;
                    backend.clear_depth_layer(texture, slice.layer, slice.clear_depth)?;
                    recorder.record_graphics(
                        &node.name,
                        &GraphicsTarget {
                            texture,
                            layer: slice.layer,
                            view_projection: slice.view_projection,
                        },
                        backend,
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::cpu::CpuBackend;
    use glam::Mat4;

    struct CountingRecorder {
        targets: Vec<(String, u32)>,
    }

    impl PassRecorder<CpuBackend> for CountingRecorder {
        fn record_graphics(&mut self, pass_name: &str, slice: &GraphicsTarget, backend: &mut CpuBackend) {
            assert!(backend.texture_exists(slice.texture));
            self.targets.push((pass_name.to_string(), slice.layer));
        }
    }

    #[test]
    fn transients_released_after_last_use_and_persistent_at_end_of_frame() {
        let mut graph = FrameGraph::new();
        let scratch = graph.declare_transient(
            "scratch",
            VirtualResource::Buffer(BufferDescriptor::storage("scratch", 16)),
        );
        let output = graph.declare_buffer("output", BufferDescriptor::storage("output", 16));

        let mut fill = TransferPass::new();
        fill.upload(scratch, 0, &[1; 16]);
        let fill = graph.add_pass("fill", Pass::Transfer(fill));
        graph.use_resource(fill, scratch, AccessMode::Write).unwrap();

        let mut copy = TransferPass::new();
        copy.upload(output, 4, &[7; 4]);
        let copy = graph.add_pass("copy", Pass::Transfer(copy));
        graph.use_resource(copy, scratch, AccessMode::Read).unwrap();
        graph.use_resource(copy, output, AccessMode::Write).unwrap();

        let compiled = graph.compile().unwrap();
        let mut backend = CpuBackend::new();
        let mut executor = FrameGraphExecutor::new();
        executor
            .execute(&graph, &compiled, &mut backend, &mut NoopRecorder)
            .unwrap();

        assert_eq!(executor.resource_state(scratch), ResourceState::Released);
        assert_eq!(executor.resource_state(output), ResourceState::Executing);
        assert_eq!(backend.stats().live_buffers(), 1);

        let handle = executor.buffer(output).unwrap();
        assert_eq!(backend.read_buffer(handle).unwrap()[4..8], [7; 4]);

        executor.end_frame(&mut backend);
        assert_eq!(backend.stats().live_buffers(), 0);
        assert_eq!(executor.resource_state(output), ResourceState::Released);
        assert!(executor.buffer(output).is_none());
    }

    #[test]
    fn missing_import_is_reported() {
        let mut graph = FrameGraph::new();
        let depth = graph.import_texture("depth", TextureDescriptor::depth_2d("depth", 2, 2));
        let pass = graph.add_pass("read", Pass::Transfer(TransferPass::new()));
        graph.use_resource(pass, depth, AccessMode::Read).unwrap();
        graph.allow_pass_culling(pass, false).unwrap();
        let compiled = graph.compile().unwrap();

        let mut backend = CpuBackend::new();
        let mut executor = FrameGraphExecutor::new();
        assert!(matches!(
            executor.execute(&graph, &compiled, &mut backend, &mut NoopRecorder),
            Err(GraphError::MissingImport(name)) if name == "depth"
        ));

        let texture = backend
            .create_texture(&TextureDescriptor::depth_2d("host depth", 2, 2))
            .unwrap();
        executor.bind_imported_texture(depth, texture);
        executor
            .execute(&graph, &compiled, &mut backend, &mut NoopRecorder)
            .unwrap();
        assert_eq!(executor.resource_state(depth), ResourceState::Retained);

        executor.end_frame(&mut backend);
        assert!(backend.texture_exists(texture));
    }

    #[test]
    fn graphics_slices_are_cleared_then_recorded() {
        let mut graph = FrameGraph::new();
        let desc = TextureDescriptor {
            label: Some("atlas".into()),
            width: 2,
            height: 2,
            layers: 2,
            dimension: TextureDimension::D2Array,
            format: TextureFormat::Depth32Float,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        };
        let atlas = graph.declare_texture("atlas", desc);
        let slices = (0..2)
            .map(|layer| DepthSlice {
                texture: atlas,
                layer,
                clear_depth: 0.25,
                view_projection: Mat4::IDENTITY,
            })
            .collect();
        let pass = graph.add_pass("shadows", Pass::Graphics(GraphicsPass { slices }));
        graph.use_resource(pass, atlas, AccessMode::Write).unwrap();

        let compiled = graph.compile().unwrap();
        let mut backend = CpuBackend::new();
        let mut executor = FrameGraphExecutor::new();
        let mut recorder = CountingRecorder { targets: Vec::new() };
        executor
            .execute(&graph, &compiled, &mut backend, &mut recorder)
            .unwrap();

        assert_eq!(
            recorder.targets,
            vec![("shadows".to_string(), 0), ("shadows".to_string(), 1)]
        );
        let texture = executor.texture(atlas).unwrap();
        assert!(backend.texture_layer(texture, 1).unwrap().iter().all(|&d| d == 0.25));
        assert_eq!(backend.stats().depth_clears, 2);
    }

    #[test]
    fn uploading_into_a_texture_is_rejected() {
        let mut graph = FrameGraph::new();
        let texture = graph.declare_texture("t", TextureDescriptor::depth_2d("t", 1, 1));
        let mut upload = TransferPass::new();
        upload.upload(texture, 0, &[0; 4]);
        let pass = graph.add_pass("upload", Pass::Transfer(upload));
        graph.use_resource(pass, texture, AccessMode::Write).unwrap();

        let compiled = graph.compile().unwrap();
        let mut backend = CpuBackend::new();
        let mut executor = FrameGraphExecutor::new();
        assert!(matches!(
            executor.execute(&graph, &compiled, &mut backend, &mut NoopRecorder),
            Err(GraphError::ResourceKindMismatch(..))
        ));
    }
}
