//! wgpu backend implementation
//!
//! Headless: no surface, just a device and queue. Every operation records and
//! submits its own command buffer, so results are visible to the next call in
//! submission order.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::tile_culling::{self, shader::TILE_LIGHT_CULLING_SHADER, TileCullingUniforms};
use std::collections::HashMap;
use std::sync::mpsc;
use wgpu::util::DeviceExt;

/// Size used for placeholder storage bindings
const FALLBACK_BUFFER_SIZE: u64 = 64;

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    /// Requested size; the allocation is rounded up to the copy alignment
    size: u64,
}

struct TileCullingPipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// Fallback resources bound to unused kernel slots
struct Fallbacks {
    /// Read-only and writable storage may not alias within one dispatch
    storage_read: wgpu::Buffer,
    storage_write: wgpu::Buffer,
    depth_view: wgpu::TextureView,
    #[allow(dead_code)]
    depth: wgpu::Texture,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Resource storage
    buffers: HashMap<u64, WgpuBuffer>,
    textures: HashMap<u64, wgpu::Texture>,
    next_id: u64,

    tile_culling: Option<TileCullingPipeline>,
    fallbacks: Fallbacks,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::MAP_READ) {
            result |= wgpu::BufferUsages::MAP_READ;
        }
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        if usage.contains(BufferUsage::STORAGE) {
            result |= wgpu::BufferUsages::STORAGE;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::STORAGE_BINDING) {
            result |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    /// Create a backend without a window, blocking on adapter and device requests
    pub fn new_headless() -> BackendResult<Self> {
        pollster::block_on(Self::new_headless_async())
    }

    pub async fn new_headless_async() -> BackendResult<Self> {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or_else(wgpu::Backends::all);
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Lighting Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let fallbacks = Self::create_fallbacks(&device);

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            next_id: 0,
            tile_culling: None,
            fallbacks,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Raw texture, for hosts recording their own shadow caster draws
    pub fn wgpu_texture(&self, texture: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&texture.0)
    }

    /// Render attachment view of one array layer
    pub fn layer_view(&self, texture: TextureHandle, layer: u32) -> BackendResult<wgpu::TextureView> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture))?;
        if layer >= tex.depth_or_array_layers() {
            return Err(BackendError::UnknownTexture(texture));
        }
        Ok(tex.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Layer View"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        }))
    }

    fn create_fallbacks(device: &wgpu::Device) -> Fallbacks {
        let storage = |label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: FALLBACK_BUFFER_SIZE,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        };
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Fallback Depth"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        Fallbacks {
            storage_read: storage("Fallback Storage (read)"),
            storage_write: storage("Fallback Storage (write)"),
            depth_view,
            depth,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    fn create_tile_culling_pipeline(&self) -> BackendResult<TileCullingPipeline> {
        let kernel = ComputeKernel::TileLightCulling;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kernel.label()),
                source: wgpu::ShaderSource::Wgsl(TILE_LIGHT_CULLING_SHADER.into()),
            });

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Tile Culling Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: tile_culling::BINDING_UNIFORMS,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    Self::storage_entry(tile_culling::BINDING_LIGHTS, true),
                    Self::storage_entry(tile_culling::BINDING_LIGHT_TILES, false),
                    Self::storage_entry(tile_culling::BINDING_PROBES, true),
                    Self::storage_entry(tile_culling::BINDING_PROBE_TILES, false),
                    wgpu::BindGroupLayoutEntry {
                        binding: tile_culling::BINDING_DEPTH,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Depth,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                ],
            });

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel.label()),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: kernel.entry_point(),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(BackendError::PipelineCreationFailed(error.to_string()));
        }
        log::debug!("Created {} pipeline", kernel.label());
        Ok(TileCullingPipeline { pipeline, layout })
    }

    fn storage_binding(
        &self,
        dispatch: &ComputeDispatch<'_>,
        slot: u32,
        writable: bool,
    ) -> BackendResult<&wgpu::Buffer> {
        match dispatch.buffer(slot) {
            Some(handle) => self
                .buffers
                .get(&handle.0)
                .map(|b| &b.buffer)
                .ok_or(BackendError::UnknownBuffer(handle)),
            None if writable => Ok(&self.fallbacks.storage_write),
            None => Ok(&self.fallbacks.storage_read),
        }
    }

    fn dispatch_tile_culling(&mut self, dispatch: &ComputeDispatch<'_>) -> BackendResult<()> {
        let kernel = dispatch.kernel;
        let uniform_size = std::mem::size_of::<TileCullingUniforms>();
        if dispatch.uniforms.len() < uniform_size {
            return Err(BackendError::InvalidUniforms(format!(
                "{} expects {} bytes of uniforms, got {}",
                kernel.label(),
                uniform_size,
                dispatch.uniforms.len()
            )));
        }
        if dispatch.buffer(tile_culling::BINDING_LIGHT_TILES).is_none() {
            return Err(BackendError::MissingBinding {
                kernel,
                slot: tile_culling::BINDING_LIGHT_TILES,
            });
        }

        if self.tile_culling.is_none() {
            self.tile_culling = Some(self.create_tile_culling_pipeline()?);
        }
        let Some(pipeline) = self.tile_culling.as_ref() else {
            return Err(BackendError::PipelineCreationFailed(kernel.label().into()));
        };

        let uniforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Tile Culling Uniforms"),
                contents: &dispatch.uniforms[..uniform_size],
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let depth_view = match dispatch.texture(tile_culling::BINDING_DEPTH) {
            Some(handle) => {
                let texture = self
                    .textures
                    .get(&handle.0)
                    .ok_or(BackendError::UnknownTexture(handle))?;
                Some(texture.create_view(&wgpu::TextureViewDescriptor {
                    label: Some("Tile Culling Depth"),
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    aspect: wgpu::TextureAspect::DepthOnly,
                    base_array_layer: 0,
                    array_layer_count: Some(1),
                    ..Default::default()
                }))
            }
            None => None,
        };

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Tile Culling Bind Group"),
            layout: &pipeline.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: tile_culling::BINDING_UNIFORMS,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: tile_culling::BINDING_LIGHTS,
                    resource: self
                        .storage_binding(dispatch, tile_culling::BINDING_LIGHTS, false)?
                        .as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: tile_culling::BINDING_LIGHT_TILES,
                    resource: self
                        .storage_binding(dispatch, tile_culling::BINDING_LIGHT_TILES, true)?
                        .as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: tile_culling::BINDING_PROBES,
                    resource: self
                        .storage_binding(dispatch, tile_culling::BINDING_PROBES, false)?
                        .as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: tile_culling::BINDING_PROBE_TILES,
                    resource: self
                        .storage_binding(dispatch, tile_culling::BINDING_PROBE_TILES, true)?
                        .as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: tile_culling::BINDING_DEPTH,
                    resource: wgpu::BindingResource::TextureView(
                        depth_view.as_ref().unwrap_or(&self.fallbacks.depth_view),
                    ),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(kernel.label()),
            });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.label()),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&pipeline.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            let [x, y, z] = dispatch.workgroups;
            compute_pass.dispatch_workgroups(x, y, z);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let size = desc.size.max(MIN_BUFFER_SIZE);
        let aligned = size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT;
        if aligned > self.device.limits().max_buffer_size {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} needs {} bytes",
                desc.label, aligned
            )));
        }
        let mut usage = Self::convert_buffer_usage(desc.usage);
        if !usage.contains(wgpu::BufferUsages::MAP_READ) {
            // Every buffer can be read back
            usage |= wgpu::BufferUsages::COPY_SRC;
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: aligned,
            usage,
            mapped_at_creation: false,
        });

        let id = self.allocate_id();
        self.buffers.insert(id, WgpuBuffer { buffer, size });
        Ok(BufferHandle(id))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has a zero extent",
                desc.label
            )));
        }
        let limits = self.device.limits();
        if desc.width.max(desc.height) > limits.max_texture_dimension_2d
            || desc.layers > limits.max_texture_array_layers
        {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} exceeds device limits ({}x{}x{})",
                desc.label, desc.width, desc.height, desc.layers
            )));
        }

        // Arrays and cube arrays are both stored as layered 2D textures
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });

        let id = self.allocate_id();
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buf) = self.buffers.remove(&buffer.0) {
            buf.buffer.destroy();
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(&texture.0) {
            tex.destroy();
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let buf = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::UnknownBuffer(buffer))?;
        let end = offset.checked_add(data.len() as u64);
        if end.map_or(true, |end| end > buf.size) || offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(BackendError::WriteOutOfBounds {
                offset,
                len: data.len(),
                size: buf.size,
            });
        }
        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(&buf.buffer, offset, data);
        } else {
            // Pad the tail; the allocation is always aligned
            let mut padded = data.to_vec();
            padded.resize(data.len().next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize), 0);
            self.queue.write_buffer(&buf.buffer, offset, &padded);
        }
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        let buf = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::UnknownBuffer(buffer))?;
        let aligned = buf.buffer.size();

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging"),
            size: aligned,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback"),
            });
        encoder.copy_buffer_to_buffer(&buf.buffer, 0, &staging, 0, aligned);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let mut bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        bytes.truncate(buf.size as usize);
        Ok(bytes)
    }

    fn clear_depth_layer(&mut self, texture: TextureHandle, layer: u32, value: f32) -> BackendResult<()> {
        let view = self.layer_view(texture, layer)?;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Depth Clear"),
            });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Depth Clear"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(value),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> BackendResult<()> {
        log::trace!(
            "WgpuBackend: dispatch {} {:?}",
            dispatch.kernel.label(),
            dispatch.workgroups
        );
        match dispatch.kernel {
            ComputeKernel::TileLightCulling => self.dispatch_tile_culling(dispatch),
        }
    }
}
