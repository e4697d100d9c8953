//! Host-memory backend
//!
//! Keeps buffers and textures in plain vectors and runs compute kernels with
//! their CPU reference implementations. Used for headless validation and
//! tests; the statistics make allocation and release counts observable.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::tile_culling::{self, kernel, GpuCullingLight, TileCullingUniforms};
use std::collections::HashMap;

/// Resource and dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuBackendStats {
    pub buffers_created: u32,
    pub buffers_destroyed: u32,
    pub textures_created: u32,
    pub textures_destroyed: u32,
    pub dispatches: u32,
    pub depth_clears: u32,
}

impl CpuBackendStats {
    pub fn live_buffers(&self) -> u32 {
        self.buffers_created - self.buffers_destroyed
    }

    pub fn live_textures(&self) -> u32 {
        self.textures_created - self.textures_destroyed
    }
}

struct CpuTexture {
    desc: TextureDescriptor,
    /// One f32 per texel, layer-major
    texels: Vec<f32>,
}

impl CpuTexture {
    fn layer_len(&self) -> usize {
        self.desc.width as usize * self.desc.height as usize
    }
}

/// Backend executing everything on the calling thread
#[derive(Default)]
pub struct CpuBackend {
    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, CpuTexture>,
    next_id: u64,
    stats: CpuBackendStats,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CpuBackendStats {
        self.stats
    }

    pub fn buffer_exists(&self, buffer: BufferHandle) -> bool {
        self.buffers.contains_key(&buffer.0)
    }

    pub fn texture_exists(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| &t.desc)
    }

    /// Fill one layer of a texture, e.g. a depth buffer rendered elsewhere.
    pub fn write_texture_f32(&mut self, texture: TextureHandle, layer: u32, data: &[f32]) -> BackendResult<()> {
        let tex = self
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture))?;
        let layer_len = tex.layer_len();
        let start = layer as usize * layer_len;
        let size = tex.texels.len() as u64 * 4;
        let out_of_bounds = BackendError::WriteOutOfBounds {
            offset: start as u64 * 4,
            len: data.len() * 4,
            size,
        };
        if data.len() > layer_len {
            return Err(out_of_bounds);
        }
        let dst = tex
            .texels
            .get_mut(start..start + data.len())
            .ok_or(out_of_bounds)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Texels of one texture layer
    pub fn texture_layer(&self, texture: TextureHandle, layer: u32) -> BackendResult<&[f32]> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture))?;
        let layer_len = tex.layer_len();
        let start = layer as usize * layer_len;
        tex.texels
            .get(start..start + layer_len)
            .ok_or(BackendError::UnknownTexture(texture))
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer_bytes(&self, buffer: BufferHandle) -> BackendResult<&[u8]> {
        self.buffers
            .get(&buffer.0)
            .map(Vec::as_slice)
            .ok_or(BackendError::UnknownBuffer(buffer))
    }

    fn culling_items(&self, dispatch: &ComputeDispatch<'_>, slot: u32) -> BackendResult<Vec<GpuCullingLight>> {
        let Some(buffer) = dispatch.buffer(slot) else {
            return Ok(Vec::new());
        };
        let bytes = self.buffer_bytes(buffer)?;
        let whole = bytes.len() / std::mem::size_of::<GpuCullingLight>() * std::mem::size_of::<GpuCullingLight>();
        Ok(bytemuck::pod_collect_to_vec(&bytes[..whole]))
    }

    fn dispatch_tile_culling(&mut self, dispatch: &ComputeDispatch<'_>) -> BackendResult<()> {
        let kernel_id = dispatch.kernel;
        if dispatch.uniforms.len() < std::mem::size_of::<TileCullingUniforms>() {
            return Err(BackendError::InvalidUniforms(format!(
                "{} expects {} bytes of uniforms, got {}",
                kernel_id.label(),
                std::mem::size_of::<TileCullingUniforms>(),
                dispatch.uniforms.len()
            )));
        }
        let mut uniforms: TileCullingUniforms = bytemuck::pod_read_unaligned(
            &dispatch.uniforms[..std::mem::size_of::<TileCullingUniforms>()],
        );
        // The dispatch size decides how many tiles run
        uniforms.grid.x = uniforms.grid.x.min(dispatch.workgroups[0]);
        uniforms.grid.y = uniforms.grid.y.min(dispatch.workgroups[1]);

        let lights = self.culling_items(dispatch, tile_culling::BINDING_LIGHTS)?;
        let probes = self.culling_items(dispatch, tile_culling::BINDING_PROBES)?;

        let depth_texels;
        let depth = match dispatch.texture(tile_culling::BINDING_DEPTH) {
            Some(texture) => {
                let tex = self
                    .textures
                    .get(&texture.0)
                    .ok_or(BackendError::UnknownTexture(texture))?;
                depth_texels = tex.texels[..tex.layer_len()].to_vec();
                Some(kernel::DepthView {
                    width: tex.desc.width,
                    height: tex.desc.height,
                    texels: &depth_texels,
                })
            }
            None => None,
        };

        let light_tiles = dispatch
            .buffer(tile_culling::BINDING_LIGHT_TILES)
            .ok_or(BackendError::MissingBinding {
                kernel: kernel_id,
                slot: tile_culling::BINDING_LIGHT_TILES,
            })?;
        let mut out = self.read_u32s(light_tiles)?;
        kernel::cull_tiles(&uniforms, &lights, depth.as_ref(), &mut out);
        self.write_u32s(light_tiles, &out)?;

        if uniforms.probes_enabled() {
            if let Some(probe_tiles) = dispatch.buffer(tile_culling::BINDING_PROBE_TILES) {
                let mut out = self.read_u32s(probe_tiles)?;
                kernel::cull_probe_tiles(&uniforms, &probes, depth.as_ref(), &mut out);
                self.write_u32s(probe_tiles, &out)?;
            }
        }
        Ok(())
    }

    fn read_u32s(&self, buffer: BufferHandle) -> BackendResult<Vec<u32>> {
        let bytes = self.buffer_bytes(buffer)?;
        let whole = bytes.len() / 4 * 4;
        Ok(bytemuck::pod_collect_to_vec(&bytes[..whole]))
    }

    fn write_u32s(&mut self, buffer: BufferHandle, data: &[u32]) -> BackendResult<()> {
        self.write_buffer(buffer, 0, bytemuck::cast_slice(data))
    }
}

impl GraphicsBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "CPU Backend"
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("CpuBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        let size = usize::try_from(desc.size)
            .map_err(|_| BackendError::BufferCreationFailed(format!("{} bytes", desc.size)))?;
        let id = self.allocate_id();
        self.buffers.insert(id, vec![0; size]);
        self.stats.buffers_created += 1;
        Ok(BufferHandle(id))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "CpuBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.layers
        );
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has a zero extent",
                desc.label
            )));
        }
        let len = desc.width as usize * desc.height as usize * desc.layers as usize;
        let id = self.allocate_id();
        self.textures.insert(
            id,
            CpuTexture {
                desc: desc.clone(),
                texels: vec![0.0; len],
            },
        );
        self.stats.textures_created += 1;
        Ok(TextureHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.0).is_some() {
            self.stats.buffers_destroyed += 1;
        } else {
            log::warn!("CpuBackend: destroying unknown buffer {:?}", buffer);
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.stats.textures_destroyed += 1;
        } else {
            log::warn!("CpuBackend: destroying unknown texture {:?}", texture);
        }
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let bytes = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::UnknownBuffer(buffer))?;
        let size = bytes.len() as u64;
        let start = usize::try_from(offset).ok().filter(|&start| start <= bytes.len());
        let dst = start
            .and_then(|start| bytes.get_mut(start..start.checked_add(data.len())?))
            .ok_or(BackendError::WriteOutOfBounds {
                offset,
                len: data.len(),
                size,
            })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>> {
        self.buffer_bytes(buffer).map(<[u8]>::to_vec)
    }

    fn clear_depth_layer(&mut self, texture: TextureHandle, layer: u32, value: f32) -> BackendResult<()> {
        let tex = self
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture))?;
        let layer_len = tex.layer_len();
        let start = layer as usize * layer_len;
        let Some(texels) = tex.texels.get_mut(start..start + layer_len) else {
            return Err(BackendError::WriteOutOfBounds {
                offset: start as u64 * 4,
                len: layer_len * 4,
                size: tex.texels.len() as u64 * 4,
            });
        };
        texels.fill(value);
        self.stats.depth_clears += 1;
        Ok(())
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> BackendResult<()> {
        log::trace!(
            "CpuBackend: dispatch {} {:?}",
            dispatch.kernel.label(),
            dispatch.workgroups
        );
        self.stats.dispatches += 1;
        match dispatch.kernel {
            ComputeKernel::TileLightCulling => self.dispatch_tile_culling(dispatch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;

    #[test]
    fn write_and_read_back() {
        let mut backend = CpuBackend::new();
        let buffer = backend.create_buffer(&BufferDescriptor::storage("test", 8)).unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(backend.read_buffer(buffer).unwrap()[..8], [0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn write_past_end_is_rejected() {
        let mut backend = CpuBackend::new();
        let buffer = backend.create_buffer(&BufferDescriptor::storage("test", 16)).unwrap();
        let err = backend.write_buffer(buffer, 12, &[0; 8]).unwrap_err();
        assert!(matches!(err, BackendError::WriteOutOfBounds { offset: 12, len: 8, size: 16 }));
        assert!(backend.write_buffer(buffer, u64::MAX, &[0]).is_err());
    }

    #[test]
    fn stats_track_lifetimes() {
        let mut backend = CpuBackend::new();
        let buffer = backend.create_buffer(&BufferDescriptor::uniform("u", 64)).unwrap();
        let texture = backend
            .create_texture(&TextureDescriptor::depth_2d("depth", 4, 4))
            .unwrap();
        assert_eq!(backend.stats().live_buffers(), 1);
        assert_eq!(backend.stats().live_textures(), 1);

        backend.destroy_buffer(buffer);
        backend.destroy_texture(texture);
        backend.destroy_texture(texture);
        let stats = backend.stats();
        assert_eq!((stats.live_buffers(), stats.live_textures()), (0, 0));
        assert_eq!(stats.textures_destroyed, 1);
        assert!(!backend.texture_exists(texture));
    }

    #[test]
    fn clears_single_layer() {
        let mut backend = CpuBackend::new();
        let texture = backend
            .create_texture(&TextureDescriptor {
                width: 2,
                height: 2,
                layers: 3,
                dimension: TextureDimension::D2Array,
                format: TextureFormat::Depth32Float,
                ..Default::default()
            })
            .unwrap();
        backend.clear_depth_layer(texture, 1, 1.0).unwrap();
        assert_eq!(backend.texture_layer(texture, 0).unwrap(), &[0.0; 4]);
        assert_eq!(backend.texture_layer(texture, 1).unwrap(), &[1.0; 4]);
        assert!(backend.clear_depth_layer(texture, 3, 1.0).is_err());
    }

    #[test]
    fn dispatch_decodes_lights_and_tile_words() {
        use crate::config::{LightingSettings, K_PER_TILE_DATA_SIZE};
        use crate::scene::Camera;
        use crate::tile_culling::{TileCullingSetup, TileGrid};

        let mut backend = CpuBackend::new();
        let grid = TileGrid::new(16, 16, 16);
        let setup = TileCullingSetup::new(&Camera::default(), &grid, &LightingSettings::default()).with_counts(2, 0);
        let lights = [
            GpuCullingLight::sphere(glam::Vec3::ZERO, 1000.0),
            GpuCullingLight::sphere(glam::Vec3::new(0.0, 0.0, 500.0), 1.0),
        ];

        let light_buffer = backend
            .create_buffer(&BufferDescriptor::storage("lights", std::mem::size_of_val(&lights) as u64))
            .unwrap();
        backend.write_buffer(light_buffer, 0, bytemuck::cast_slice(&lights)).unwrap();
        let tiles = backend
            .create_buffer(&BufferDescriptor::storage("tiles", K_PER_TILE_DATA_SIZE as u64 * 4))
            .unwrap();

        let bindings = [
            (tile_culling::BINDING_LIGHTS, BoundResource::Buffer(light_buffer)),
            (tile_culling::BINDING_LIGHT_TILES, BoundResource::Buffer(tiles)),
        ];
        backend
            .dispatch(&ComputeDispatch {
                kernel: ComputeKernel::TileLightCulling,
                workgroups: grid.workgroups(),
                uniforms: bytemuck::bytes_of(&setup.uniforms),
                bindings: &bindings,
            })
            .unwrap();

        let words = backend.read_u32s(tiles).unwrap();
        assert_eq!(words.len(), K_PER_TILE_DATA_SIZE as usize);
        assert_eq!(&words[..2], &[1, 0]);
    }

    #[test]
    fn dispatch_requires_output_binding() {
        let mut backend = CpuBackend::new();
        let uniforms = TileCullingUniforms::zeroed();
        let dispatch = ComputeDispatch {
            kernel: ComputeKernel::TileLightCulling,
            workgroups: [1, 1, 1],
            uniforms: bytemuck::bytes_of(&uniforms),
            bindings: &[],
        };
        assert!(matches!(
            backend.dispatch(&dispatch),
            Err(BackendError::MissingBinding { slot: 2, .. })
        ));

        let short = ComputeDispatch {
            uniforms: &[0; 4],
            ..dispatch
        };
        assert!(matches!(
            backend.dispatch(&short),
            Err(BackendError::InvalidUniforms(_))
        ));
    }
}
