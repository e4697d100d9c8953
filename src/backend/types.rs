//! Common types shared between backends

use crate::backend::traits::{BufferHandle, TextureHandle};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::R32Float | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

/// Shape of a texture resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    /// Single 2D image
    #[default]
    D2,
    /// Array of 2D slices (sun cascades, spot shadows)
    D2Array,
    /// Array of cube maps, six consecutive layers per cube (point shadows)
    CubeArray,
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const STORAGE_BINDING: Self = Self(1 << 3);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const MAP_READ: Self = Self(1 << 0);
    pub const COPY_SRC: Self = Self(1 << 2);
    pub const COPY_DST: Self = Self(1 << 3);
    pub const UNIFORM: Self = Self(1 << 6);
    pub const STORAGE: Self = Self(1 << 7);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Texture descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Array layers. Cube arrays use six layers per cube.
    pub layers: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            layers: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

impl TextureDescriptor {
    /// Depth texture sampled by a compute or fragment stage after being rendered.
    pub fn depth_2d(label: &str, width: u32, height: u32) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            layers: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Depth32Float,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        }
    }
}

/// Buffer descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Storage buffer written by the CPU or a compute kernel.
    pub fn storage(label: &str, size: u64) -> Self {
        Self {
            label: Some(label.to_string()),
            size: size.max(MIN_BUFFER_SIZE),
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
        }
    }

    /// Uniform buffer written by the CPU.
    pub fn uniform(label: &str, size: u64) -> Self {
        Self {
            label: Some(label.to_string()),
            size: size.max(MIN_BUFFER_SIZE),
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        }
    }
}

/// Smallest buffer the backends will create; zero-sized bindings are invalid.
pub const MIN_BUFFER_SIZE: u64 = 16;

/// Compute kernels known to the backends.
///
/// The set is closed: each backend knows how to build the pipeline for every
/// variant, so the frame graph never carries shader source around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeKernel {
    /// Forward+ tile light culling (`cull_tiles`)
    TileLightCulling,
}

impl ComputeKernel {
    pub fn label(&self) -> &'static str {
        match self {
            ComputeKernel::TileLightCulling => "Tile Light Culling",
        }
    }

    pub fn entry_point(&self) -> &'static str {
        match self {
            ComputeKernel::TileLightCulling => "cull_tiles",
        }
    }
}

/// A physical resource bound to a kernel slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
}

/// Everything a backend needs to run one compute dispatch.
#[derive(Debug, Clone)]
pub struct ComputeDispatch<'a> {
    pub kernel: ComputeKernel,
    pub workgroups: [u32; 3],
    /// Raw bytes of the kernel's uniform block (binding 0).
    pub uniforms: &'a [u8],
    /// `(binding slot, resource)` pairs; unbound slots get backend fallbacks.
    pub bindings: &'a [(u32, BoundResource)],
}

impl ComputeDispatch<'_> {
    pub fn buffer(&self, slot: u32) -> Option<BufferHandle> {
        self.bindings.iter().find_map(|(s, r)| match r {
            BoundResource::Buffer(b) if *s == slot => Some(*b),
            _ => None,
        })
    }

    pub fn texture(&self, slot: u32) -> Option<TextureHandle> {
        self.bindings.iter().find_map(|(s, r)| match r {
            BoundResource::Texture(t) if *s == slot => Some(*t),
            _ => None,
        })
    }
}
