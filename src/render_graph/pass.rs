//! Frame graph passes
//!
//! The set of pass kinds is closed. Transfer and compute passes carry all the
//! data needed to run them; graphics passes clear their depth slices and hand
//! each one to a [`PassRecorder`] supplied by the host.

use crate::backend::traits::TextureHandle;
use crate::backend::types::ComputeKernel;
use crate::render_graph::resource::{AccessMode, ResourceId};
use glam::Mat4;

/// Unique identifier for a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

impl PassId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Bytes copied into a buffer
#[derive(Debug, Clone, PartialEq)]
pub struct BufferUpload {
    pub target: ResourceId,
    pub offset: u64,
    pub data: Vec<u8>,
}

/// CPU to GPU uploads
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferPass {
    pub uploads: Vec<BufferUpload>,
}

impl TransferPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upload(&mut self, target: ResourceId, offset: u64, data: &[u8]) {
        self.uploads.push(BufferUpload {
            target,
            offset,
            data: data.to_vec(),
        });
    }
}

/// A compute kernel dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct ComputePass {
    pub kernel: ComputeKernel,
    pub workgroups: [u32; 3],
    pub uniforms: Vec<u8>,
    /// `(binding slot, resource)` pairs
    pub bindings: Vec<(u32, ResourceId)>,
}

impl ComputePass {
    pub fn new(kernel: ComputeKernel, workgroups: [u32; 3]) -> Self {
        Self {
            kernel,
            workgroups,
            uniforms: Vec::new(),
            bindings: Vec::new(),
        }
    }

    pub fn with_uniforms(mut self, uniforms: &[u8]) -> Self {
        self.uniforms = uniforms.to_vec();
        self
    }

    pub fn bind(mut self, slot: u32, resource: ResourceId) -> Self {
        self.bindings.push((slot, resource));
        self
    }
}

/// One layer of a depth target rendered by a graphics pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthSlice {
    pub texture: ResourceId,
    pub layer: u32,
    pub clear_depth: f32,
    /// Camera used to render this slice
    pub view_projection: Mat4,
}

/// Depth-only rendering into texture slices
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphicsPass {
    pub slices: Vec<DepthSlice>,
}

/// Pass types
#[derive(Debug, Clone, PartialEq)]
pub enum Pass {
    Transfer(TransferPass),
    Compute(ComputePass),
    Graphics(GraphicsPass),
}

impl Pass {
    pub fn kind(&self) -> &'static str {
        match self {
            Pass::Transfer(_) => "transfer",
            Pass::Compute(_) => "compute",
            Pass::Graphics(_) => "graphics",
        }
    }
}

/// Records draw calls into one depth slice of a graphics pass.
///
/// The graph has already cleared the slice when this is called.
pub trait PassRecorder<B> {
    fn record_graphics(&mut self, pass_name: &str, slice: &GraphicsTarget, backend: &mut B);
}

/// Physical target handed to a [`PassRecorder`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicsTarget {
    pub texture: TextureHandle,
    pub layer: u32,
    pub view_projection: Mat4,
}

/// Recorder that draws nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl<B> PassRecorder<B> for NoopRecorder {
    fn record_graphics(&mut self, _pass_name: &str, _slice: &GraphicsTarget, _backend: &mut B) {}
}

/// Graph-side record of a pass
#[derive(Debug, Clone)]
pub struct PassNode {
    pub name: String,
    pub pass: Pass,
    pub accesses: Vec<(ResourceId, AccessMode)>,
    pub cullable: bool,
}

impl PassNode {
    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.accesses
            .iter()
            .any(|(id, mode)| *id == resource && mode.writes())
    }

    pub fn reads_resource(&self, resource: ResourceId) -> bool {
        self.accesses
            .iter()
            .any(|(id, mode)| *id == resource && mode.reads())
    }
}
