//! Core backend abstraction traits
//!
//! The frame graph executor materializes resources and runs passes through
//! [`GraphicsBackend`]. Both the CPU reference backend and the wgpu backend
//! implement it.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Unknown buffer handle {0:?}")]
    UnknownBuffer(BufferHandle),
    #[error("Unknown texture handle {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("Write of {len} bytes at offset {offset} overflows buffer of {size} bytes")]
    WriteOutOfBounds { offset: u64, len: usize, size: u64 },
    #[error("Missing binding {slot} for kernel {kernel:?}")]
    MissingBinding { kernel: ComputeKernel, slot: u32 },
    #[error("Invalid kernel uniforms: {0}")]
    InvalidUniforms(String),
    #[error("Buffer readback failed: {0}")]
    ReadbackFailed(String),
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;
    fn destroy_buffer(&mut self, buffer: BufferHandle);
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Upload bytes into a buffer at `offset`.
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Copy the whole buffer back to host memory. Blocks until the GPU is done.
    fn read_buffer(&mut self, buffer: BufferHandle) -> BackendResult<Vec<u8>>;

    /// Clear one array layer of a depth texture.
    fn clear_depth_layer(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        value: f32,
    ) -> BackendResult<()>;

    /// Run a compute kernel.
    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> BackendResult<()>;
}
