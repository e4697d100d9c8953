//! Graphics Lighting - per-frame light scheduling for a Forward+ renderer
//!
//! Each frame the [`LightingPipeline`] turns the visible lights of a scene into
//! GPU work declared on a [`FrameGraph`]:
//! - a capped, packed list of punctual lights plus the sun uniform
//! - shadow atlases with per-slice matrices for sun cascades, spot and point lights
//! - Forward+ tile light culling producing a per-tile light index list
//!
//! The graph orders passes from their resource accesses and manages transient
//! resource lifetimes. Two backends execute it:
//! - **CPU**: host-memory reference backend, runs the culling kernel on the CPU
//! - **wgpu**: headless GPU backend running the WGSL culling kernel

pub mod backend;
pub mod config;
pub mod error;
pub mod lighting;
pub mod pipeline;
pub mod render_graph;
pub mod scene;
pub mod shadows;
pub mod tile_culling;

pub use backend::cpu::CpuBackend;
pub use backend::traits::{BackendError, GraphicsBackend};
// Re-export wgpu backend for direct access
pub use backend::wgpu_backend::WgpuBackend;
pub use config::{DepthConvention, LightingSettings, ShadowQuality};
pub use error::LightingError;
pub use pipeline::{LightingFrameInputs, LightingFrameOutputs, LightingPipeline, ShadowAtlasBinding};
pub use render_graph::{CompiledGraph, FrameGraph, FrameGraphExecutor, GraphError};
