//! Backend abstraction layer
//!
//! Provides common traits and types that the CPU and wgpu backends implement.

pub mod cpu;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use cpu::*;
pub use traits::*;
pub use types::*;
