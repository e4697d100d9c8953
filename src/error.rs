//! Crate-level error type

use crate::backend::traits::BackendError;
use crate::config::ConfigError;
use crate::render_graph::GraphError;
use thiserror::Error;

/// Errors from pipeline setup and frame graph execution.
///
/// Collection and planning never fail; over-capacity input is dropped.
#[derive(Error, Debug)]
pub enum LightingError {
    #[error("Invalid lighting settings: {0}")]
    Config(#[from] ConfigError),
    #[error("Frame graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
