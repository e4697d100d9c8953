//! Scene inputs consumed by the lighting scheduler

mod camera;
mod light;

pub use camera::*;
pub use light::*;
