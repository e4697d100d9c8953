//! Light collection and GPU light records

pub mod collector;
pub mod gpu;

pub use collector::*;
pub use gpu::*;
