//! Frame Graph System
//!
//! Passes declare the resources they read and write; the graph derives the
//! execution order from those declarations, culls passes whose results nobody
//! consumes and decides when each resource is created and released.

pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;

pub use executor::*;
pub use graph::*;
pub use pass::*;
pub use resource::*;
