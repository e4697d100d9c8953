//! Virtual resources for the frame graph

use crate::backend::types::*;

/// Unique identifier for a frame graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

impl ResourceId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// How long a resource lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceLifetime {
    /// Allocated before its first use, released after its last use
    Transient,
    /// Allocated before its first use, released at the end of the frame
    Persistent,
    /// Owned outside the graph; never allocated or released by it
    Imported,
}

/// Where a resource is in its per-frame state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Known to the graph, no backing storage yet
    Declared,
    /// Backing storage exists, no pass has touched it yet
    Scheduled,
    /// At least one pass has used it and more may follow
    Executing,
    /// Backing storage returned to the backend
    Released,
    /// Imported resource handed back to its owner
    Retained,
}

/// How a pass accesses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn reads(&self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn writes(&self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// Resource description
#[derive(Debug, Clone, PartialEq)]
pub enum VirtualResource {
    Texture(TextureDescriptor),
    Buffer(BufferDescriptor),
}

impl VirtualResource {
    pub fn is_texture(&self) -> bool {
        matches!(self, VirtualResource::Texture(_))
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            VirtualResource::Texture(desc) => desc.label.as_deref(),
            VirtualResource::Buffer(desc) => desc.label.as_deref(),
        }
    }
}

/// Graph-side record of a declared resource
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub name: String,
    pub resource: VirtualResource,
    pub lifetime: ResourceLifetime,
}
