//! Buffer types and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be the source of a copy.
        const COPY_SRC = 1 << 2;
        /// Buffer can be the destination of a copy.
        const COPY_DST = 1 << 3;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// Device-local memory, not mappable.
    #[default]
    DeviceLocal,
    /// Host-visible memory that can be written by the CPU.
    HostVisible,
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Memory location.
    pub location: MemoryLocation,
}

impl BufferDescriptor {
    /// Create a new device-local buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            location: MemoryLocation::DeviceLocal,
        }
    }

    /// Create a host-visible staging buffer descriptor.
    pub fn staging(size: u64) -> Self {
        Self {
            label: Some("staging".to_string()),
            size,
            usage: BufferUsage::COPY_SRC,
            location: MemoryLocation::HostVisible,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the memory location.
    pub fn with_location(mut self, location: MemoryLocation) -> Self {
        self.location = location;
        self
    }
}
