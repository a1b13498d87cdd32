// This is novade-hwc/src/allocator.rs
// The seam to the external graphics allocator.

use std::sync::{Arc, Mutex};

use crate::buffer::PixelFormat;
use crate::error::Result;

/// Opaque handle to the memory backing an allocated buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryHandle(pub u64);

/// Descriptor of an allocated hardware buffer.
///
/// The allocator owns the memory; the backend only ever references it and
/// frees it explicitly on output disable or surface destruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsBufferHandle {
    pub width: i32,
    pub height: i32,
    pub stride: u32,
    pub format: PixelFormat,
    pub memory: MemoryHandle,
}

/// CPU-visible view of a mapped buffer.
///
/// The payload is shared so a mapping can be handed to the readback path
/// while the allocator keeps its own reference.
#[derive(Debug, Clone)]
pub struct MappedBuffer {
    pub data: Arc<Mutex<Vec<u8>>>,
}

/// The external graphics allocator.
pub trait GraphicsAllocator {
    fn allocate(&self, width: i32, height: i32, format: PixelFormat)
        -> Result<GraphicsBufferHandle>;

    fn free(&self, handle: &GraphicsBufferHandle);

    fn map(&self, handle: &GraphicsBufferHandle) -> Result<MappedBuffer>;

    fn unmap(&self, handle: &GraphicsBufferHandle, mapping: MappedBuffer);
}
