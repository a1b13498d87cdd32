// Copyright (c) 2025 NovaDE Contributors
// SPDX-License-Identifier: MIT

//! # Client Buffer Handling
//!
//! Tagged buffer provenance and shared-ownership references for client
//! buffers attached to surfaces. The provenance tag replaces pointer-type
//! dispatch: a buffer is either hardware-importable or plain shared
//! memory, and only the former can be scanned out by an overlay layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::allocator::GraphicsBufferHandle;
use crate::geometry::Size;

/// Unique identifier for a client buffer reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    fn new_unique() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Pixel formats the backend routes to hardware layers or the GPU pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit ARGB, 8 bits per channel, alpha first.
    Argb8888,
    /// 32-bit XRGB, 8 bits per channel, alpha ignored.
    Xrgb8888,
    /// YUV 4:2:0, 2-plane Y followed by interleaved UV.
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel of the dominant plane.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            PixelFormat::Argb8888 | PixelFormat::Xrgb8888 => 4,
            PixelFormat::Nv12 => 1,
        }
    }

    /// Effective bit depth, as programmed into a layer at creation.
    pub fn bit_depth(&self) -> u32 {
        match self {
            PixelFormat::Argb8888 => 32,
            PixelFormat::Xrgb8888 => 24,
            PixelFormat::Nv12 => 12,
        }
    }
}

/// Where an attached buffer's memory comes from.
///
/// An unrecognized provenance cannot be constructed; the residual caller
/// contract is only that the surface the buffer is attached to exists.
#[derive(Debug, Clone)]
pub enum ClientBuffer {
    /// A hardware-importable buffer; dimensions and format come from its
    /// own descriptor and it is eligible for direct scanout.
    Imported(GraphicsBufferHandle),
    /// A shared-memory buffer; dimensions are caller-supplied and the
    /// content can only reach the screen through GPU composition.
    SharedMemory {
        width: i32,
        height: i32,
        stride: u32,
        format: PixelFormat,
    },
}

impl ClientBuffer {
    pub fn dimensions(&self) -> Size {
        match self {
            ClientBuffer::Imported(handle) => Size::new(handle.width, handle.height),
            ClientBuffer::SharedMemory { width, height, .. } => Size::new(*width, *height),
        }
    }

    pub fn format(&self) -> PixelFormat {
        match self {
            ClientBuffer::Imported(handle) => handle.format,
            ClientBuffer::SharedMemory { format, .. } => *format,
        }
    }

    /// The importable descriptor, `None` for shared memory.
    pub fn imported_handle(&self) -> Option<&GraphicsBufferHandle> {
        match self {
            ClientBuffer::Imported(handle) => Some(handle),
            ClientBuffer::SharedMemory { .. } => None,
        }
    }
}

/// Shared-ownership reference to an attached client buffer.
///
/// Replacing a surface's `BufferRef` drops the previous reference; there is
/// no manual attach/detach counting to forget.
#[derive(Debug, Clone)]
pub struct BufferRef {
    id: BufferId,
    inner: Arc<ClientBuffer>,
}

impl BufferRef {
    pub fn new(buffer: ClientBuffer) -> Self {
        BufferRef {
            id: BufferId::new_unique(),
            inner: Arc::new(buffer),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn buffer(&self) -> &ClientBuffer {
        &self.inner
    }
}
