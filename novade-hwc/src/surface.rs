// Copyright (c) 2025 NovaDE Contributors
// SPDX-License-Identifier: MIT

//! # Surface State
//!
//! Per-surface hardware-composition bookkeeping: the attached client
//! buffer, the per-device cache of hardware layers, and the geometry
//! computed by the most recent repaint. States live in an id-indexed
//! table owned by the backend; nothing is stashed on foreign objects.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::allocator::MappedBuffer;
use crate::buffer::{BufferRef, ClientBuffer, PixelFormat};
use crate::geometry::{Rect, Size};
use crate::hal::{BlendMode, CompositionMode, DeviceId, HwLayerId};
use crate::output::OutputId;
use crate::transform::Rotation;

/// Identifier of a surface, assigned by the compositor core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl SurfaceId {
    pub const fn new(id: u64) -> Self {
        SurfaceId(id)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A hardware layer held by a surface on one device.
///
/// Creation fixes the format; a format change on the surface forces the
/// layer to be closed and the view to fall back to GPU composition for
/// that frame.
#[derive(Debug, Clone, Copy)]
pub struct LayerBinding {
    pub layer: HwLayerId,
    pub format: PixelFormat,
    pub width: i32,
    pub height: i32,
}

/// Per-surface hardware-composition state.
#[derive(Debug, Default)]
pub struct SurfaceState {
    /// Currently attached client buffer, if any.
    pub buffer: Option<BufferRef>,

    /// Dimensions recorded at attach time (descriptor-derived for imported
    /// buffers, caller-supplied for shared memory).
    pub buffer_size: Size,

    /// CPU mapping of the attached buffer, established lazily in Pass B.
    pub mapping: Option<MappedBuffer>,

    /// Cached hardware layer per device. A surface visible on several
    /// outputs holds one layer per device, never two for the same one.
    pub layers: HashMap<DeviceId, LayerBinding>,

    /// Geometry and attributes from the most recent repaint touching this
    /// surface.
    pub dest_rect: Option<Rect>,
    pub src_rect: Option<Rect>,
    pub z_order: Option<u32>,
    pub blend: Option<BlendMode>,
    pub composition: Option<CompositionMode>,
    pub rotation: Rotation,

    /// Repaint generation this surface was last assigned in, per output.
    /// The end-of-repaint sweep closes layers whose stamp is stale.
    pub generations: HashMap<OutputId, u64>,
}

/// Id-indexed table of surface states.
#[derive(Default)]
pub struct SurfaceTable {
    entries: HashMap<SurfaceId, SurfaceState>,
}

impl SurfaceTable {
    pub fn new() -> Self {
        SurfaceTable::default()
    }

    /// Lazily allocates state on first use; idempotent.
    pub fn create_or_get(&mut self, id: SurfaceId) -> &mut SurfaceState {
        self.entries.entry(id).or_insert_with(|| {
            trace!(surface = id.raw(), "creating surface state");
            SurfaceState::default()
        })
    }

    pub fn get(&self, id: SurfaceId) -> Option<&SurfaceState> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: SurfaceId) -> Option<&mut SurfaceState> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: SurfaceId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Replaces the attached buffer, releasing the previous reference, and
    /// records the new dimensions. Never touches hardware layers; layer
    /// programming is deferred to repaint.
    ///
    /// Returns the replaced reference so the caller can unmap it.
    pub fn attach(&mut self, id: SurfaceId, buffer: ClientBuffer) -> (Option<BufferRef>, Option<MappedBuffer>) {
        let state = self.create_or_get(id);
        let size = buffer.dimensions();
        debug!(
            surface = id.raw(),
            width = size.width,
            height = size.height,
            "attaching buffer"
        );
        let old_mapping = state.mapping.take();
        let old = state.buffer.replace(BufferRef::new(buffer));
        state.buffer_size = size;
        (old, old_mapping)
    }

    /// Removes and returns a surface's state. The caller must close the
    /// per-device layers before dropping it; no SurfaceState may outlive
    /// its hardware layers.
    pub fn remove(&mut self, id: SurfaceId) -> Option<SurfaceState> {
        self.entries.remove(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = SurfaceId> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shm_buffer(width: i32, height: i32) -> ClientBuffer {
        ClientBuffer::SharedMemory {
            width,
            height,
            stride: (width * 4) as u32,
            format: PixelFormat::Argb8888,
        }
    }

    #[test]
    fn test_create_or_get_is_idempotent() {
        let mut table = SurfaceTable::new();
        let id = SurfaceId::new(1);
        table.create_or_get(id).z_order = Some(42);
        assert_eq!(table.create_or_get(id).z_order, Some(42));
        assert!(table.contains(id));
    }

    #[test]
    fn test_attach_replaces_buffer_and_records_size() {
        let mut table = SurfaceTable::new();
        let id = SurfaceId::new(7);
        let (old, _) = table.attach(id, shm_buffer(64, 64));
        assert!(old.is_none());
        let first_id = table.get(id).unwrap().buffer.as_ref().unwrap().id();

        let (old, _) = table.attach(id, shm_buffer(128, 32));
        assert_eq!(old.unwrap().id(), first_id);
        let state = table.get(id).unwrap();
        assert_eq!(state.buffer_size, Size::new(128, 32));
        assert_ne!(state.buffer.as_ref().unwrap().id(), first_id);
    }

    #[test]
    fn test_remove_returns_state_with_layer_map() {
        let mut table = SurfaceTable::new();
        let id = SurfaceId::new(3);
        let state = table.create_or_get(id);
        state.layers.insert(
            DeviceId::new(0),
            LayerBinding {
                layer: HwLayerId(11),
                format: PixelFormat::Xrgb8888,
                width: 800,
                height: 600,
            },
        );
        let removed = table.remove(id).unwrap();
        assert_eq!(removed.layers.len(), 1);
        assert!(table.get(id).is_none());
    }
}
