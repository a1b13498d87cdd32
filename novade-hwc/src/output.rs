// This is novade-hwc/src/output.rs
// Per-output bookkeeping and the head/device binding.

use std::collections::HashSet;

use crate::hal::{Capabilities, DeviceId, DisplayMode, HwLayerId};
use crate::surface::SurfaceId;

/// Identifier of a logical output, assigned by the compositor core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(u32);

impl OutputId {
    pub const fn new(id: u32) -> Self {
        OutputId(id)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Binding of a logical output to a physical device, with the device's
/// mode list and capabilities captured at attach time.
#[derive(Debug, Clone)]
pub struct HeadBinding {
    pub device: DeviceId,
    pub modes: Vec<DisplayMode>,
    pub capabilities: Capabilities,
}

/// Per-output hardware-composition state.
///
/// Invariant: a hardware layer on this output's device exists for every
/// member of `active` and only for those (plus the reserved passthrough
/// layer).
#[derive(Debug, Default)]
pub struct OutputState {
    /// Surfaces holding a hardware layer on this output, as computed by
    /// the most recent repaint.
    pub active: HashSet<SurfaceId>,

    /// Repaint generation counter; surfaces stamped with an older value
    /// are swept at end of repaint.
    pub generation: u64,

    /// Reserved layer carrying the GPU-composed passthrough buffer.
    /// Created once per output, `None` until first needed.
    pub passthrough_layer: Option<HwLayerId>,
}

impl OutputState {
    pub fn new() -> Self {
        OutputState::default()
    }

    /// Opens a new repaint generation and returns it.
    pub fn advance_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }
}
