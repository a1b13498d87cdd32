// Copyright (c) 2025 NovaDE Contributors
// SPDX-License-Identifier: MIT

//! # Output Driver
//!
//! Per-output double-buffered framebuffer pools, vsync-driven repaint
//! scheduling and mode negotiation. One driver exists per active output;
//! drivers are mutually disjoint, so no locking is needed across outputs.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::allocator::{GraphicsAllocator, GraphicsBufferHandle, MappedBuffer};
use crate::buffer::PixelFormat;
use crate::error::{HwcError, Result};
use crate::hal::{DisplayDevice, DisplayMode, HwLayerId, LayerSpec, ReleaseFence};
use crate::output::{HeadBinding, OutputId, OutputState};

/// Depth of each framebuffer pool. A buffer submitted to hardware is not
/// reused for writing until its release fence is observed, capping
/// in-flight frames at this value.
pub const POOL_DEPTH: usize = 2;

/// Lifecycle of an output driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Disabled,
    Enabling,
    Enabled,
    Disabling,
}

/// Which pool supplied the most recent frame's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolKind {
    Hardware,
    Gpu,
}

struct PoolSlot {
    buffer: GraphicsBufferHandle,
    mapping: Option<MappedBuffer>,
    fence: Option<Box<dyn ReleaseFence>>,
}

/// Fixed-size round-robin buffer set for one output.
struct FramebufferPool {
    slots: Vec<PoolSlot>,
    next: usize,
}

impl FramebufferPool {
    fn allocate(
        allocator: &dyn GraphicsAllocator,
        width: i32,
        height: i32,
        format: PixelFormat,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(POOL_DEPTH);
        for _ in 0..POOL_DEPTH {
            match allocator.allocate(width, height, format) {
                Ok(buffer) => slots.push(PoolSlot {
                    buffer,
                    mapping: None,
                    fence: None,
                }),
                Err(e) => {
                    // Partial allocation is rolled back; the output stays
                    // disabled.
                    for slot in &slots {
                        allocator.free(&slot.buffer);
                    }
                    return Err(e);
                }
            }
        }
        Ok(FramebufferPool { slots, next: 0 })
    }

    /// Flips to the next slot, waiting (bounded) on its release fence
    /// before handing it back for writing.
    fn flip(&mut self, timeout: Duration) -> usize {
        let idx = self.next;
        self.next = (self.next + 1) % self.slots.len();
        self.wait_slot(idx, timeout);
        idx
    }

    fn wait_slot(&mut self, idx: usize, timeout: Duration) {
        if let Some(fence) = self.slots[idx].fence.take() {
            if !fence.wait(timeout) {
                // A stuck wait only delays the next frame; there is no
                // distinguishable timeout error.
                warn!(slot = idx, "release fence wait timed out, reusing buffer");
            }
        }
    }

    fn handle(&self, idx: usize) -> &GraphicsBufferHandle {
        &self.slots[idx].buffer
    }

    fn handles(&self) -> Vec<GraphicsBufferHandle> {
        self.slots.iter().map(|s| s.buffer.clone()).collect()
    }

    fn attach_fence(&mut self, idx: usize, fence: Box<dyn ReleaseFence>) {
        self.slots[idx].fence = Some(fence);
    }

    fn release_all(&mut self, allocator: &dyn GraphicsAllocator) {
        for slot in self.slots.drain(..) {
            if let Some(mapping) = slot.mapping {
                allocator.unmap(&slot.buffer, mapping);
            }
            allocator.free(&slot.buffer);
        }
    }
}

/// Per-output driver: framebuffer pools, mode, pacing bookkeeping.
pub struct OutputDriver {
    id: OutputId,
    head: HeadBinding,
    state: OutputState,
    power: PowerState,
    mode: Option<DisplayMode>,
    hw_pool: Option<FramebufferPool>,
    gpu_pool: Option<FramebufferPool>,
    last_target: Option<(PoolKind, usize)>,
    last_displayed: Option<GraphicsBufferHandle>,
    repaint_scheduled: bool,
}

impl OutputDriver {
    pub fn new(id: OutputId, head: HeadBinding) -> Self {
        OutputDriver {
            id,
            head,
            state: OutputState::new(),
            power: PowerState::Disabled,
            mode: None,
            hw_pool: None,
            gpu_pool: None,
            last_target: None,
            last_displayed: None,
            repaint_scheduled: false,
        }
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn head(&self) -> &HeadBinding {
        &self.head
    }

    pub fn state(&self) -> &OutputState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut OutputState {
        &mut self.state
    }

    pub fn mode(&self) -> Option<&DisplayMode> {
        self.mode.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.power == PowerState::Enabled
    }

    pub fn power_state(&self) -> PowerState {
        self.power
    }

    pub fn schedule_repaint(&mut self) {
        self.repaint_scheduled = true;
    }

    pub fn take_repaint_request(&mut self) -> bool {
        std::mem::take(&mut self.repaint_scheduled)
    }

    /// One refresh cycle of the published mode, used to arm the frame
    /// timer after a commit.
    pub fn refresh_interval(&self) -> Duration {
        self.mode
            .map(|m| m.refresh_interval())
            .unwrap_or(Duration::from_micros(16_667))
    }

    /// Negotiates the output mode. Callable exactly once: the compositor's
    /// output size binds to whatever the hardware already shows; no mode
    /// switch is requested.
    pub fn set_mode(&mut self, device: &mut dyn DisplayDevice) -> Result<DisplayMode> {
        if self.mode.is_some() {
            debug_assert!(false, "set_mode called twice for output {}", self.id.raw());
            error!(
                output = self.id.raw(),
                "mode negotiated twice, ignoring second negotiation"
            );
            return Err(HwcError::ModeAlreadySet(self.id));
        }
        let active = device.current_mode_id();
        let mode = device
            .supported_modes()
            .into_iter()
            .find(|m| m.id == active)
            .ok_or(HwcError::ModeUnavailable(active))?;
        info!(
            output = self.id.raw(),
            width = mode.width,
            height = mode.height,
            refresh_mhz = mode.refresh_mhz,
            "publishing output mode"
        );
        self.mode = Some(mode);
        Ok(mode)
    }

    /// DISABLED -> ENABLING -> ENABLED. Allocates the two double-buffered
    /// pools; any allocation failure keeps the output disabled.
    pub fn enable(
        &mut self,
        device: &mut dyn DisplayDevice,
        allocator: &dyn GraphicsAllocator,
    ) -> Result<()> {
        if self.power == PowerState::Enabled {
            return Ok(());
        }
        self.power = PowerState::Enabling;
        let mode = match self.mode {
            Some(m) => m,
            None => match self.set_mode(device) {
                Ok(m) => m,
                Err(e) => {
                    self.power = PowerState::Disabled;
                    return Err(e);
                }
            },
        };
        let hw_pool =
            match FramebufferPool::allocate(allocator, mode.width, mode.height, PixelFormat::Xrgb8888)
            {
                Ok(p) => p,
                Err(e) => {
                    warn!(output = self.id.raw(), error = %e, "hardware pool allocation failed");
                    self.power = PowerState::Disabled;
                    return Err(e);
                }
            };
        let gpu_pool =
            match FramebufferPool::allocate(allocator, mode.width, mode.height, PixelFormat::Argb8888)
            {
                Ok(p) => p,
                Err(e) => {
                    warn!(output = self.id.raw(), error = %e, "gpu pool allocation failed");
                    let mut hw_pool = hw_pool;
                    hw_pool.release_all(allocator);
                    self.power = PowerState::Disabled;
                    return Err(e);
                }
            };
        self.hw_pool = Some(hw_pool);
        self.gpu_pool = Some(gpu_pool);
        self.power = PowerState::Enabled;
        info!(output = self.id.raw(), "output enabled");
        Ok(())
    }

    /// ENABLED -> DISABLING -> DISABLED. Closes the passthrough layer and
    /// unmaps/frees every pooled buffer. The caller cancels the frame
    /// timer and detaches the GPU renderer.
    pub fn disable(
        &mut self,
        device: &mut dyn DisplayDevice,
        allocator: &dyn GraphicsAllocator,
    ) {
        if self.power == PowerState::Disabled {
            return;
        }
        self.power = PowerState::Disabling;
        if let Some(layer) = self.state.passthrough_layer.take() {
            device.close_layer(layer);
        }
        if let Some(mut pool) = self.hw_pool.take() {
            pool.release_all(allocator);
        }
        if let Some(mut pool) = self.gpu_pool.take() {
            pool.release_all(allocator);
        }
        self.last_target = None;
        self.last_displayed = None;
        self.power = PowerState::Disabled;
        info!(output = self.id.raw(), "output disabled");
    }

    /// Buffers of the GPU-format pool, handed to the GPU renderer at
    /// attach time for framebuffer-object binding.
    pub fn gpu_target_handles(&self) -> Vec<GraphicsBufferHandle> {
        self.gpu_pool.as_ref().map(|p| p.handles()).unwrap_or_default()
    }

    /// Flips to the next hardware-format target.
    pub fn acquire_hw_target(&mut self, fence_timeout: Duration) -> Result<GraphicsBufferHandle> {
        let pool = self
            .hw_pool
            .as_mut()
            .ok_or(HwcError::OutputDisabled(self.id))?;
        let idx = pool.flip(fence_timeout);
        self.last_target = Some((PoolKind::Hardware, idx));
        Ok(pool.handle(idx).clone())
    }

    /// Claims a specific GPU-pool slot (as reported by the GPU renderer's
    /// current-target-index query), waiting on its release fence.
    pub fn claim_gpu_target(
        &mut self,
        idx: usize,
        fence_timeout: Duration,
    ) -> Result<GraphicsBufferHandle> {
        let pool = self
            .gpu_pool
            .as_mut()
            .ok_or(HwcError::OutputDisabled(self.id))?;
        if idx >= pool.slots.len() {
            return Err(HwcError::Hardware(format!(
                "gpu renderer reported target index {} beyond pool depth",
                idx
            )));
        }
        pool.wait_slot(idx, fence_timeout);
        self.last_target = Some((PoolKind::Gpu, idx));
        Ok(pool.handle(idx).clone())
    }

    /// The reserved layer carrying the GPU-composed buffer, created once
    /// per output and reused every fallback frame.
    pub fn ensure_passthrough_layer(
        &mut self,
        device: &mut dyn DisplayDevice,
    ) -> Result<HwLayerId> {
        if let Some(layer) = self.state.passthrough_layer {
            return Ok(layer);
        }
        let mode = self.mode.ok_or(HwcError::ModeNotSet(self.id))?;
        let spec = LayerSpec {
            width: mode.width,
            height: mode.height,
            format: PixelFormat::Argb8888,
            bit_depth: PixelFormat::Argb8888.bit_depth(),
        };
        let layer = device.create_layer(&spec)?;
        debug!(
            output = self.id.raw(),
            layer = layer.0,
            "created gpu passthrough layer"
        );
        self.state.passthrough_layer = Some(layer);
        Ok(layer)
    }

    /// Records a successful commit: the frame's target becomes the most
    /// recently displayed buffer and its slot holds the release fence.
    pub fn commit_finished(&mut self, fence: Box<dyn ReleaseFence>) {
        let Some((kind, idx)) = self.last_target else {
            warn!(
                output = self.id.raw(),
                "commit finished without a recorded target"
            );
            return;
        };
        let pool = match kind {
            PoolKind::Hardware => self.hw_pool.as_mut(),
            PoolKind::Gpu => self.gpu_pool.as_mut(),
        };
        if let Some(pool) = pool {
            self.last_displayed = Some(pool.handle(idx).clone());
            pool.attach_fence(idx, fence);
        }
    }

    /// Raw pixel rows of the most recently displayed buffer. Row order
    /// honors the device's flipped-capture capability.
    pub fn read_pixels(&self, allocator: &dyn GraphicsAllocator) -> Result<Vec<Vec<u8>>> {
        let handle = self
            .last_displayed
            .as_ref()
            .ok_or(HwcError::OutputDisabled(self.id))?;
        let mapping = allocator.map(handle)?;
        let row_bytes = (handle.width as u32 * handle.format.bytes_per_pixel()) as usize;
        let stride = handle.stride as usize;
        let mut rows = Vec::with_capacity(handle.height as usize);
        {
            let data = mapping
                .data
                .lock()
                .map_err(|_| HwcError::BufferMap("mapping lock poisoned".into()))?;
            for y in 0..handle.height as usize {
                let start = y * stride;
                match data.get(start..start + row_bytes) {
                    Some(row) => rows.push(row.to_vec()),
                    None => break,
                }
            }
        }
        allocator.unmap(handle, mapping);
        if self.head.capabilities.flipped_capture {
            rows.reverse();
        }
        Ok(rows)
    }
}
