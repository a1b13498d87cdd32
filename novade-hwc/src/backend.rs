// This is novade-hwc/src/backend.rs
// The backend orchestrator: owns all devices and output drivers, dispatches
// hot-plug events, drives the two-phase repaint protocol and batches
// hardware commits.

//! The [`HwcBackend`] is the single entry point the compositor core talks
//! to. It runs entirely on the host's main loop thread; the only other
//! threads are the vsync/timer helpers in [`crate::vsync`], which reach it
//! exclusively through the calloop channel returned by [`HwcBackend::new`].

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use calloop::channel::{channel, Channel, Sender};
use tracing::{debug, error, info, warn};

use crate::allocator::GraphicsAllocator;
use crate::buffer::ClientBuffer;
use crate::config::HwcConfig;
use crate::error::{HwcError, Result};
use crate::geometry::Region;
use crate::gpu::GpuRenderer;
use crate::hal::{DeviceId, DisplayDevice, HotplugEvent};
use crate::output::{HeadBinding, OutputId};
use crate::output_driver::OutputDriver;
use crate::renderer::{PendingTarget, Renderer, RepaintStats, ViewDesc};
use crate::surface::{SurfaceId, SurfaceTable};
use crate::vsync::{BackendEvent, FrameTimers, SoftwareVsync};

/// Capacity of the frame-timing ring used for frame-rate introspection.
pub const FRAME_TIMING_SAMPLES: usize = 64;

/// Fixed-size circular buffer of commit timestamps.
#[derive(Debug, Default)]
pub struct FrameTimings {
    samples: Vec<Instant>,
    cursor: usize,
}

impl FrameTimings {
    fn push(&mut self, t: Instant) {
        if self.samples.len() < FRAME_TIMING_SAMPLES {
            self.samples.push(t);
        } else {
            self.samples[self.cursor] = t;
        }
        self.cursor = (self.cursor + 1) % FRAME_TIMING_SAMPLES;
    }

    pub fn samples(&self) -> &[Instant] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// The frame-finished signal released back to the compositor core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFinished {
    pub output: OutputId,
    /// True when synthesized by the frame timer rather than a vsync tick.
    pub synthesized: bool,
}

/// Pending-state record of one frame cycle. Exclusively owned by the
/// repaint cycle that created it and destroyed unconditionally at flush
/// end, even on partial failure.
#[derive(Debug, Default)]
struct PendingFrame {
    targets: HashMap<DeviceId, PendingTarget>,
}

/// Two-phase commit protocol states. BEGIN and PROGRAMMED share the
/// `Begun` variant; the pending record's population distinguishes them.
enum FrameCycle {
    Idle,
    Begun(PendingFrame),
}

/// The hardware-composition backend orchestrator.
pub struct HwcBackend {
    config: HwcConfig,
    devices: HashMap<DeviceId, Box<dyn DisplayDevice>>,
    outputs: HashMap<OutputId, OutputDriver>,
    surfaces: SurfaceTable,
    renderer: Renderer,
    allocator: Box<dyn GraphicsAllocator>,
    gpu: Box<dyn GpuRenderer>,
    cycle: FrameCycle,
    timings: FrameTimings,
    stats: RepaintStats,
    timers: FrameTimers,
    software_vsync: Option<SoftwareVsync>,
    events_tx: Sender<BackendEvent>,
    /// Outputs that committed and are waiting for a frame-finished signal.
    awaiting_finish: HashSet<OutputId>,
    /// Device whose hardware vsync interrupt drives the shared generator.
    vsync_reference: Option<DeviceId>,
}

impl HwcBackend {
    /// Creates the backend and the event channel the host must insert into
    /// its calloop event loop, feeding received events back through
    /// [`HwcBackend::handle_event`].
    pub fn new(
        config: HwcConfig,
        allocator: Box<dyn GraphicsAllocator>,
        gpu: Box<dyn GpuRenderer>,
    ) -> (Self, Channel<BackendEvent>) {
        let (events_tx, events_rx) = channel();
        let timers = FrameTimers::spawn(events_tx.clone());
        let backend = HwcBackend {
            config,
            devices: HashMap::new(),
            outputs: HashMap::new(),
            surfaces: SurfaceTable::new(),
            renderer: Renderer::new(),
            allocator,
            gpu,
            cycle: FrameCycle::Idle,
            timings: FrameTimings::default(),
            stats: RepaintStats::default(),
            timers,
            software_vsync: None,
            events_tx,
            awaiting_finish: HashSet::new(),
            vsync_reference: None,
        };
        (backend, events_rx)
    }

    /// A sender for the backend's event channel, handed to whatever thread
    /// services the real vsync interrupt.
    pub fn event_sender(&self) -> Sender<BackendEvent> {
        self.events_tx.clone()
    }

    // --- device and head management -------------------------------------

    /// Registers a display device. The first device becomes the vsync
    /// reference: its hardware interrupt drives the shared generator.
    pub fn add_device(&mut self, mut device: Box<dyn DisplayDevice>) -> DeviceId {
        let id = device.id();
        if self.vsync_reference.is_none() {
            if let Err(e) = device.set_vsync_enabled(true) {
                warn!(device = id.raw(), error = %e, "enabling vsync on reference device failed");
            } else {
                self.vsync_reference = Some(id);
            }
        }
        info!(device = id.raw(), "device registered");
        self.devices.insert(id, device);
        id
    }

    /// Removes a device, disabling and detaching every output bound to it.
    pub fn remove_device(&mut self, id: DeviceId) {
        let bound: Vec<OutputId> = self
            .outputs
            .iter()
            .filter(|(_, d)| d.head().device == id)
            .map(|(o, _)| *o)
            .collect();
        for output in bound {
            self.destroy_output(output);
        }
        if self.devices.remove(&id).is_some() {
            info!(device = id.raw(), "device removed");
        }
        if self.vsync_reference == Some(id) {
            self.vsync_reference = None;
        }
    }

    /// Binds a logical output to a physical device, capturing the device's
    /// mode list and capabilities, and schedules a repaint.
    pub fn attach_head(&mut self, output: OutputId, device: DeviceId) -> Result<()> {
        let Some(dev) = self.devices.get(&device) else {
            debug_assert!(false, "attach_head with unregistered device {}", device.raw());
            error!(
                output = output.raw(),
                device = device.raw(),
                "attach_head: device not registered"
            );
            return Err(HwcError::DeviceNotFound(device));
        };
        let head = HeadBinding {
            device,
            modes: dev.supported_modes(),
            capabilities: dev.capabilities(),
        };
        let mut driver = OutputDriver::new(output, head);
        driver.schedule_repaint();
        self.outputs.insert(output, driver);
        info!(output = output.raw(), device = device.raw(), "head attached");
        Ok(())
    }

    /// Unbinds and destroys an output.
    pub fn detach_head(&mut self, output: OutputId) {
        self.destroy_output(output);
    }

    /// Outputs whose head changed since the last call; the host schedules
    /// a repaint for each.
    pub fn take_repaint_requests(&mut self) -> Vec<OutputId> {
        self.outputs
            .values_mut()
            .filter_map(|d| d.take_repaint_request().then(|| d.id()))
            .collect()
    }

    // --- output lifecycle ------------------------------------------------

    pub fn enable_output(&mut self, output: OutputId) -> Result<()> {
        let driver = self
            .outputs
            .get_mut(&output)
            .ok_or(HwcError::OutputNotFound(output))?;
        let device_id = driver.head().device;
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(HwcError::DeviceNotFound(device_id))?;
        driver.enable(device.as_mut(), self.allocator.as_ref())?;
        let targets = driver.gpu_target_handles();
        self.gpu.attach_output(output, &targets)?;
        driver.schedule_repaint();
        Ok(())
    }

    pub fn disable_output(&mut self, output: OutputId) {
        self.timers.cancel(output);
        self.awaiting_finish.remove(&output);
        let Some(driver) = self.outputs.get_mut(&output) else {
            return;
        };
        let device_id = driver.head().device;
        // Close the surface layers this output still holds; the layer set
        // must track the (now empty) active set.
        let active: Vec<SurfaceId> = driver.state().active.iter().copied().collect();
        if let Some(device) = self.devices.get_mut(&device_id) {
            for id in active {
                if let Some(state) = self.surfaces.get_mut(id) {
                    if let Some(binding) = state.layers.remove(&device_id) {
                        device.close_layer(binding.layer);
                    }
                    state.generations.remove(&output);
                }
                driver.state_mut().active.remove(&id);
            }
            driver.disable(device.as_mut(), self.allocator.as_ref());
        }
        self.gpu.detach_output(output);
    }

    pub fn destroy_output(&mut self, output: OutputId) {
        self.disable_output(output);
        if self.outputs.remove(&output).is_some() {
            info!(output = output.raw(), "output destroyed");
        }
    }

    pub fn output_driver(&self, output: OutputId) -> Option<&OutputDriver> {
        self.outputs.get(&output)
    }

    // --- surface lifecycle -----------------------------------------------

    /// Attaches a client buffer to a surface, lazily creating its state.
    /// Never touches hardware layers; programming happens at repaint.
    pub fn attach_buffer(&mut self, surface: SurfaceId, buffer: ClientBuffer) {
        let (old_ref, old_mapping) = self.surfaces.attach(surface, buffer);
        if let (Some(old_ref), Some(mapping)) = (old_ref, old_mapping) {
            if let Some(handle) = old_ref.buffer().imported_handle() {
                self.allocator.unmap(handle, mapping);
            }
        }
    }

    /// Destroys a surface's state, synchronously closing every hardware
    /// layer it holds first; a dangling layer cannot be reclaimed by the
    /// hardware itself.
    pub fn destroy_surface(&mut self, surface: SurfaceId) {
        let Some(mut state) = self.surfaces.remove(surface) else {
            debug!(surface = surface.raw(), "destroy of untracked surface");
            return;
        };
        for (device_id, binding) in state.layers.drain() {
            match self.devices.get_mut(&device_id) {
                Some(device) => device.close_layer(binding.layer),
                None => warn!(
                    surface = surface.raw(),
                    device = device_id.raw(),
                    "surface held a layer on a removed device"
                ),
            }
        }
        for driver in self.outputs.values_mut() {
            driver.state_mut().active.remove(&surface);
        }
        if let Some(mapping) = state.mapping.take() {
            if let Some(handle) = state.buffer.as_ref().and_then(|b| b.buffer().imported_handle())
            {
                self.allocator.unmap(handle, mapping);
            }
        }
        // Dropping the state releases the buffer reference last, after
        // every layer is closed.
    }

    pub fn surfaces(&self) -> &SurfaceTable {
        &self.surfaces
    }

    // --- two-phase repaint protocol ---------------------------------------

    /// IDLE -> BEGIN: clears the per-frame debug accumulators and opens
    /// the pending-state record.
    pub fn begin_frame(&mut self) {
        if matches!(self.cycle, FrameCycle::Begun(_)) {
            debug_assert!(false, "begin_frame while a cycle is open");
            warn!("begin_frame while a cycle is open, discarding pending state");
        }
        self.stats = RepaintStats::default();
        self.cycle = FrameCycle::Begun(PendingFrame::default());
    }

    /// BEGIN -> PROGRAMMED: runs the repaint algorithm for one output and
    /// records its target framebuffer into the pending state.
    pub fn repaint_output(
        &mut self,
        output: OutputId,
        damage: &Region,
        views: &[ViewDesc],
    ) -> Result<()> {
        let FrameCycle::Begun(pending) = &mut self.cycle else {
            debug_assert!(false, "repaint_output outside an open frame cycle");
            error!(output = output.raw(), "repaint_output outside an open frame cycle");
            return Err(HwcError::FrameCycleViolation);
        };
        let driver = self
            .outputs
            .get_mut(&output)
            .ok_or(HwcError::OutputNotFound(output))?;
        let device_id = driver.head().device;
        let device = self
            .devices
            .get_mut(&device_id)
            .ok_or(HwcError::DeviceNotFound(device_id))?;
        let plane_budget = self
            .config
            .plane_budget_override
            .unwrap_or(driver.head().capabilities.max_hardware_planes);

        let target = self.renderer.repaint_output(
            device.as_mut(),
            driver,
            &mut self.surfaces,
            views,
            damage,
            self.allocator.as_ref(),
            self.gpu.as_mut(),
            &mut self.stats,
            plane_budget,
            self.config.fence_wait_timeout(),
        )?;
        if let Some(target) = target {
            pending.targets.insert(device_id, target);
        }
        Ok(())
    }

    /// PROGRAMMED -> FLUSH -> IDLE: applies the client buffer where the
    /// device asks for it, samples the frame-timing ring, commits each
    /// device and collects release fences. A failing device is logged and
    /// isolated; the others still commit. The pending record is destroyed
    /// unconditionally, even on partial failure.
    pub fn flush_frame(&mut self) -> Result<()> {
        let cycle = std::mem::replace(&mut self.cycle, FrameCycle::Idle);
        let FrameCycle::Begun(pending) = cycle else {
            debug_assert!(false, "flush_frame outside an open frame cycle");
            error!("flush_frame outside an open frame cycle");
            return Err(HwcError::FrameCycleViolation);
        };
        for (device_id, target) in pending.targets {
            let Some(device) = self.devices.get_mut(&device_id) else {
                warn!(device = device_id.raw(), "pending target for a removed device");
                continue;
            };
            match device.prepare_layers() {
                Ok(prep) if prep.requires_client_buffer => {
                    if let Some(client) = &target.client_buffer {
                        if let Err(e) = device.set_client_buffer(client) {
                            warn!(device = device_id.raw(), error = %e, "set_client_buffer failed");
                        }
                    } else {
                        warn!(
                            device = device_id.raw(),
                            "device wants a client buffer but none was composed"
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(device = device_id.raw(), error = %e, "prepare_layers failed"),
            }
            self.timings.push(Instant::now());
            if self.config.debug_frame_timing {
                debug!(
                    device = device_id.raw(),
                    samples = self.timings.len(),
                    "frame timing sampled"
                );
            }
            match device.commit() {
                Ok(fence) => {
                    if let Some(driver) = self.outputs.get_mut(&target.output) {
                        driver.commit_finished(fence);
                        self.timers.arm(target.output, driver.refresh_interval());
                        self.awaiting_finish.insert(target.output);
                    }
                }
                Err(e) => {
                    // Partial-failure isolation: this device's frame is
                    // lost, sibling devices still commit.
                    error!(device = device_id.raw(), error = %e, "hardware commit failed");
                }
            }
        }
        Ok(())
    }

    // --- events and pacing -----------------------------------------------

    /// Feeds one event from the backend channel. Returns the
    /// frame-finished signals to release to the compositor core.
    pub fn handle_event(&mut self, event: BackendEvent) -> Vec<FrameFinished> {
        match event {
            BackendEvent::Vsync => {
                let finished: Vec<FrameFinished> = self
                    .awaiting_finish
                    .drain()
                    .map(|output| FrameFinished {
                        output,
                        synthesized: false,
                    })
                    .collect();
                for f in &finished {
                    self.timers.cancel(f.output);
                }
                finished
            }
            BackendEvent::FrameTimerExpired(output) => {
                if self.awaiting_finish.remove(&output) {
                    vec![FrameFinished {
                        output,
                        synthesized: true,
                    }]
                } else {
                    Vec::new()
                }
            }
            BackendEvent::Hotplug(HotplugEvent::DeviceAdded(id)) => {
                // The host registers the device object via add_device.
                info!(device = id.raw(), "hotplug: device added");
                Vec::new()
            }
            BackendEvent::Hotplug(HotplugEvent::DeviceRemoved(id)) => {
                info!(device = id.raw(), "hotplug: device removed");
                self.remove_device(id);
                Vec::new()
            }
        }
    }

    /// Starts the software vsync generator thread. Used when no hardware
    /// interrupt is available.
    pub fn start_software_vsync(&mut self) {
        if self.software_vsync.is_some() {
            return;
        }
        let interval = self
            .config
            .software_vsync_interval()
            .unwrap_or(Duration::from_micros(16_667));
        self.software_vsync = Some(SoftwareVsync::spawn(interval, self.events_tx.clone()));
    }

    pub fn stop_software_vsync(&mut self) {
        self.software_vsync = None;
    }

    // --- introspection ----------------------------------------------------

    /// Raw pixel rows of an output's most recently displayed buffer.
    pub fn read_output_pixels(&self, output: OutputId) -> Result<Vec<Vec<u8>>> {
        let driver = self
            .outputs
            .get(&output)
            .ok_or(HwcError::OutputNotFound(output))?;
        driver.read_pixels(self.allocator.as_ref())
    }

    pub fn frame_timings(&self) -> &FrameTimings {
        &self.timings
    }

    /// Debug accumulators of the current (or most recent) frame cycle.
    pub fn repaint_stats(&self) -> RepaintStats {
        self.stats
    }
}
