// This is novade-hwc/src/hal.rs
// The seam to the display hardware abstraction layer: devices, overlay
// layers, modes, capabilities, commits and release fences.

use std::time::Duration;

use crate::allocator::GraphicsBufferHandle;
use crate::buffer::PixelFormat;
use crate::error::Result;
use crate::geometry::Rect;
use crate::transform::Rotation;

/// Identifier of one physical display pipeline. Immutable once a head is
/// bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u32);

impl DeviceId {
    pub const fn new(id: u32) -> Self {
        DeviceId(id)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Identifier of a hardware overlay layer on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HwLayerId(pub u32);

/// Identifier of a display mode within a device's mode list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModeId(pub u32);

/// A display mode as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode {
    pub id: ModeId,
    pub width: i32,
    pub height: i32,
    /// Refresh rate in millihertz for precision.
    pub refresh_mhz: u32,
}

impl DisplayMode {
    /// Duration of one refresh cycle, used to arm the frame timer.
    pub fn refresh_interval(&self) -> Duration {
        if self.refresh_mhz == 0 {
            // An unreported refresh rate paces at a conventional 60 Hz.
            return Duration::from_micros(16_667);
        }
        Duration::from_secs_f64(1000.0 / self.refresh_mhz as f64)
    }
}

/// Static capabilities of a display device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Maximum number of concurrently scanned-out overlay planes.
    pub max_hardware_planes: u32,
    /// Captured rows arrive bottom-up when set.
    pub flipped_capture: bool,
}

/// Per-layer alpha interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaMode {
    Premultiplied,
    Ignored,
}

/// Per-layer blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Ordinary surfaces blend over what is beneath them.
    SourceOver,
    /// Opaque overwrite, used for video-band layers and the passthrough.
    Opaque,
}

/// How a layer's content is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionMode {
    /// Scanned out directly from the attached buffer.
    Device,
    /// Carries the GPU-composed client buffer.
    Client,
}

/// Creation-time parameters of a layer. A layer is never resized or
/// re-formatted, only recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    pub width: i32,
    pub height: i32,
    pub format: PixelFormat,
    pub bit_depth: u32,
}

/// Result of the prepare-layers query issued at flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareResult {
    /// The device needs the GPU-composed client buffer applied this frame.
    pub requires_client_buffer: bool,
}

/// Hot-plug notifications dispatched by the host's device monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugEvent {
    DeviceAdded(DeviceId),
    DeviceRemoved(DeviceId),
}

/// Synchronization primitive signaled when the display hardware stops
/// reading a submitted buffer.
pub trait ReleaseFence: Send {
    /// Waits up to `timeout`; returns whether the fence signaled in time.
    fn wait(&self, timeout: Duration) -> bool;
}

/// One physical display pipeline.
///
/// All per-layer setters stage state; nothing reaches the screen before
/// [`DisplayDevice::commit`] applies the staged configuration atomically.
pub trait DisplayDevice {
    fn id(&self) -> DeviceId;

    fn capabilities(&self) -> Capabilities;

    fn supported_modes(&self) -> Vec<DisplayMode>;

    /// The mode the hardware is currently driving.
    fn current_mode_id(&self) -> ModeId;

    fn create_layer(&mut self, spec: &LayerSpec) -> Result<HwLayerId>;

    fn close_layer(&mut self, layer: HwLayerId);

    fn set_layer_buffer(&mut self, layer: HwLayerId, buffer: &GraphicsBufferHandle)
        -> Result<()>;

    fn set_layer_alpha(&mut self, layer: HwLayerId, alpha: AlphaMode) -> Result<()>;

    fn set_layer_destination(&mut self, layer: HwLayerId, dest: Rect) -> Result<()>;

    fn set_layer_source_crop(&mut self, layer: HwLayerId, crop: Rect) -> Result<()>;

    fn set_layer_z_order(&mut self, layer: HwLayerId, z: u32) -> Result<()>;

    fn set_layer_blend(&mut self, layer: HwLayerId, blend: BlendMode) -> Result<()>;

    fn set_layer_composition(&mut self, layer: HwLayerId, mode: CompositionMode) -> Result<()>;

    fn set_layer_transform(&mut self, layer: HwLayerId, rotation: Rotation) -> Result<()>;

    /// Queries whether the staged configuration needs the client buffer.
    fn prepare_layers(&mut self) -> Result<PrepareResult>;

    fn set_client_buffer(&mut self, buffer: &GraphicsBufferHandle) -> Result<()>;

    /// Applies the staged configuration and returns the release fence for
    /// the outgoing frame's buffers.
    fn commit(&mut self) -> Result<Box<dyn ReleaseFence>>;

    fn set_vsync_enabled(&mut self, enabled: bool) -> Result<()>;
}
