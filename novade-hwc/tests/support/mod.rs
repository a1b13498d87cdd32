// Shared test rig: recording fakes for the display HAL, the allocator and
// the GPU renderer, plus helpers to assemble a backend with one enabled
// 1920x1080@60 output.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use calloop::channel::Channel;

use novade_hwc::allocator::{GraphicsAllocator, GraphicsBufferHandle, MappedBuffer, MemoryHandle};
use novade_hwc::backend::HwcBackend;
use novade_hwc::buffer::{ClientBuffer, PixelFormat};
use novade_hwc::error::{HwcError, Result};
use novade_hwc::geometry::{Rect, Region};
use novade_hwc::gpu::GpuRenderer;
use novade_hwc::hal::{
    AlphaMode, BlendMode, Capabilities, CompositionMode, DeviceId, DisplayDevice, DisplayMode,
    HwLayerId, LayerSpec, ModeId, PrepareResult, ReleaseFence,
};
use novade_hwc::output::OutputId;
use novade_hwc::renderer::ViewDesc;
use novade_hwc::surface::SurfaceId;
use novade_hwc::transform::{Rotation, Transform};
use novade_hwc::vsync::BackendEvent;
use novade_hwc::HwcConfig;

// --- fake display device -------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct FakeLayer {
    pub spec: Option<LayerSpec>,
    pub buffer: Option<GraphicsBufferHandle>,
    pub alpha: Option<AlphaMode>,
    pub dest: Option<Rect>,
    pub crop: Option<Rect>,
    pub z: Option<u32>,
    pub blend: Option<BlendMode>,
    pub composition: Option<CompositionMode>,
    pub rotation: Option<Rotation>,
}

#[derive(Debug, Default)]
pub struct DeviceLog {
    pub layers: HashMap<u32, FakeLayer>,
    pub created: u32,
    pub closed: Vec<u32>,
    pub commits: u32,
    pub programming_calls: u32,
    pub client_buffer_sets: u32,
    pub fence_waits: u32,
    pub vsync_enabled: bool,
    pub fail_create: bool,
    pub fail_commit: bool,
}

impl DeviceLog {
    pub fn open_layers(&self) -> usize {
        self.layers.len()
    }

    /// The single open layer, for scenarios expecting exactly one.
    pub fn sole_layer(&self) -> FakeLayer {
        assert_eq!(self.layers.len(), 1, "expected exactly one open layer");
        self.layers.values().next().unwrap().clone()
    }
}

pub struct FakeFence {
    log: Arc<Mutex<DeviceLog>>,
}

impl ReleaseFence for FakeFence {
    fn wait(&self, _timeout: Duration) -> bool {
        self.log.lock().unwrap().fence_waits += 1;
        true
    }
}

pub struct FakeDevice {
    id: DeviceId,
    caps: Capabilities,
    modes: Vec<DisplayMode>,
    current_mode: ModeId,
    next_layer: u32,
    staged_client: bool,
    pub log: Arc<Mutex<DeviceLog>>,
}

pub fn default_mode() -> DisplayMode {
    DisplayMode {
        id: ModeId(1),
        width: 1920,
        height: 1080,
        refresh_mhz: 60_000,
    }
}

impl FakeDevice {
    pub fn new(id: u32) -> (Self, Arc<Mutex<DeviceLog>>) {
        let log = Arc::new(Mutex::new(DeviceLog::default()));
        let device = FakeDevice {
            id: DeviceId::new(id),
            caps: Capabilities {
                max_hardware_planes: 4,
                flipped_capture: false,
            },
            modes: vec![default_mode()],
            current_mode: ModeId(1),
            next_layer: 1,
            staged_client: false,
            log: log.clone(),
        };
        (device, log)
    }

    pub fn with_capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    fn with_layer<R>(
        &mut self,
        layer: HwLayerId,
        f: impl FnOnce(&mut FakeLayer) -> R,
    ) -> Result<R> {
        let mut log = self.log.lock().unwrap();
        log.programming_calls += 1;
        match log.layers.get_mut(&layer.0) {
            Some(entry) => Ok(f(entry)),
            None => Err(HwcError::Hardware(format!("unknown layer {}", layer.0))),
        }
    }
}

impl DisplayDevice for FakeDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn supported_modes(&self) -> Vec<DisplayMode> {
        self.modes.clone()
    }

    fn current_mode_id(&self) -> ModeId {
        self.current_mode
    }

    fn create_layer(&mut self, spec: &LayerSpec) -> Result<HwLayerId> {
        let mut log = self.log.lock().unwrap();
        if log.fail_create {
            return Err(HwcError::LayerCreation {
                device: self.id,
                reason: "fake exhaustion".into(),
            });
        }
        let id = self.next_layer;
        self.next_layer += 1;
        log.created += 1;
        log.layers.insert(
            id,
            FakeLayer {
                spec: Some(*spec),
                ..FakeLayer::default()
            },
        );
        Ok(HwLayerId(id))
    }

    fn close_layer(&mut self, layer: HwLayerId) {
        let mut log = self.log.lock().unwrap();
        log.layers.remove(&layer.0);
        log.closed.push(layer.0);
    }

    fn set_layer_buffer(
        &mut self,
        layer: HwLayerId,
        buffer: &GraphicsBufferHandle,
    ) -> Result<()> {
        let buffer = buffer.clone();
        self.with_layer(layer, move |l| l.buffer = Some(buffer))
    }

    fn set_layer_alpha(&mut self, layer: HwLayerId, alpha: AlphaMode) -> Result<()> {
        self.with_layer(layer, |l| l.alpha = Some(alpha))
    }

    fn set_layer_destination(&mut self, layer: HwLayerId, dest: Rect) -> Result<()> {
        self.with_layer(layer, |l| l.dest = Some(dest))
    }

    fn set_layer_source_crop(&mut self, layer: HwLayerId, crop: Rect) -> Result<()> {
        self.with_layer(layer, |l| l.crop = Some(crop))
    }

    fn set_layer_z_order(&mut self, layer: HwLayerId, z: u32) -> Result<()> {
        self.with_layer(layer, |l| l.z = Some(z))
    }

    fn set_layer_blend(&mut self, layer: HwLayerId, blend: BlendMode) -> Result<()> {
        self.with_layer(layer, |l| l.blend = Some(blend))
    }

    fn set_layer_composition(&mut self, layer: HwLayerId, mode: CompositionMode) -> Result<()> {
        if mode == CompositionMode::Client {
            self.staged_client = true;
        }
        self.with_layer(layer, move |l| l.composition = Some(mode))
    }

    fn set_layer_transform(&mut self, layer: HwLayerId, rotation: Rotation) -> Result<()> {
        self.with_layer(layer, move |l| l.rotation = Some(rotation))
    }

    fn prepare_layers(&mut self) -> Result<PrepareResult> {
        Ok(PrepareResult {
            requires_client_buffer: self.staged_client,
        })
    }

    fn set_client_buffer(&mut self, _buffer: &GraphicsBufferHandle) -> Result<()> {
        self.log.lock().unwrap().client_buffer_sets += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<Box<dyn ReleaseFence>> {
        let mut log = self.log.lock().unwrap();
        if log.fail_commit {
            return Err(HwcError::CommitFailed {
                device: self.id,
                reason: "fake commit failure".into(),
            });
        }
        log.commits += 1;
        self.staged_client = false;
        Ok(Box::new(FakeFence {
            log: self.log.clone(),
        }))
    }

    fn set_vsync_enabled(&mut self, enabled: bool) -> Result<()> {
        self.log.lock().unwrap().vsync_enabled = enabled;
        Ok(())
    }
}

// --- fake allocator ------------------------------------------------------

#[derive(Debug, Default)]
pub struct AllocLog {
    pub allocated: Vec<GraphicsBufferHandle>,
    pub freed: Vec<MemoryHandle>,
    pub maps: u32,
    pub unmaps: u32,
    pub fail: bool,
    next_memory: u64,
    contents: HashMap<u64, Arc<Mutex<Vec<u8>>>>,
}

impl AllocLog {
    /// CPU-visible content of a buffer, creating it zeroed on first use.
    pub fn content(&mut self, handle: &GraphicsBufferHandle) -> Arc<Mutex<Vec<u8>>> {
        let len = handle.stride as usize * handle.height as usize;
        self.contents
            .entry(handle.memory.0)
            .or_insert_with(|| Arc::new(Mutex::new(vec![0u8; len])))
            .clone()
    }
}

#[derive(Clone)]
pub struct FakeAllocator {
    pub log: Arc<Mutex<AllocLog>>,
}

impl FakeAllocator {
    pub fn new() -> (Self, Arc<Mutex<AllocLog>>) {
        let log = Arc::new(Mutex::new(AllocLog::default()));
        (FakeAllocator { log: log.clone() }, log)
    }
}

impl GraphicsAllocator for FakeAllocator {
    fn allocate(
        &self,
        width: i32,
        height: i32,
        format: PixelFormat,
    ) -> Result<GraphicsBufferHandle> {
        let mut log = self.log.lock().unwrap();
        if log.fail {
            return Err(HwcError::BufferAllocation("fake exhaustion".into()));
        }
        log.next_memory += 1;
        let handle = GraphicsBufferHandle {
            width,
            height,
            stride: width as u32 * format.bytes_per_pixel(),
            format,
            memory: MemoryHandle(log.next_memory),
        };
        log.allocated.push(handle.clone());
        Ok(handle)
    }

    fn free(&self, handle: &GraphicsBufferHandle) {
        let mut log = self.log.lock().unwrap();
        log.freed.push(handle.memory);
        log.contents.remove(&handle.memory.0);
    }

    fn map(&self, handle: &GraphicsBufferHandle) -> Result<MappedBuffer> {
        let mut log = self.log.lock().unwrap();
        log.maps += 1;
        let data = log.content(handle);
        Ok(MappedBuffer { data })
    }

    fn unmap(&self, _handle: &GraphicsBufferHandle, _mapping: MappedBuffer) {
        self.log.lock().unwrap().unmaps += 1;
    }
}

// --- fake gpu renderer ---------------------------------------------------

#[derive(Debug, Default)]
pub struct GpuLog {
    pub attached: HashMap<OutputId, Vec<GraphicsBufferHandle>>,
    pub repaints: Vec<(OutputId, usize)>,
    last_index: HashMap<OutputId, usize>,
}

pub struct FakeGpu {
    pub log: Arc<Mutex<GpuLog>>,
}

impl FakeGpu {
    pub fn new() -> (Self, Arc<Mutex<GpuLog>>) {
        let log = Arc::new(Mutex::new(GpuLog::default()));
        (FakeGpu { log: log.clone() }, log)
    }
}

impl GpuRenderer for FakeGpu {
    fn attach_output(&mut self, output: OutputId, targets: &[GraphicsBufferHandle]) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        log.attached.insert(output, targets.to_vec());
        log.last_index.remove(&output);
        Ok(())
    }

    fn detach_output(&mut self, output: OutputId) {
        let mut log = self.log.lock().unwrap();
        log.attached.remove(&output);
        log.last_index.remove(&output);
    }

    fn repaint_output(&mut self, output: OutputId, damage: &Region) -> Result<()> {
        let mut log = self.log.lock().unwrap();
        let depth = log.attached.get(&output).map(|t| t.len()).unwrap_or(1);
        // Round-robin over the attached targets, like a real renderer
        // cycling its framebuffer objects.
        let idx = log
            .last_index
            .get(&output)
            .map(|last| (last + 1) % depth.max(1));
        log.last_index.insert(output, idx.unwrap_or(0));
        log.repaints.push((output, damage.rects().len()));
        Ok(())
    }

    fn current_target_index(&self, output: OutputId) -> usize {
        self.log
            .lock()
            .unwrap()
            .last_index
            .get(&output)
            .copied()
            .unwrap_or(0)
    }
}

// --- rig -----------------------------------------------------------------

pub struct TestRig {
    pub backend: HwcBackend,
    pub channel: Channel<BackendEvent>,
    pub device: Arc<Mutex<DeviceLog>>,
    pub alloc: Arc<Mutex<AllocLog>>,
    pub gpu: Arc<Mutex<GpuLog>>,
    pub output: OutputId,
    pub device_id: DeviceId,
}

/// Backend with one registered device and one attached (but not yet
/// enabled) 1920x1080@60 output.
pub fn rig_with_config(config: HwcConfig) -> TestRig {
    novade_hwc::logging::init_minimal_logging();
    let (allocator, alloc) = FakeAllocator::new();
    let (gpu_renderer, gpu) = FakeGpu::new();
    let (mut backend, channel) =
        HwcBackend::new(config, Box::new(allocator), Box::new(gpu_renderer));
    let (device, device_log) = FakeDevice::new(1);
    let device_id = backend.add_device(Box::new(device));
    let output = OutputId::new(1);
    backend.attach_head(output, device_id).unwrap();
    TestRig {
        backend,
        channel,
        device: device_log,
        alloc,
        gpu,
        output,
        device_id,
    }
}

pub fn rig() -> TestRig {
    rig_with_config(HwcConfig::default())
}

/// Rig with the output already enabled.
pub fn enabled_rig() -> TestRig {
    let mut r = rig();
    r.backend.enable_output(r.output).unwrap();
    r
}

pub fn full_damage() -> Region {
    Region::from_rect(Rect::new(0, 0, 1920, 1080))
}

/// Fabricates a hardware-importable client buffer descriptor.
pub fn imported_buffer(width: i32, height: i32, memory: u64) -> ClientBuffer {
    imported_buffer_with_format(width, height, memory, PixelFormat::Argb8888)
}

pub fn imported_buffer_with_format(
    width: i32,
    height: i32,
    memory: u64,
    format: PixelFormat,
) -> ClientBuffer {
    ClientBuffer::Imported(GraphicsBufferHandle {
        width,
        height,
        stride: width as u32 * format.bytes_per_pixel(),
        format,
        memory: MemoryHandle(memory),
    })
}

pub fn shm_buffer(width: i32, height: i32) -> ClientBuffer {
    ClientBuffer::SharedMemory {
        width,
        height,
        stride: width as u32 * 4,
        format: PixelFormat::Argb8888,
    }
}

/// An opaque, axis-aligned, overlay-eligible view whose surface-local
/// origin maps to the bounding box position.
pub fn hw_view(surface: SurfaceId, bbox: Rect) -> ViewDesc {
    ViewDesc {
        surface,
        bbox,
        transform: Transform::translation(bbox.x as f64, bbox.y as f64),
        buffer_scale: 1,
        visible: true,
        overlay_eligible: true,
        is_video: false,
    }
}

/// Runs one full begin/repaint/flush cycle for the rig's output.
pub fn run_frame(r: &mut TestRig, damage: &Region, views: &[ViewDesc]) {
    r.backend.begin_frame();
    r.backend.repaint_output(r.output, damage, views).unwrap();
    r.backend.flush_frame().unwrap();
}
