//! # NovaDE Hardware-Composition Backend (`novade-hwc`)
//!
//! `novade-hwc` is the output-compositing core of the NovaDE compositor's
//! hardware-accelerated backend. Per frame it decides whether each visible
//! surface is handed directly to a fixed-function hardware overlay layer
//! ("hardware composition") or merged into a shared buffer by the GPU
//! renderer ("client composition"), and it manages the hardware resources
//! and timing this requires:
//!
//! - **Layer lifecycle**: per-surface, per-device hardware layers are
//!   created lazily, cached, and swept when a surface leaves an output.
//! - **Repaint algorithm**: a two-pass assignment (geometry + eligibility,
//!   then hardware programming) with full-frame GPU fallback when any view
//!   on the damage path cannot be put on an overlay.
//! - **Framebuffering and pacing**: double-buffered per-output pools,
//!   release-fence-bounded reuse, and a vsync-or-timer frame-finished
//!   signal delivered through a calloop channel.
//! - **Two-phase commit**: per-device pending state, atomic commit, and
//!   partial-failure isolation across devices.
//!
//! The display hardware, the buffer allocator and the GPU renderer are
//! external collaborators consumed through the [`hal::DisplayDevice`],
//! [`allocator::GraphicsAllocator`] and [`gpu::GpuRenderer`] traits.

pub mod allocator;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod geometry;
pub mod gpu;
pub mod hal;
pub mod logging;
pub mod output;
pub mod output_driver;
pub mod renderer;
pub mod surface;
pub mod transform;
pub mod vsync;

pub use backend::{FrameFinished, HwcBackend};
pub use buffer::{BufferId, BufferRef, ClientBuffer, PixelFormat};
pub use config::HwcConfig;
pub use error::{HwcError, Result};
pub use geometry::{Point, Rect, Region, Size};
pub use hal::{Capabilities, DeviceId, DisplayMode, HotplugEvent, HwLayerId, ModeId};
pub use output::OutputId;
pub use renderer::ViewDesc;
pub use surface::SurfaceId;
pub use transform::{Rotation, Transform};
pub use vsync::BackendEvent;
