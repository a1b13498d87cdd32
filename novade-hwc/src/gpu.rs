// This is novade-hwc/src/gpu.rs
// The seam to the external GPU renderer used for client composition.

use crate::allocator::GraphicsBufferHandle;
use crate::error::Result;
use crate::geometry::Region;
use crate::output::OutputId;

/// The external GPU renderer producing the client-composited fallback
/// buffer for an output.
///
/// The backend pre-allocates the render targets (the GPU-format pool) and
/// hands them over at attach time; the renderer binds one framebuffer
/// object per target and cycles through them on its own.
pub trait GpuRenderer {
    /// Binds framebuffer objects to the pre-allocated pool buffers of an
    /// output.
    fn attach_output(&mut self, output: OutputId, targets: &[GraphicsBufferHandle]) -> Result<()>;

    fn detach_output(&mut self, output: OutputId);

    /// Composes every view of the output intersecting `damage` into the
    /// current render target.
    fn repaint_output(&mut self, output: OutputId, damage: &Region) -> Result<()>;

    /// Index (into the attach-time target slice) of the buffer the most
    /// recent repaint rendered into.
    fn current_target_index(&self, output: OutputId) -> usize;
}
