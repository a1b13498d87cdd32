// Copyright (c) 2025 NovaDE Contributors
// SPDX-License-Identifier: MIT

//! # Hybrid-Compositing Renderer
//!
//! The per-frame core: walks the compositor's view list against the damage
//! region, assigns each eligible view a hardware overlay layer (Pass A),
//! programs the staged layer state (Pass B), and falls back to full-frame
//! GPU composition through the reserved passthrough layer whenever any
//! view on the damage path cannot be put on an overlay.

use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::allocator::{GraphicsAllocator, GraphicsBufferHandle};
use crate::error::{HwcError, Result};
use crate::geometry::{Rect, Region};
use crate::gpu::GpuRenderer;
use crate::hal::{AlphaMode, BlendMode, CompositionMode, DisplayDevice, HwLayerId, LayerSpec};
use crate::output::OutputId;
use crate::output_driver::OutputDriver;
use crate::surface::{LayerBinding, SurfaceId, SurfaceTable};
use crate::transform::{Rotation, Transform};

/// First z-order available to ordinary hardware-composited surfaces,
/// above the reserved bands.
pub const Z_BAND_OVERLAY: u32 = 8;

/// Base of the band video-flagged surfaces are biased into.
pub const Z_BAND_VIDEO: u32 = 4096;

/// Fixed z-order of the GPU passthrough layer, beneath all
/// hardware-composited content.
pub const Z_PASSTHROUGH: u32 = 1;

/// One view of the compositor's front-to-back view list, as handed in by
/// the scene graph for a repaint.
#[derive(Debug, Clone)]
pub struct ViewDesc {
    pub surface: SurfaceId,
    /// Bounding box in global output coordinates.
    pub bbox: Rect,
    /// Accumulated surface-to-output transform.
    pub transform: Transform,
    /// Surface-to-buffer scale.
    pub buffer_scale: i32,
    pub visible: bool,
    /// Scene-graph verdict: the view's blending/clipping semantics do not
    /// exceed what the layer interface expresses.
    pub overlay_eligible: bool,
    /// Video content: biased into the high z band with opaque blending.
    pub is_video: bool,
}

/// The per-device target recorded into the pending frame by a repaint.
#[derive(Debug, Clone)]
pub struct PendingTarget {
    pub output: OutputId,
    pub framebuffer: GraphicsBufferHandle,
    /// The GPU-composed buffer to apply at flush, set on fallback frames.
    pub client_buffer: Option<GraphicsBufferHandle>,
}

/// Per-frame debug accumulators, cleared when a frame cycle begins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepaintStats {
    pub layers_programmed: u32,
    pub layers_created: u32,
    pub layers_closed: u32,
    pub gpu_fallbacks: u32,
}

struct LayerEntry {
    surface: SurfaceId,
    layer: HwLayerId,
    buffer: GraphicsBufferHandle,
    dest: Rect,
    src: Rect,
    z: u32,
    blend: BlendMode,
    rotation: Rotation,
}

/// Why a frame left the hardware path.
enum Ineligible {
    View(SurfaceId),
    PlaneBudget,
}

/// The hybrid-compositing renderer. Stateless between frames; all
/// persistent bookkeeping lives in surface and output state.
#[derive(Default)]
pub struct Renderer;

impl Renderer {
    pub fn new() -> Self {
        Renderer
    }

    /// Repaints one output. Returns the pending target for the commit
    /// phase, or `None` when the damage region is empty (in which case no
    /// hardware-programming call and no commit is issued).
    #[allow(clippy::too_many_arguments)]
    pub fn repaint_output(
        &mut self,
        device: &mut dyn DisplayDevice,
        driver: &mut OutputDriver,
        surfaces: &mut SurfaceTable,
        views: &[ViewDesc],
        damage: &Region,
        allocator: &dyn GraphicsAllocator,
        gpu: &mut dyn GpuRenderer,
        stats: &mut RepaintStats,
        plane_budget: u32,
        fence_timeout: Duration,
    ) -> Result<Option<PendingTarget>> {
        if damage.is_empty() {
            trace!(output = driver.id().raw(), "empty damage, skipping repaint");
            return Ok(None);
        }
        if !driver.is_enabled() {
            return Err(HwcError::OutputDisabled(driver.id()));
        }
        let output_id = driver.id();
        let device_id = device.id();
        let mode = *driver.mode().ok_or(HwcError::ModeNotSet(output_id))?;
        let generation = driver.state_mut().advance_generation();
        // bounding_box is Some: the region was checked non-empty above.
        let damage_bounds = damage
            .bounding_box()
            .ok_or_else(|| HwcError::Hardware("empty damage region".into()))?;

        // Pass A: assignment and geometry, walking back to front so the
        // stacking rank increases toward the front-most view.
        let mut entries: Vec<LayerEntry> = Vec::new();
        let mut created_this_pass: Vec<SurfaceId> = Vec::new();
        let mut fallback: Option<Ineligible> = None;
        let mut next_overlay_z = Z_BAND_OVERLAY;
        let mut next_video_z = Z_BAND_VIDEO;

        for view in views.iter().rev() {
            if !view.visible || !damage.intersects(&view.bbox) {
                continue;
            }
            // Destination rect: view bounding box clipped to the damage.
            let dest = match view.bbox.intersection(&damage_bounds) {
                Some(r) => r,
                None => continue,
            };
            if dest.area() == 0 {
                // A zero-area contribution enters neither pass.
                continue;
            }

            if !view.overlay_eligible {
                fallback = Some(Ineligible::View(view.surface));
                break;
            }
            let Some(rotation) = view.transform.classify_rotation() else {
                fallback = Some(Ineligible::View(view.surface));
                break;
            };
            let Some(inverse) = view.transform.invert() else {
                fallback = Some(Ineligible::View(view.surface));
                break;
            };
            let Some(state) = surfaces.get_mut(view.surface) else {
                fallback = Some(Ineligible::View(view.surface));
                break;
            };
            // Only hardware-importable buffers can be scanned out.
            let Some(handle) = state
                .buffer
                .as_ref()
                .and_then(|b| b.buffer().imported_handle())
                .cloned()
            else {
                fallback = Some(Ineligible::View(view.surface));
                break;
            };
            if entries.len() as u32 >= plane_budget {
                fallback = Some(Ineligible::PlaneBudget);
                break;
            }

            // Source rect: output-space repaint region mapped back through
            // the inverse transform into surface space, then buffer space,
            // clipped to the buffer extent.
            let surface_rect = inverse.map_rect(&dest);
            let scale = view.buffer_scale.max(1);
            let buffer_rect = Rect::new(
                surface_rect.x * scale,
                surface_rect.y * scale,
                surface_rect.width * scale,
                surface_rect.height * scale,
            );
            let buffer_extent = Rect::new(0, 0, handle.width, handle.height);
            let src = match buffer_rect.intersection(&buffer_extent) {
                Some(r) => r,
                None => continue,
            };

            // Resolve or create the per-device layer. The layer's buffer
            // format is invariant for its lifetime; drift closes the layer
            // and routes the view to GPU composition.
            let layer = match state.layers.get(&device_id) {
                Some(binding) if binding.format == handle.format => binding.layer,
                Some(binding) => {
                    debug!(
                        surface = view.surface.raw(),
                        device = device_id.raw(),
                        "buffer format changed, closing layer"
                    );
                    device.close_layer(binding.layer);
                    stats.layers_closed += 1;
                    state.layers.remove(&device_id);
                    fallback = Some(Ineligible::View(view.surface));
                    break;
                }
                None => {
                    let spec = LayerSpec {
                        width: mode.width,
                        height: mode.height,
                        format: handle.format,
                        bit_depth: handle.format.bit_depth(),
                    };
                    match device.create_layer(&spec) {
                        Ok(layer) => {
                            stats.layers_created += 1;
                            created_this_pass.push(view.surface);
                            state.layers.insert(
                                device_id,
                                LayerBinding {
                                    layer,
                                    format: handle.format,
                                    width: spec.width,
                                    height: spec.height,
                                },
                            );
                            layer
                        }
                        Err(e) => {
                            // Resource exhaustion is not fatal; the view
                            // goes to the GPU this frame.
                            warn!(
                                surface = view.surface.raw(),
                                device = device_id.raw(),
                                error = %e,
                                "layer creation failed"
                            );
                            fallback = Some(Ineligible::View(view.surface));
                            break;
                        }
                    }
                }
            };

            let (z, blend) = if view.is_video {
                let z = next_video_z;
                next_video_z += 1;
                (z, BlendMode::Opaque)
            } else {
                let z = next_overlay_z;
                next_overlay_z += 1;
                (z, BlendMode::SourceOver)
            };

            entries.push(LayerEntry {
                surface: view.surface,
                layer,
                buffer: handle,
                dest,
                src,
                z,
                blend,
                rotation,
            });
        }

        let target = if let Some(reason) = fallback {
            match reason {
                Ineligible::View(surface) => debug!(
                    output = output_id.raw(),
                    surface = surface.raw(),
                    "view not hardware-eligible, gpu fallback"
                ),
                Ineligible::PlaneBudget => debug!(
                    output = output_id.raw(),
                    budget = plane_budget,
                    "hardware plane budget exceeded, gpu fallback"
                ),
            }
            stats.gpu_fallbacks += 1;
            entries.clear();
            // Layers created for surfaces that never entered the active
            // set are closed here; the generation sweep only walks the
            // active set.
            for surface in created_this_pass.drain(..) {
                if driver.state().active.contains(&surface) {
                    continue;
                }
                if let Some(state) = surfaces.get_mut(surface) {
                    if let Some(binding) = state.layers.remove(&device_id) {
                        device.close_layer(binding.layer);
                        stats.layers_closed += 1;
                    }
                }
            }
            self.compose_fallback(device, driver, damage, gpu, fence_timeout)?
        } else {
            // Record the assignments: stamp generations, update the active
            // set and the surfaces' last-computed attributes.
            for entry in &entries {
                if let Some(state) = surfaces.get_mut(entry.surface) {
                    state.generations.insert(output_id, generation);
                    state.dest_rect = Some(entry.dest);
                    state.src_rect = Some(entry.src);
                    state.z_order = Some(entry.z);
                    state.blend = Some(entry.blend);
                    state.composition = Some(CompositionMode::Device);
                    state.rotation = entry.rotation;
                }
                driver.state_mut().active.insert(entry.surface);
            }
            self.program_entries(device, surfaces, &entries, allocator, stats)?;
            let framebuffer = driver.acquire_hw_target(fence_timeout)?;
            PendingTarget {
                output: output_id,
                framebuffer,
                client_buffer: None,
            }
        };

        self.sweep_stale(device, driver, surfaces, generation, stats);
        Ok(Some(target))
    }

    /// Full-frame client composition: the GPU renderer produces one
    /// composed buffer, submitted on the reserved passthrough layer.
    fn compose_fallback(
        &mut self,
        device: &mut dyn DisplayDevice,
        driver: &mut OutputDriver,
        damage: &Region,
        gpu: &mut dyn GpuRenderer,
        fence_timeout: Duration,
    ) -> Result<PendingTarget> {
        let output_id = driver.id();
        let mode = *driver.mode().ok_or(HwcError::ModeNotSet(output_id))?;
        gpu.repaint_output(output_id, damage)?;
        let idx = gpu.current_target_index(output_id);
        let buffer = driver.claim_gpu_target(idx, fence_timeout)?;
        let layer = driver.ensure_passthrough_layer(device)?;

        let full = Rect::new(0, 0, mode.width, mode.height);
        device.set_layer_buffer(layer, &buffer)?;
        device.set_layer_alpha(layer, AlphaMode::Ignored)?;
        device.set_layer_destination(layer, full)?;
        device.set_layer_source_crop(layer, full)?;
        device.set_layer_z_order(layer, Z_PASSTHROUGH)?;
        device.set_layer_blend(layer, BlendMode::Opaque)?;
        device.set_layer_composition(layer, CompositionMode::Client)?;
        device.set_layer_transform(layer, Rotation::Normal)?;

        Ok(PendingTarget {
            output: output_id,
            framebuffer: buffer.clone(),
            client_buffer: Some(buffer),
        })
    }

    /// Pass B: hardware programming, in z-order. All changes are staged
    /// and applied atomically at commit, so ordering between entries does
    /// not affect correctness.
    fn program_entries(
        &mut self,
        device: &mut dyn DisplayDevice,
        surfaces: &mut SurfaceTable,
        entries: &[LayerEntry],
        allocator: &dyn GraphicsAllocator,
        stats: &mut RepaintStats,
    ) -> Result<()> {
        for entry in entries {
            if let Some(state) = surfaces.get_mut(entry.surface) {
                if state.mapping.is_none() {
                    match allocator.map(&entry.buffer) {
                        Ok(mapping) => state.mapping = Some(mapping),
                        // Scanout does not require the CPU mapping; keep
                        // programming the layer.
                        Err(e) => warn!(
                            surface = entry.surface.raw(),
                            error = %e,
                            "mapping scanout buffer failed"
                        ),
                    }
                }
            }
            let alpha = match entry.blend {
                BlendMode::SourceOver => AlphaMode::Premultiplied,
                BlendMode::Opaque => AlphaMode::Ignored,
            };
            device.set_layer_buffer(entry.layer, &entry.buffer)?;
            device.set_layer_alpha(entry.layer, alpha)?;
            device.set_layer_destination(entry.layer, entry.dest)?;
            device.set_layer_source_crop(entry.layer, entry.src)?;
            device.set_layer_z_order(entry.layer, entry.z)?;
            device.set_layer_blend(entry.layer, entry.blend)?;
            device.set_layer_composition(entry.layer, CompositionMode::Device)?;
            device.set_layer_transform(entry.layer, entry.rotation)?;
            stats.layers_programmed += 1;
        }
        Ok(())
    }

    /// End-of-repaint sweep: closes the layer of every surface whose
    /// generation stamp is stale and evicts it from the per-device cache,
    /// keeping the active set equal to the surfaces actually holding a
    /// layer on this output.
    fn sweep_stale(
        &mut self,
        device: &mut dyn DisplayDevice,
        driver: &mut OutputDriver,
        surfaces: &mut SurfaceTable,
        generation: u64,
        stats: &mut RepaintStats,
    ) {
        let output_id = driver.id();
        let device_id = device.id();
        let stale: Vec<SurfaceId> = driver
            .state()
            .active
            .iter()
            .copied()
            .filter(|id| {
                surfaces
                    .get(*id)
                    .and_then(|s| s.generations.get(&output_id).copied())
                    != Some(generation)
            })
            .collect();
        for id in stale {
            if let Some(state) = surfaces.get_mut(id) {
                if let Some(binding) = state.layers.remove(&device_id) {
                    trace!(
                        surface = id.raw(),
                        layer = binding.layer.0,
                        "sweeping stale layer"
                    );
                    device.close_layer(binding.layer);
                    stats.layers_closed += 1;
                }
                state.generations.remove(&output_id);
            }
            driver.state_mut().active.remove(&id);
        }
    }
}
