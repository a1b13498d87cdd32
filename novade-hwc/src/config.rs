// This is novade-hwc/src/config.rs
// Backend tunables, loaded from a TOML file with sensible defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{HwcError, Result};

/// Tunables of the hardware-composition backend.
///
/// All fields have defaults; a missing configuration file yields
/// `HwcConfig::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwcConfig {
    /// Bounded wait on a release fence before a pooled buffer is reused
    /// for writing, in milliseconds. A stuck wait delays the next frame,
    /// it never produces an error.
    pub fence_wait_timeout_ms: u64,

    /// Interval of the software vsync generator thread, in milliseconds.
    /// `None` derives the interval from the reference output's refresh rate.
    pub software_vsync_interval_ms: Option<u64>,

    /// Caps the number of concurrent hardware overlay planes below what the
    /// device advertises. `None` uses the device capability as-is.
    pub plane_budget_override: Option<u32>,

    /// Emit a debug log line with the frame-timing ring on every flush.
    pub debug_frame_timing: bool,
}

impl Default for HwcConfig {
    fn default() -> Self {
        HwcConfig {
            fence_wait_timeout_ms: 100,
            software_vsync_interval_ms: None,
            plane_budget_override: None,
            debug_frame_timing: false,
        }
    }
}

impl HwcConfig {
    /// Loads the configuration from a TOML file.
    ///
    /// A missing file is not an error: defaults are returned. A present but
    /// unparsable file maps to [`HwcError::Config`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no hwc configuration file, using defaults");
            return Ok(HwcConfig::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| HwcError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn fence_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_wait_timeout_ms)
    }

    pub fn software_vsync_interval(&self) -> Option<Duration> {
        self.software_vsync_interval_ms.map(Duration::from_millis)
    }
}
