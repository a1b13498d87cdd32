// This is novade-hwc/src/error.rs
// Definition of the backend error types using `thiserror`.

use thiserror::Error;

use crate::hal::{DeviceId, ModeId};
use crate::output::OutputId;
use crate::surface::SurfaceId;

#[derive(Error, Debug)]
pub enum HwcError {
    #[error("hardware layer creation failed on device {device:?}: {reason}")]
    LayerCreation { device: DeviceId, reason: String },

    #[error("graphics buffer allocation failed: {0}")]
    BufferAllocation(String),

    #[error("mapping a graphics buffer failed: {0}")]
    BufferMap(String),

    #[error("hardware commit failed on device {device:?}: {reason}")]
    CommitFailed { device: DeviceId, reason: String },

    #[error("device {0:?} is not registered with the backend")]
    DeviceNotFound(DeviceId),

    #[error("output {0:?} is not registered with the backend")]
    OutputNotFound(OutputId),

    #[error("surface {0:?} is not tracked by the backend")]
    SurfaceNotFound(SurfaceId),

    #[error("mode already negotiated for output {0:?}")]
    ModeAlreadySet(OutputId),

    #[error("no display mode published for output {0:?}")]
    ModeNotSet(OutputId),

    #[error("device reports no mode matching its active mode id {0:?}")]
    ModeUnavailable(ModeId),

    #[error("output {0:?} is not enabled")]
    OutputDisabled(OutputId),

    #[error("frame operation issued outside an open frame cycle")]
    FrameCycleViolation,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("hardware error: {0}")]
    Hardware(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// This alias is used throughout the crate for function return types.
pub type Result<T, E = HwcError> = std::result::Result<T, E>;
