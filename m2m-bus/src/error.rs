use thiserror::Error;

use crate::device::{DeviceError, Direction};
use crate::format::CodecKind;

/// Errors surfaced by the codec session core.
///
/// State and argument validation errors are detected before any device call
/// and never leave partial state. `Device` is fatal to the session; the
/// caller should close. "No buffer ready" is not an error: `retrieve`
/// returns `Ok(None)` for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(CodecKind),
    #[error("session already open")]
    AlreadyOpen,
    #[error("session not open")]
    NotOpen,
    #[error("session already configured")]
    AlreadyConfigured,
    #[error("session not configured")]
    NotConfigured,
    #[error("geometry {width}x{height} outside device limits")]
    InvalidGeometry { width: u32, height: u32 },
    #[error("buffer allocation failed for {direction} queue: {reason}")]
    AllocationFailed {
        direction: Direction,
        reason: String,
    },
    #[error("session not running")]
    NotRunning,
    #[error("invalid buffer slot {index} for {direction} queue")]
    InvalidSlot { direction: Direction, index: u32 },
    #[error("device error {code}: {message}")]
    Device { code: i32, message: String },
}

impl From<DeviceError> for CodecError {
    fn from(err: DeviceError) -> Self {
        CodecError::Device {
            code: err.code,
            message: err.message,
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;
