//! Error types
//!
//! Foreign failures arrive as negative codes and are translated at the call
//! site; everything else is raised by the bridging layer itself.

use crate::config::ConfigValidationError;
use datachannel_engine::ffi::{
    RTC_ERR_FAILURE, RTC_ERR_INVALID, RTC_ERR_NOT_AVAIL, RTC_ERR_TOO_SMALL,
};
use serde::{Deserialize, Serialize};
use std::ffi::c_int;
use thiserror::Error;

/// Error type for connection and channel operations
#[derive(Debug, Error)]
pub enum RtcError {
    /// The engine rejected an argument (unknown id, malformed input)
    #[error("Invalid argument")]
    InvalidArgument,

    /// The engine failed to carry out the command
    #[error("Engine failure")]
    Failure,

    /// The requested element is not available yet
    #[error("Not available")]
    NotAvailable,

    /// A caller-supplied buffer was too small for the result
    #[error("Buffer too small")]
    BufferTooSmall,

    /// The engine returned a code outside the documented set
    #[error("Unrecognized engine error code: {0}")]
    Unrecognized(c_int),

    /// The object was disposed
    #[error("Object disposed")]
    Disposed,

    /// Push and pull message delivery were mixed on one channel
    #[error("Message delivery mode conflict: {0}")]
    ModeConflict(&'static str),

    /// A token no longer resolves to a live registration
    #[error("Stale registry token")]
    StaleToken,

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    /// A value returned by the engine could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// IO error (worker threads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error classification for logs and language bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Engine reported an invalid argument
    InvalidArgument,
    /// Engine runtime failure
    EngineFailure,
    /// Element not available
    NotAvailable,
    /// Buffer too small
    BufferTooSmall,
    /// Operation on a disposed object
    Disposed,
    /// Push/pull delivery conflict
    InvalidOperation,
    /// Invalid configuration
    ConfigError,
    /// Internal error
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::EngineFailure => write!(f, "ENGINE_FAILURE"),
            ErrorCode::NotAvailable => write!(f, "NOT_AVAILABLE"),
            ErrorCode::BufferTooSmall => write!(f, "BUFFER_TOO_SMALL"),
            ErrorCode::Disposed => write!(f, "DISPOSED"),
            ErrorCode::InvalidOperation => write!(f, "INVALID_OPERATION"),
            ErrorCode::ConfigError => write!(f, "CONFIG_ERROR"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

impl RtcError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            RtcError::InvalidArgument => ErrorCode::InvalidArgument,
            RtcError::Failure => ErrorCode::EngineFailure,
            RtcError::NotAvailable => ErrorCode::NotAvailable,
            RtcError::BufferTooSmall => ErrorCode::BufferTooSmall,
            RtcError::Unrecognized(_) => ErrorCode::EngineFailure,
            RtcError::Disposed => ErrorCode::Disposed,
            RtcError::ModeConflict(_) => ErrorCode::InvalidOperation,
            RtcError::StaleToken => ErrorCode::InternalError,
            RtcError::Config(_) => ErrorCode::ConfigError,
            RtcError::Parse(_) => ErrorCode::InternalError,
            RtcError::Io(_) => ErrorCode::InternalError,
            RtcError::Json(_) => ErrorCode::ConfigError,
        }
    }

    /// Translate a negative engine code
    pub fn from_code(code: c_int) -> Self {
        match code {
            RTC_ERR_INVALID => RtcError::InvalidArgument,
            RTC_ERR_FAILURE => RtcError::Failure,
            RTC_ERR_NOT_AVAIL => RtcError::NotAvailable,
            RTC_ERR_TOO_SMALL => RtcError::BufferTooSmall,
            other => RtcError::Unrecognized(other),
        }
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        RtcError::Parse(msg.into())
    }
}

/// Result type for connection and channel operations
pub type RtcResult<T> = Result<T, RtcError>;

/// Passes non-negative results through, translates negative ones.
pub(crate) fn check(result: c_int) -> RtcResult<c_int> {
    if result < 0 {
        Err(RtcError::from_code(result))
    } else {
        Ok(result)
    }
}

/// Like [`check`] for buffer queries, where zero bytes written is also an
/// error (even an empty string carries its terminator).
pub(crate) fn check_size(result: c_int) -> RtcResult<usize> {
    match check(result)? {
        0 => Err(RtcError::Failure),
        written => Ok(written as usize),
    }
}
