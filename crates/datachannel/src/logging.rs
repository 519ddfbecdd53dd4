//! Logging setup and the engine log bridge

use crate::marshal::callback_string;
use datachannel_engine::{Engine, LogLevel};
use std::ffi::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use tracing::Level;

/// Target of every record forwarded from the engine
pub const ENGINE_TARGET: &str = "datachannel::engine";

/// Installs a global fmt subscriber filtered by `RUST_LOG`, defaulting to
/// `info`. Does nothing if a subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Forwards engine log records at or above `level` to `tracing`
pub fn forward_engine_logs(engine: &dyn Engine, level: LogLevel) {
    engine.init_logger(level, Some(on_engine_log));
    tracing::debug!(engine = engine.name(), level = ?level, "Forwarding engine logs");
}

pub fn stop_forwarding(engine: &dyn Engine) {
    engine.init_logger(LogLevel::None, None);
}

/// `None` for [`LogLevel::None`], which never carries a record
pub fn tracing_level(level: LogLevel) -> Option<Level> {
    match level {
        LogLevel::None => None,
        LogLevel::Fatal | LogLevel::Error => Some(Level::ERROR),
        LogLevel::Warning => Some(Level::WARN),
        LogLevel::Info => Some(Level::INFO),
        LogLevel::Debug => Some(Level::DEBUG),
        LogLevel::Verbose => Some(Level::TRACE),
    }
}

unsafe extern "C" fn on_engine_log(level: c_int, message: *const c_char) {
    let message = callback_string(message).unwrap_or_default();
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        let level = LogLevel::from_raw(level).and_then(tracing_level);
        match level {
            Some(Level::ERROR) => tracing::error!(target: ENGINE_TARGET, "{message}"),
            Some(Level::WARN) => tracing::warn!(target: ENGINE_TARGET, "{message}"),
            Some(Level::INFO) => tracing::info!(target: ENGINE_TARGET, "{message}"),
            Some(Level::DEBUG) => tracing::debug!(target: ENGINE_TARGET, "{message}"),
            Some(_) => tracing::trace!(target: ENGINE_TARGET, "{message}"),
            None => {}
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachannel_engine::LoopbackEngine;
    use std::ffi::CString;

    #[test]
    fn test_level_mapping() {
        assert_eq!(tracing_level(LogLevel::None), None);
        assert_eq!(tracing_level(LogLevel::Fatal), Some(Level::ERROR));
        assert_eq!(tracing_level(LogLevel::Warning), Some(Level::WARN));
        assert_eq!(tracing_level(LogLevel::Verbose), Some(Level::TRACE));
    }

    #[test]
    fn test_engine_log_callback_accepts_any_input() {
        init_tracing();
        let message = CString::new("engine says hi").unwrap();
        unsafe {
            on_engine_log(LogLevel::Info.as_raw(), message.as_ptr());
            on_engine_log(42, message.as_ptr());
            on_engine_log(LogLevel::Error.as_raw(), std::ptr::null());
        }
    }

    #[test]
    fn test_forwarding_can_be_toggled() {
        let engine = LoopbackEngine::new().unwrap();
        forward_engine_logs(&engine, LogLevel::Debug);
        stop_forwarding(&engine);
    }
}
