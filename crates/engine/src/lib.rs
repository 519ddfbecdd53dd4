//! Foreign engine boundary for datachannel-rs
//!
//! Everything the safe layer knows about the WebRTC engine goes through the
//! [`Engine`] trait, which keeps the shape of the libdatachannel C API:
//! resources are numeric ids, failures are negative codes, strings come back
//! through caller-sized buffers and events arrive as `extern "C"` callbacks
//! carrying a user pointer.
//!
//! Two backends are provided:
//! - [`LoopbackEngine`]: pure Rust, connects peers within one process and
//!   delivers callbacks on its own `rtc-loopback` thread
//! - `NativeEngine` (feature `native`): the system libdatachannel

pub mod engine;
pub mod ffi;
pub mod loopback;
#[cfg(feature = "native")]
pub mod native;

pub use engine::Engine;
pub use ffi::{
    CertificateType, ChannelInit, EngineConfiguration, GatheringState, LogLevel, RawReliability,
    RtcState, SignalingState, TransportPolicy,
};
pub use loopback::LoopbackEngine;
#[cfg(feature = "native")]
pub use native::NativeEngine;
