//! Safe WebRTC peer connections and data channels
//!
//! This crate bridges a callback-driven native engine (see
//! [`datachannel_engine::Engine`]) to safe Rust proxies:
//!
//! - [`PeerConnection`] owns its [`DataChannel`]s; disposing it cascades
//! - every proxy is registered under an opaque token, which is what the
//!   engine hands back to callbacks, so a late callback for a disposed
//!   resource is dropped instead of touching freed state
//! - disposal is idempotent and, when started from an engine callback,
//!   finishes on the `rtc-release` worker
//! - a channel delivers messages either to subscribers (push) or through
//!   [`DataChannel::try_receive`] (pull), never both
//!
//! ```no_run
//! use datachannel::{PeerConnection, RtcResult};
//!
//! fn main() -> RtcResult<()> {
//!     datachannel::init_tracing();
//!     let engine = datachannel::loopback()?;
//!     let pc = PeerConnection::new(engine.clone())?;
//!     pc.on_local_description(|description| println!("{}", description.sdp))?;
//!     let channel = pc.create_data_channel("chat")?;
//!     channel.on_message(|message| println!("{} bytes", message.len()))?;
//!     pc.dispose();
//!     datachannel::cleanup(engine.as_ref());
//!     Ok(())
//! }
//! ```

pub mod callback_thread;
mod callbacks;
pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
mod handle;
pub mod logging;
mod marshal;
pub mod registry;
pub mod release_queue;
pub mod sdp;

pub use channel::{DataChannel, DeliveryMode};
pub use config::{
    CertificateType, ConfigValidationError, DataChannelInit, PeerConfiguration, Reliability,
    TransportPolicy,
};
pub use connection::{PeerConnection, WeakPeerConnection};
pub use error::{ErrorCode, RtcError, RtcResult};
pub use events::SubscriptionId;
pub use logging::{forward_engine_logs, init_tracing};
pub use sdp::{CandidatePair, IceCandidate, SdpType, SessionDescription};

pub use datachannel_engine::{Engine, GatheringState, LogLevel, LoopbackEngine, RtcState, SignalingState};

use std::sync::Arc;
use tracing::{info, warn};

/// Creates an in-process loopback engine
pub fn loopback() -> RtcResult<Arc<dyn Engine>> {
    let engine = LoopbackEngine::new()?;
    Ok(Arc::new(engine))
}

/// Uses the system libdatachannel
#[cfg(feature = "native")]
pub fn native() -> RtcResult<Arc<dyn Engine>> {
    let engine = datachannel_engine::NativeEngine::new();
    engine.preload();
    Ok(Arc::new(engine))
}

/// Waits for pending deferred releases, then shuts the engine down.
///
/// Returns the number of proxies still alive, which is zero unless some
/// handle was leaked.
pub fn cleanup(engine: &dyn Engine) -> usize {
    release_queue::flush();
    let live = registry::live_tokens();
    if live > 0 {
        warn!(live, "Proxies still alive at cleanup");
    }
    logging::stop_forwarding(engine);
    engine.cleanup();
    info!(engine = engine.name(), "Engine cleaned up");
    live
}
