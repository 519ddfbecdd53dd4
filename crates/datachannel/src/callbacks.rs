//! `extern "C"` trampolines registered with the engine
//!
//! Each trampoline marks the thread as a callback thread, resolves the user
//! pointer back to its proxy through the token registry and forwards the
//! event. A panic in a handler is caught here and never unwinds into the
//! engine.

use crate::callback_thread;
use crate::channel::ChannelShared;
use crate::connection::ConnectionShared;
use crate::error::{check, RtcResult};
use crate::marshal::{callback_message, callback_string};
use crate::registry::{self, Token};
use crate::sdp::{IceCandidate, SessionDescription};
use datachannel_engine::{Engine, GatheringState, RtcState, SignalingState};
use std::ffi::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace, warn};

fn guarded(what: &'static str, id: c_int, f: impl FnOnce()) {
    let _scope = callback_thread::enter();
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!(id, callback = what, "Event handler panicked");
    }
}

fn with_connection(
    what: &'static str,
    pc: c_int,
    user_ptr: *mut c_void,
    f: impl FnOnce(&Arc<ConnectionShared>),
) {
    guarded(what, pc, || {
        let Some(token) = Token::from_ptr(user_ptr) else {
            trace!(pc, callback = what, "Callback without user pointer");
            return;
        };
        match registry::resolve_connection(token) {
            Ok(Some(shared)) => f(&shared),
            Ok(None) => trace!(pc, callback = what, "Peer connection proxy gone"),
            Err(e) => error!(pc, callback = what, error = %e, "Callback for unknown peer connection"),
        }
    });
}

fn with_channel(
    what: &'static str,
    dc: c_int,
    user_ptr: *mut c_void,
    f: impl FnOnce(&Arc<ChannelShared>),
) {
    guarded(what, dc, || {
        let Some(token) = Token::from_ptr(user_ptr) else {
            trace!(dc, callback = what, "Callback without user pointer");
            return;
        };
        match registry::resolve_channel(token) {
            Ok(Some(shared)) => f(&shared),
            Ok(None) => trace!(dc, callback = what, "Data channel proxy gone"),
            Err(e) => error!(dc, callback = what, error = %e, "Callback for unknown data channel"),
        }
    });
}

unsafe extern "C" fn on_local_description(
    pc: c_int,
    sdp: *const c_char,
    sdp_type: *const c_char,
    user_ptr: *mut c_void,
) {
    let sdp = callback_string(sdp).unwrap_or_default();
    let sdp_type = callback_string(sdp_type).unwrap_or_default();
    with_connection("local_description", pc, user_ptr, |shared| {
        match sdp_type.parse() {
            Ok(sdp_type) => shared.handle_local_description(SessionDescription::new(sdp_type, sdp)),
            Err(e) => warn!(pc, error = %e, "Dropping local description"),
        }
    });
}

unsafe extern "C" fn on_local_candidate(
    pc: c_int,
    candidate: *const c_char,
    mid: *const c_char,
    user_ptr: *mut c_void,
) {
    let candidate = callback_string(candidate).unwrap_or_default();
    let mid = callback_string(mid);
    with_connection("local_candidate", pc, user_ptr, |shared| {
        shared.handle_local_candidate(IceCandidate::new(candidate, mid));
    });
}

unsafe extern "C" fn on_state_change(pc: c_int, state: c_int, user_ptr: *mut c_void) {
    with_connection("state_change", pc, user_ptr, |shared| {
        match RtcState::from_raw(state) {
            Some(state) => shared.handle_state_change(state),
            None => warn!(pc, state, "Unknown peer connection state"),
        }
    });
}

unsafe extern "C" fn on_gathering_state_change(pc: c_int, state: c_int, user_ptr: *mut c_void) {
    with_connection("gathering_state_change", pc, user_ptr, |shared| {
        match GatheringState::from_raw(state) {
            Some(state) => shared.handle_gathering_state_change(state),
            None => warn!(pc, state, "Unknown gathering state"),
        }
    });
}

unsafe extern "C" fn on_signaling_state_change(pc: c_int, state: c_int, user_ptr: *mut c_void) {
    with_connection("signaling_state_change", pc, user_ptr, |shared| {
        match SignalingState::from_raw(state) {
            Some(state) => shared.handle_signaling_state_change(state),
            None => warn!(pc, state, "Unknown signaling state"),
        }
    });
}

unsafe extern "C" fn on_data_channel(pc: c_int, dc: c_int, user_ptr: *mut c_void) {
    with_connection("data_channel", pc, user_ptr, |shared| {
        shared.handle_data_channel(dc);
    });
}

unsafe extern "C" fn on_open(dc: c_int, user_ptr: *mut c_void) {
    with_channel("open", dc, user_ptr, |shared| shared.handle_open());
}

unsafe extern "C" fn on_closed(dc: c_int, user_ptr: *mut c_void) {
    with_channel("closed", dc, user_ptr, |shared| shared.handle_closed());
}

unsafe extern "C" fn on_error(dc: c_int, message: *const c_char, user_ptr: *mut c_void) {
    let message = callback_string(message).unwrap_or_default();
    with_channel("error", dc, user_ptr, |shared| shared.handle_error(&message));
}

unsafe extern "C" fn on_message(
    dc: c_int,
    message: *const c_char,
    size: c_int,
    user_ptr: *mut c_void,
) {
    let message = callback_message(message, size);
    with_channel("message", dc, user_ptr, |shared| shared.handle_message(message));
}

unsafe extern "C" fn on_buffered_amount_low(dc: c_int, user_ptr: *mut c_void) {
    with_channel("buffered_amount_low", dc, user_ptr, |shared| {
        shared.handle_buffered_amount_low()
    });
}

unsafe extern "C" fn on_available(dc: c_int, user_ptr: *mut c_void) {
    with_channel("available", dc, user_ptr, |shared| shared.handle_available());
}

pub(crate) fn attach_connection_callbacks(engine: &dyn Engine, pc: c_int) -> RtcResult<()> {
    check(engine.set_local_description_callback(pc, Some(on_local_description)))?;
    check(engine.set_local_candidate_callback(pc, Some(on_local_candidate)))?;
    check(engine.set_state_change_callback(pc, Some(on_state_change)))?;
    check(engine.set_gathering_state_change_callback(pc, Some(on_gathering_state_change)))?;
    check(engine.set_signaling_state_change_callback(pc, Some(on_signaling_state_change)))?;
    check(engine.set_data_channel_callback(pc, Some(on_data_channel)))?;
    Ok(())
}

/// Attaches everything except the message callback, which follows the
/// channel's delivery mode
pub(crate) fn attach_channel_callbacks(engine: &dyn Engine, dc: c_int) -> RtcResult<()> {
    check(engine.set_open_callback(dc, Some(on_open)))?;
    check(engine.set_closed_callback(dc, Some(on_closed)))?;
    check(engine.set_error_callback(dc, Some(on_error)))?;
    check(engine.set_buffered_amount_low_callback(dc, Some(on_buffered_amount_low)))?;
    check(engine.set_available_callback(dc, Some(on_available)))?;
    Ok(())
}

pub(crate) fn set_message_callback(engine: &dyn Engine, dc: c_int, attach: bool) -> RtcResult<()> {
    let callback = if attach { Some(on_message as _) } else { None };
    check(engine.set_message_callback(dc, callback))?;
    Ok(())
}
