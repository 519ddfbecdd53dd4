//! The `Engine` trait
//!
//! One method per foreign call. Ids are plain `c_int`s handed out by the
//! engine; every fallible call reports failure with a negative code from
//! [`crate::ffi`]. Buffer queries write a NUL-terminated string and return
//! the byte count including the terminator.

use crate::ffi::*;
use std::ffi::{c_int, c_void};

/// The C-shaped call contract of a WebRTC engine.
///
/// Implementations never invoke a registered callback from inside one of
/// these calls; callbacks arrive on threads owned by the engine.
pub trait Engine: Send + Sync + 'static {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    // Global

    fn init_logger(&self, level: LogLevel, callback: Option<LogCallbackFn>);
    fn preload(&self);
    fn cleanup(&self);
    fn set_user_pointer(&self, id: c_int, ptr: *mut c_void);

    // Peer connection

    fn create_peer_connection(&self, config: &EngineConfiguration) -> c_int;
    fn delete_peer_connection(&self, pc: c_int) -> c_int;

    fn set_local_description_callback(&self, pc: c_int, cb: Option<DescriptionCallbackFn>)
        -> c_int;
    fn set_local_candidate_callback(&self, pc: c_int, cb: Option<CandidateCallbackFn>) -> c_int;
    fn set_state_change_callback(&self, pc: c_int, cb: Option<StateChangeCallbackFn>) -> c_int;
    fn set_gathering_state_change_callback(
        &self,
        pc: c_int,
        cb: Option<GatheringStateCallbackFn>,
    ) -> c_int;
    fn set_signaling_state_change_callback(
        &self,
        pc: c_int,
        cb: Option<SignalingStateCallbackFn>,
    ) -> c_int;
    fn set_data_channel_callback(&self, pc: c_int, cb: Option<DataChannelCallbackFn>) -> c_int;

    /// `None` lets the engine infer offer or answer from the signaling state
    fn set_local_description(&self, pc: c_int, sdp_type: Option<&str>) -> c_int;
    fn set_remote_description(&self, pc: c_int, sdp: &str, sdp_type: Option<&str>) -> c_int;
    fn add_remote_candidate(&self, pc: c_int, candidate: &str, mid: Option<&str>) -> c_int;

    fn get_local_description(&self, pc: c_int, buffer: &mut [u8]) -> c_int;
    fn get_remote_description(&self, pc: c_int, buffer: &mut [u8]) -> c_int;
    fn get_local_description_type(&self, pc: c_int, buffer: &mut [u8]) -> c_int;
    fn get_remote_description_type(&self, pc: c_int, buffer: &mut [u8]) -> c_int;
    fn get_local_address(&self, pc: c_int, buffer: &mut [u8]) -> c_int;
    fn get_remote_address(&self, pc: c_int, buffer: &mut [u8]) -> c_int;
    /// Writes both candidates; returns the larger of the two written sizes
    fn get_selected_candidate_pair(
        &self,
        pc: c_int,
        local: &mut [u8],
        remote: &mut [u8],
    ) -> c_int;

    // Data channel

    fn create_data_channel(&self, pc: c_int, label: &str, init: Option<&ChannelInit>) -> c_int;
    fn delete_data_channel(&self, dc: c_int) -> c_int;

    fn get_data_channel_stream(&self, dc: c_int) -> c_int;
    fn get_data_channel_label(&self, dc: c_int, buffer: &mut [u8]) -> c_int;
    fn get_data_channel_protocol(&self, dc: c_int, buffer: &mut [u8]) -> c_int;
    fn get_data_channel_reliability(&self, dc: c_int, reliability: &mut RawReliability) -> c_int;

    fn set_open_callback(&self, id: c_int, cb: Option<OpenCallbackFn>) -> c_int;
    fn set_closed_callback(&self, id: c_int, cb: Option<ClosedCallbackFn>) -> c_int;
    fn set_error_callback(&self, id: c_int, cb: Option<ErrorCallbackFn>) -> c_int;
    fn set_message_callback(&self, id: c_int, cb: Option<MessageCallbackFn>) -> c_int;
    fn set_buffered_amount_low_callback(
        &self,
        id: c_int,
        cb: Option<BufferedAmountLowCallbackFn>,
    ) -> c_int;
    fn set_available_callback(&self, id: c_int, cb: Option<AvailableCallbackFn>) -> c_int;

    fn is_open(&self, id: c_int) -> bool;
    fn is_closed(&self, id: c_int) -> bool;

    /// `size < 0` sends `data` as text
    fn send_message(&self, id: c_int, data: &[u8], size: c_int) -> c_int;
    fn get_buffered_amount(&self, id: c_int) -> c_int;
    fn set_buffered_amount_low_threshold(&self, id: c_int, amount: c_int) -> c_int;

    /// Pops one message into `buffer`.
    ///
    /// On entry `*size` is the buffer capacity; on success it holds the
    /// message length. Returns [`RTC_ERR_NOT_AVAIL`] when nothing is queued
    /// and [`RTC_ERR_TOO_SMALL`] (with `*size` set to the needed length) when
    /// the message does not fit.
    fn receive_message(&self, id: c_int, buffer: &mut [u8], size: &mut c_int) -> c_int;
    fn get_available_amount(&self, id: c_int) -> c_int;
}
