//! libdatachannel linkage
//!
//! Thin marshaling over the C API: strings become `CString`s (an interior
//! NUL is reported as [`RTC_ERR_INVALID`]), slices become pointer and size
//! pairs, and configuration structs are laid out as `#[repr(C)]` mirrors.

use crate::engine::Engine;
use crate::ffi::*;
use std::ffi::{c_char, c_int, c_void, CString};
use std::ptr;

#[repr(C)]
struct RtcConfiguration {
    ice_servers: *const *const c_char,
    ice_servers_count: c_int,
    bind_address: *const c_char,
    certificate_type: c_int,
    ice_transport_policy: c_int,
    enable_ice_tcp: bool,
    disable_auto_negotiation: bool,
    port_range_begin: u16,
    port_range_end: u16,
    mtu: c_int,
    max_message_size: c_int,
}

#[repr(C)]
struct RtcDataChannelInit {
    reliability: RawReliability,
    protocol: *const c_char,
    negotiated: bool,
    manual_stream: bool,
    stream: u16,
}

#[link(name = "datachannel")]
extern "C" {
    fn rtcInitLogger(level: c_int, cb: Option<LogCallbackFn>);
    fn rtcPreload();
    fn rtcCleanup();
    fn rtcSetUserPointer(id: c_int, ptr: *mut c_void);

    fn rtcCreatePeerConnection(config: *const RtcConfiguration) -> c_int;
    fn rtcDeletePeerConnection(pc: c_int) -> c_int;

    fn rtcSetLocalDescriptionCallback(pc: c_int, cb: Option<DescriptionCallbackFn>) -> c_int;
    fn rtcSetLocalCandidateCallback(pc: c_int, cb: Option<CandidateCallbackFn>) -> c_int;
    fn rtcSetStateChangeCallback(pc: c_int, cb: Option<StateChangeCallbackFn>) -> c_int;
    fn rtcSetGatheringStateChangeCallback(
        pc: c_int,
        cb: Option<GatheringStateCallbackFn>,
    ) -> c_int;
    fn rtcSetSignalingStateChangeCallback(
        pc: c_int,
        cb: Option<SignalingStateCallbackFn>,
    ) -> c_int;
    fn rtcSetDataChannelCallback(pc: c_int, cb: Option<DataChannelCallbackFn>) -> c_int;

    fn rtcSetLocalDescription(pc: c_int, sdp_type: *const c_char) -> c_int;
    fn rtcSetRemoteDescription(pc: c_int, sdp: *const c_char, sdp_type: *const c_char) -> c_int;
    fn rtcAddRemoteCandidate(pc: c_int, cand: *const c_char, mid: *const c_char) -> c_int;

    fn rtcGetLocalDescription(pc: c_int, buffer: *mut c_char, size: c_int) -> c_int;
    fn rtcGetRemoteDescription(pc: c_int, buffer: *mut c_char, size: c_int) -> c_int;
    fn rtcGetLocalDescriptionType(pc: c_int, buffer: *mut c_char, size: c_int) -> c_int;
    fn rtcGetRemoteDescriptionType(pc: c_int, buffer: *mut c_char, size: c_int) -> c_int;
    fn rtcGetLocalAddress(pc: c_int, buffer: *mut c_char, size: c_int) -> c_int;
    fn rtcGetRemoteAddress(pc: c_int, buffer: *mut c_char, size: c_int) -> c_int;
    fn rtcGetSelectedCandidatePair(
        pc: c_int,
        local: *mut c_char,
        local_size: c_int,
        remote: *mut c_char,
        remote_size: c_int,
    ) -> c_int;

    fn rtcCreateDataChannel(pc: c_int, label: *const c_char) -> c_int;
    fn rtcCreateDataChannelEx(
        pc: c_int,
        label: *const c_char,
        init: *const RtcDataChannelInit,
    ) -> c_int;
    fn rtcDeleteDataChannel(dc: c_int) -> c_int;

    fn rtcGetDataChannelStream(dc: c_int) -> c_int;
    fn rtcGetDataChannelLabel(dc: c_int, buffer: *mut c_char, size: c_int) -> c_int;
    fn rtcGetDataChannelProtocol(dc: c_int, buffer: *mut c_char, size: c_int) -> c_int;
    fn rtcGetDataChannelReliability(dc: c_int, reliability: *mut RawReliability) -> c_int;

    fn rtcSetOpenCallback(id: c_int, cb: Option<OpenCallbackFn>) -> c_int;
    fn rtcSetClosedCallback(id: c_int, cb: Option<ClosedCallbackFn>) -> c_int;
    fn rtcSetErrorCallback(id: c_int, cb: Option<ErrorCallbackFn>) -> c_int;
    fn rtcSetMessageCallback(id: c_int, cb: Option<MessageCallbackFn>) -> c_int;
    fn rtcSetBufferedAmountLowCallback(
        id: c_int,
        cb: Option<BufferedAmountLowCallbackFn>,
    ) -> c_int;
    fn rtcSetAvailableCallback(id: c_int, cb: Option<AvailableCallbackFn>) -> c_int;

    fn rtcIsOpen(id: c_int) -> bool;
    fn rtcIsClosed(id: c_int) -> bool;

    fn rtcSendMessage(id: c_int, data: *const c_char, size: c_int) -> c_int;
    fn rtcGetBufferedAmount(id: c_int) -> c_int;
    fn rtcSetBufferedAmountLowThreshold(id: c_int, amount: c_int) -> c_int;
    fn rtcReceiveMessage(id: c_int, buffer: *mut c_char, size: *mut c_int) -> c_int;
    fn rtcGetAvailableAmount(id: c_int) -> c_int;
}

fn cstring(value: &str) -> Result<CString, c_int> {
    CString::new(value).map_err(|_| RTC_ERR_INVALID)
}

fn optional_cstring(value: Option<&str>) -> Result<Option<CString>, c_int> {
    value.map(cstring).transpose()
}

fn as_ptr(value: &Option<CString>) -> *const c_char {
    value.as_ref().map_or(ptr::null(), |value| value.as_ptr())
}

fn buffer_len(buffer: &[u8]) -> c_int {
    buffer.len().min(c_int::MAX as usize) as c_int
}

/// The system libdatachannel, one instance per process
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

macro_rules! try_c {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(code) => return code,
        }
    };
}

// SAFETY (whole impl): every pointer handed to libdatachannel outlives the
// call, buffer sizes match the slices they describe, and the C API copies
// whatever it keeps.
impl Engine for NativeEngine {
    fn name(&self) -> &'static str {
        "libdatachannel"
    }

    fn init_logger(&self, level: LogLevel, callback: Option<LogCallbackFn>) {
        unsafe { rtcInitLogger(level.as_raw(), callback) }
    }

    fn preload(&self) {
        unsafe { rtcPreload() }
    }

    fn cleanup(&self) {
        unsafe { rtcCleanup() }
    }

    fn set_user_pointer(&self, id: c_int, ptr: *mut c_void) {
        unsafe { rtcSetUserPointer(id, ptr) }
    }

    fn create_peer_connection(&self, config: &EngineConfiguration) -> c_int {
        let servers: Vec<CString> = try_c!(config
            .ice_servers
            .iter()
            .map(|server| cstring(server))
            .collect::<Result<_, _>>());
        let server_ptrs: Vec<*const c_char> = servers.iter().map(|s| s.as_ptr()).collect();
        let bind_address = try_c!(optional_cstring(config.bind_address.as_deref()));

        let raw = RtcConfiguration {
            ice_servers: if server_ptrs.is_empty() {
                ptr::null()
            } else {
                server_ptrs.as_ptr()
            },
            ice_servers_count: server_ptrs.len() as c_int,
            bind_address: as_ptr(&bind_address),
            certificate_type: config.certificate_type as c_int,
            ice_transport_policy: config.transport_policy as c_int,
            enable_ice_tcp: config.enable_ice_tcp,
            disable_auto_negotiation: config.disable_auto_negotiation,
            port_range_begin: config.port_range_begin,
            port_range_end: config.port_range_end,
            mtu: config.mtu,
            max_message_size: config.max_message_size,
        };
        unsafe { rtcCreatePeerConnection(&raw) }
    }

    fn delete_peer_connection(&self, pc: c_int) -> c_int {
        unsafe { rtcDeletePeerConnection(pc) }
    }

    fn set_local_description_callback(
        &self,
        pc: c_int,
        cb: Option<DescriptionCallbackFn>,
    ) -> c_int {
        unsafe { rtcSetLocalDescriptionCallback(pc, cb) }
    }

    fn set_local_candidate_callback(&self, pc: c_int, cb: Option<CandidateCallbackFn>) -> c_int {
        unsafe { rtcSetLocalCandidateCallback(pc, cb) }
    }

    fn set_state_change_callback(&self, pc: c_int, cb: Option<StateChangeCallbackFn>) -> c_int {
        unsafe { rtcSetStateChangeCallback(pc, cb) }
    }

    fn set_gathering_state_change_callback(
        &self,
        pc: c_int,
        cb: Option<GatheringStateCallbackFn>,
    ) -> c_int {
        unsafe { rtcSetGatheringStateChangeCallback(pc, cb) }
    }

    fn set_signaling_state_change_callback(
        &self,
        pc: c_int,
        cb: Option<SignalingStateCallbackFn>,
    ) -> c_int {
        unsafe { rtcSetSignalingStateChangeCallback(pc, cb) }
    }

    fn set_data_channel_callback(&self, pc: c_int, cb: Option<DataChannelCallbackFn>) -> c_int {
        unsafe { rtcSetDataChannelCallback(pc, cb) }
    }

    fn set_local_description(&self, pc: c_int, sdp_type: Option<&str>) -> c_int {
        let sdp_type = try_c!(optional_cstring(sdp_type));
        unsafe { rtcSetLocalDescription(pc, as_ptr(&sdp_type)) }
    }

    fn set_remote_description(&self, pc: c_int, sdp: &str, sdp_type: Option<&str>) -> c_int {
        let sdp = try_c!(cstring(sdp));
        let sdp_type = try_c!(optional_cstring(sdp_type));
        unsafe { rtcSetRemoteDescription(pc, sdp.as_ptr(), as_ptr(&sdp_type)) }
    }

    fn add_remote_candidate(&self, pc: c_int, candidate: &str, mid: Option<&str>) -> c_int {
        let candidate = try_c!(cstring(candidate));
        let mid = try_c!(optional_cstring(mid));
        unsafe { rtcAddRemoteCandidate(pc, candidate.as_ptr(), as_ptr(&mid)) }
    }

    fn get_local_description(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        unsafe { rtcGetLocalDescription(pc, buffer.as_mut_ptr().cast(), buffer_len(buffer)) }
    }

    fn get_remote_description(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        unsafe { rtcGetRemoteDescription(pc, buffer.as_mut_ptr().cast(), buffer_len(buffer)) }
    }

    fn get_local_description_type(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        unsafe { rtcGetLocalDescriptionType(pc, buffer.as_mut_ptr().cast(), buffer_len(buffer)) }
    }

    fn get_remote_description_type(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        unsafe { rtcGetRemoteDescriptionType(pc, buffer.as_mut_ptr().cast(), buffer_len(buffer)) }
    }

    fn get_local_address(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        unsafe { rtcGetLocalAddress(pc, buffer.as_mut_ptr().cast(), buffer_len(buffer)) }
    }

    fn get_remote_address(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        unsafe { rtcGetRemoteAddress(pc, buffer.as_mut_ptr().cast(), buffer_len(buffer)) }
    }

    fn get_selected_candidate_pair(
        &self,
        pc: c_int,
        local: &mut [u8],
        remote: &mut [u8],
    ) -> c_int {
        unsafe {
            rtcGetSelectedCandidatePair(
                pc,
                local.as_mut_ptr().cast(),
                buffer_len(local),
                remote.as_mut_ptr().cast(),
                buffer_len(remote),
            )
        }
    }

    fn create_data_channel(&self, pc: c_int, label: &str, init: Option<&ChannelInit>) -> c_int {
        let label = try_c!(cstring(label));
        let Some(init) = init else {
            return unsafe { rtcCreateDataChannel(pc, label.as_ptr()) };
        };
        let protocol = try_c!(optional_cstring(init.protocol.as_deref()));
        let raw = RtcDataChannelInit {
            reliability: init.reliability,
            protocol: as_ptr(&protocol),
            negotiated: init.negotiated,
            manual_stream: init.manual_stream,
            stream: init.stream,
        };
        unsafe { rtcCreateDataChannelEx(pc, label.as_ptr(), &raw) }
    }

    fn delete_data_channel(&self, dc: c_int) -> c_int {
        unsafe { rtcDeleteDataChannel(dc) }
    }

    fn get_data_channel_stream(&self, dc: c_int) -> c_int {
        unsafe { rtcGetDataChannelStream(dc) }
    }

    fn get_data_channel_label(&self, dc: c_int, buffer: &mut [u8]) -> c_int {
        unsafe { rtcGetDataChannelLabel(dc, buffer.as_mut_ptr().cast(), buffer_len(buffer)) }
    }

    fn get_data_channel_protocol(&self, dc: c_int, buffer: &mut [u8]) -> c_int {
        unsafe { rtcGetDataChannelProtocol(dc, buffer.as_mut_ptr().cast(), buffer_len(buffer)) }
    }

    fn get_data_channel_reliability(&self, dc: c_int, reliability: &mut RawReliability) -> c_int {
        unsafe { rtcGetDataChannelReliability(dc, reliability) }
    }

    fn set_open_callback(&self, id: c_int, cb: Option<OpenCallbackFn>) -> c_int {
        unsafe { rtcSetOpenCallback(id, cb) }
    }

    fn set_closed_callback(&self, id: c_int, cb: Option<ClosedCallbackFn>) -> c_int {
        unsafe { rtcSetClosedCallback(id, cb) }
    }

    fn set_error_callback(&self, id: c_int, cb: Option<ErrorCallbackFn>) -> c_int {
        unsafe { rtcSetErrorCallback(id, cb) }
    }

    fn set_message_callback(&self, id: c_int, cb: Option<MessageCallbackFn>) -> c_int {
        unsafe { rtcSetMessageCallback(id, cb) }
    }

    fn set_buffered_amount_low_callback(
        &self,
        id: c_int,
        cb: Option<BufferedAmountLowCallbackFn>,
    ) -> c_int {
        unsafe { rtcSetBufferedAmountLowCallback(id, cb) }
    }

    fn set_available_callback(&self, id: c_int, cb: Option<AvailableCallbackFn>) -> c_int {
        unsafe { rtcSetAvailableCallback(id, cb) }
    }

    fn is_open(&self, id: c_int) -> bool {
        unsafe { rtcIsOpen(id) }
    }

    fn is_closed(&self, id: c_int) -> bool {
        unsafe { rtcIsClosed(id) }
    }

    fn send_message(&self, id: c_int, data: &[u8], size: c_int) -> c_int {
        if size < 0 {
            let Ok(text) = CString::new(data) else {
                return RTC_ERR_INVALID;
            };
            return unsafe { rtcSendMessage(id, text.as_ptr(), -1) };
        }
        let Ok(size) = c_int::try_from(data.len()) else {
            return RTC_ERR_INVALID;
        };
        unsafe { rtcSendMessage(id, data.as_ptr().cast(), size) }
    }

    fn get_buffered_amount(&self, id: c_int) -> c_int {
        unsafe { rtcGetBufferedAmount(id) }
    }

    fn set_buffered_amount_low_threshold(&self, id: c_int, amount: c_int) -> c_int {
        unsafe { rtcSetBufferedAmountLowThreshold(id, amount) }
    }

    fn receive_message(&self, id: c_int, buffer: &mut [u8], size: &mut c_int) -> c_int {
        *size = (*size).min(buffer_len(buffer));
        unsafe { rtcReceiveMessage(id, buffer.as_mut_ptr().cast(), size) }
    }

    fn get_available_amount(&self, id: c_int) -> c_int {
        unsafe { rtcGetAvailableAmount(id) }
    }
}
