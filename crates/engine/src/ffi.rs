//! Raw types of the engine call contract
//!
//! Mirrors the libdatachannel C API: result codes, enum discriminants passed
//! as `c_int`, the `extern "C"` callback signatures, and the plain structs
//! handed across the boundary. Every callback receives the user pointer that
//! was registered for the resource with `Engine::set_user_pointer`.

use serde::{Deserialize, Serialize};
use std::ffi::{c_char, c_int, c_void};

/// Command succeeded
pub const RTC_ERR_SUCCESS: c_int = 0;
/// Invalid argument (unknown id, malformed input)
pub const RTC_ERR_INVALID: c_int = -1;
/// Runtime failure
pub const RTC_ERR_FAILURE: c_int = -2;
/// Element not available (nothing buffered, no description yet)
pub const RTC_ERR_NOT_AVAIL: c_int = -3;
/// Caller-supplied buffer is too small
pub const RTC_ERR_TOO_SMALL: c_int = -4;

pub type LogCallbackFn = unsafe extern "C" fn(level: c_int, message: *const c_char);

pub type DescriptionCallbackFn = unsafe extern "C" fn(
    pc: c_int,
    sdp: *const c_char,
    sdp_type: *const c_char,
    user_ptr: *mut c_void,
);
pub type CandidateCallbackFn = unsafe extern "C" fn(
    pc: c_int,
    candidate: *const c_char,
    mid: *const c_char,
    user_ptr: *mut c_void,
);
pub type StateChangeCallbackFn = unsafe extern "C" fn(pc: c_int, state: c_int, user_ptr: *mut c_void);
pub type GatheringStateCallbackFn =
    unsafe extern "C" fn(pc: c_int, state: c_int, user_ptr: *mut c_void);
pub type SignalingStateCallbackFn =
    unsafe extern "C" fn(pc: c_int, state: c_int, user_ptr: *mut c_void);
pub type DataChannelCallbackFn = unsafe extern "C" fn(pc: c_int, dc: c_int, user_ptr: *mut c_void);

pub type OpenCallbackFn = unsafe extern "C" fn(id: c_int, user_ptr: *mut c_void);
pub type ClosedCallbackFn = unsafe extern "C" fn(id: c_int, user_ptr: *mut c_void);
pub type ErrorCallbackFn =
    unsafe extern "C" fn(id: c_int, error: *const c_char, user_ptr: *mut c_void);
/// `size >= 0` is a binary message of that length, `size < 0` a NUL-terminated string
pub type MessageCallbackFn = unsafe extern "C" fn(
    id: c_int,
    message: *const c_char,
    size: c_int,
    user_ptr: *mut c_void,
);
pub type BufferedAmountLowCallbackFn = unsafe extern "C" fn(id: c_int, user_ptr: *mut c_void);
pub type AvailableCallbackFn = unsafe extern "C" fn(id: c_int, user_ptr: *mut c_void);

/// Peer connection state
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtcState {
    New = 0,
    Connecting = 1,
    Connected = 2,
    Disconnected = 3,
    Failed = 4,
    Closed = 5,
}

impl RtcState {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Some(match raw {
            0 => Self::New,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnected,
            4 => Self::Failed,
            5 => Self::Closed,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// ICE gathering state
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatheringState {
    New = 0,
    InProgress = 1,
    Complete = 2,
}

impl GatheringState {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Some(match raw {
            0 => Self::New,
            1 => Self::InProgress,
            2 => Self::Complete,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// Offer/answer signaling state
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingState {
    Stable = 0,
    HaveLocalOffer = 1,
    HaveRemoteOffer = 2,
    HaveLocalPrAnswer = 3,
    HaveRemotePrAnswer = 4,
}

impl SignalingState {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Some(match raw {
            0 => Self::Stable,
            1 => Self::HaveLocalOffer,
            2 => Self::HaveRemoteOffer,
            3 => Self::HaveLocalPrAnswer,
            4 => Self::HaveRemotePrAnswer,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// Engine log verbosity
#[repr(i32)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None = 0,
    Fatal = 1,
    Error = 2,
    #[default]
    Warning = 3,
    Info = 4,
    Debug = 5,
    Verbose = 6,
}

impl LogLevel {
    pub fn from_raw(raw: c_int) -> Option<Self> {
        Some(match raw {
            0 => Self::None,
            1 => Self::Fatal,
            2 => Self::Error,
            3 => Self::Warning,
            4 => Self::Info,
            5 => Self::Debug,
            6 => Self::Verbose,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> c_int {
        self as c_int
    }
}

/// DTLS certificate type
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateType {
    #[default]
    Default = 0,
    Ecdsa = 1,
    Rsa = 2,
}

/// ICE transport policy
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPolicy {
    #[default]
    All = 0,
    Relay = 1,
}

/// Channel reliability as the engine stores it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawReliability {
    pub unordered: bool,
    pub unreliable: bool,
    /// Milliseconds, only meaningful when `unreliable`
    pub max_packet_life_time: u32,
    /// Only meaningful when `unreliable` and `max_packet_life_time == 0`
    pub max_retransmits: u32,
}

/// Channel creation options
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelInit {
    pub reliability: RawReliability,
    pub protocol: Option<String>,
    pub negotiated: bool,
    pub manual_stream: bool,
    /// Stream id in `[0, 65534]`, ignored unless `manual_stream`
    pub stream: u16,
}

/// Peer connection creation options
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineConfiguration {
    pub ice_servers: Vec<String>,
    pub bind_address: Option<String>,
    pub certificate_type: CertificateType,
    pub transport_policy: TransportPolicy,
    pub enable_ice_tcp: bool,
    pub disable_auto_negotiation: bool,
    /// 0 means automatic
    pub port_range_begin: u16,
    /// 0 means automatic
    pub port_range_end: u16,
    /// <= 0 means automatic
    pub mtu: c_int,
    /// <= 0 means default
    pub max_message_size: c_int,
}

/// Writes `value` NUL-terminated into `buffer`.
///
/// Returns the written length including the terminator, or
/// [`RTC_ERR_TOO_SMALL`] when it does not fit.
pub fn copy_to_buffer(value: &str, buffer: &mut [u8]) -> c_int {
    let bytes = value.as_bytes();
    let needed = bytes.len() + 1;
    if needed > buffer.len() {
        return RTC_ERR_TOO_SMALL;
    }
    let Ok(written) = c_int::try_from(needed) else {
        return RTC_ERR_TOO_SMALL;
    };
    buffer[..bytes.len()].copy_from_slice(bytes);
    buffer[bytes.len()] = 0;
    written
}
