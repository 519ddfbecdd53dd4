//! Signaling value types
//!
//! Serialized field names follow the browser `RTCSessionDescriptionInit`
//! and `RTCIceCandidateInit` shapes so they can be sent to a web peer as-is.

use crate::error::RtcError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    PrAnswer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::PrAnswer => "pranswer",
            SdpType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdpType {
    type Err = RtcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "offer" => Ok(SdpType::Offer),
            "answer" => Ok(SdpType::Answer),
            "pranswer" => Ok(SdpType::PrAnswer),
            "rollback" => Ok(SdpType::Rollback),
            other => Err(RtcError::parse(format!("unknown SDP type: {other}"))),
        }
    }
}

/// A local or remote session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, mid: Option<String>) -> Self {
        Self {
            candidate: candidate.into(),
            mid,
        }
    }
}

/// The candidate pair ICE settled on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub local: String,
    pub remote: String,
}
