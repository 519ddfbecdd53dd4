//! Connection and channel configuration
//!
//! Plain serde types validated on the Rust side before they are lowered to
//! the engine's raw structs.

use datachannel_engine::{ChannelInit, EngineConfiguration, RawReliability};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

pub use datachannel_engine::{CertificateType, TransportPolicy};

/// Highest stream id a data channel may use
pub const MAX_STREAM_ID: u16 = 65534;

/// Peer connection configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfiguration {
    /// ICE servers, each `("stun"|"turn"|"turns"):[login:password@]host[:port][?transport=udp|tcp|tls]`
    ///
    /// Example: `stun:stun.l.google.com:19302`
    #[serde(default)]
    pub ice_servers: Vec<String>,

    /// Local address to bind to (any by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// DTLS certificate type
    #[serde(default)]
    pub certificate_type: CertificateType,

    /// ICE transport policy
    #[serde(default)]
    pub transport_policy: TransportPolicy,

    /// Gather ICE-TCP candidates in addition to UDP
    #[serde(default)]
    pub enable_ice_tcp: bool,

    /// Do not emit an offer automatically when a data channel is created
    #[serde(default)]
    pub disable_auto_negotiation: bool,

    /// First local port to use (0 = engine default)
    #[serde(default)]
    pub port_range_begin: u16,

    /// Last local port to use, inclusive (0 = engine default)
    #[serde(default)]
    pub port_range_end: u16,

    /// Maximum transmission unit for outgoing packets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,

    /// Maximum message size accepted on data channels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<u32>,
}

impl PeerConfiguration {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for url in &self.ice_servers {
            if !url.starts_with("stun:") && !url.starts_with("turn:") && !url.starts_with("turns:")
            {
                return Err(ConfigValidationError::InvalidIceServer(url.clone()));
            }
        }

        if self.port_range_begin > 0
            && self.port_range_end > 0
            && self.port_range_begin > self.port_range_end
        {
            return Err(ConfigValidationError::InvalidPortRange(
                self.port_range_begin,
                self.port_range_end,
            ));
        }

        if let Some(ref address) = self.bind_address {
            if address.parse::<IpAddr>().is_err() {
                return Err(ConfigValidationError::InvalidBindAddress(address.clone()));
            }
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> crate::RtcResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn to_engine(&self) -> EngineConfiguration {
        EngineConfiguration {
            ice_servers: self.ice_servers.clone(),
            bind_address: self.bind_address.clone(),
            certificate_type: self.certificate_type,
            transport_policy: self.transport_policy,
            enable_ice_tcp: self.enable_ice_tcp,
            disable_auto_negotiation: self.disable_auto_negotiation,
            port_range_begin: self.port_range_begin,
            port_range_end: self.port_range_end,
            mtu: self.mtu.map_or(0, |mtu| mtu.min(i32::MAX as u32) as i32),
            max_message_size: self
                .max_message_size
                .map_or(0, |size| size.min(i32::MAX as u32) as i32),
        }
    }
}

/// Delivery guarantees of a data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reliability {
    /// Deliver messages in order
    #[serde(default = "default_true")]
    pub ordered: bool,

    /// Retransmit until delivered
    #[serde(default = "default_true")]
    pub reliable: bool,

    /// Milliseconds a message may be retransmitted (unreliable only)
    #[serde(default)]
    pub max_packet_life_time: u32,

    /// Retransmission attempts (unreliable only, when no lifetime is set)
    #[serde(default)]
    pub max_retransmits: u32,
}

fn default_true() -> bool {
    true
}

impl Default for Reliability {
    fn default() -> Self {
        Self {
            ordered: true,
            reliable: true,
            max_packet_life_time: 0,
            max_retransmits: 0,
        }
    }
}

impl From<Reliability> for RawReliability {
    fn from(reliability: Reliability) -> Self {
        RawReliability {
            unordered: !reliability.ordered,
            unreliable: !reliability.reliable,
            max_packet_life_time: reliability.max_packet_life_time,
            max_retransmits: reliability.max_retransmits,
        }
    }
}

impl From<RawReliability> for Reliability {
    fn from(raw: RawReliability) -> Self {
        Reliability {
            ordered: !raw.unordered,
            reliable: !raw.unreliable,
            max_packet_life_time: raw.max_packet_life_time,
            max_retransmits: raw.max_retransmits,
        }
    }
}

/// Data channel creation options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChannelInit {
    #[serde(default)]
    pub reliability: Reliability,

    /// Subprotocol announced to the remote side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    /// Both sides create the channel themselves on an agreed stream id
    #[serde(default)]
    pub negotiated: bool,

    /// Stream id in `[0, 65534]`; chosen by the engine when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<u16>,
}

impl DataChannelInit {
    /// Validate the options
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        match self.stream_id {
            Some(id) if id > MAX_STREAM_ID => Err(ConfigValidationError::InvalidStreamId(id)),
            None if self.negotiated => Err(ConfigValidationError::NegotiatedWithoutStreamId),
            _ => Ok(()),
        }
    }

    pub(crate) fn to_engine(&self) -> ChannelInit {
        ChannelInit {
            reliability: self.reliability.into(),
            protocol: self.protocol.clone(),
            negotiated: self.negotiated,
            manual_stream: self.stream_id.is_some(),
            stream: self.stream_id.unwrap_or(0),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid ICE server URL: {0} (must start with stun:, turn: or turns:)")]
    InvalidIceServer(String),

    #[error("Invalid port range: {0}-{1} (begin must not exceed end)")]
    InvalidPortRange(u16, u16),

    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid stream id: {0} (must be 0-65534)")]
    InvalidStreamId(u16),

    #[error("A negotiated data channel requires a stream id")]
    NegotiatedWithoutStreamId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PeerConfiguration::default();
        assert!(config.validate().is_ok());
        assert!(!config.disable_auto_negotiation);
    }

    #[test]
    fn test_invalid_ice_server() {
        let config = PeerConfiguration {
            ice_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "http://example.com".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::InvalidIceServer(
                "http://example.com".to_string()
            ))
        );

        let config = PeerConfiguration {
            ice_servers: vec!["turn:user:pass@turn.example.org:3478?transport=udp".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_range() {
        let config = PeerConfiguration {
            port_range_begin: 9000,
            port_range_end: 8000,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidPortRange(9000, 8000))
        ));

        let open_ended = PeerConfiguration {
            port_range_begin: 9000,
            ..Default::default()
        };
        assert!(open_ended.validate().is_ok());
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = PeerConfiguration {
            bind_address: Some("not-an-ip".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidBindAddress(_))
        ));
    }

    #[test]
    fn test_from_json() {
        let config = PeerConfiguration::from_json(
            r#"{"ice_servers": ["stun:localhost:3478"], "disable_auto_negotiation": true, "certificate_type": "ecdsa", "mtu": 1200}"#,
        )
        .unwrap();
        assert_eq!(config.ice_servers.len(), 1);
        assert!(config.disable_auto_negotiation);
        assert_eq!(config.certificate_type, CertificateType::Ecdsa);

        let engine = config.to_engine();
        assert_eq!(engine.mtu, 1200);
        assert_eq!(engine.max_message_size, 0);

        assert!(PeerConfiguration::from_json(r#"{"ice_servers": ["ftp:x"]}"#).is_err());
        assert!(PeerConfiguration::from_json("not json").is_err());
    }

    #[test]
    fn test_reliability_conversion() {
        let reliability = Reliability {
            ordered: false,
            reliable: false,
            max_packet_life_time: 0,
            max_retransmits: 5,
        };
        let raw = RawReliability::from(reliability);
        assert!(raw.unordered);
        assert!(raw.unreliable);
        assert_eq!(Reliability::from(raw), reliability);

        assert_eq!(RawReliability::from(Reliability::default()), RawReliability::default());
    }

    #[test]
    fn test_reliability_defaults_from_json() {
        let reliability: Reliability = serde_json::from_str("{}").unwrap();
        assert!(reliability.ordered);
        assert!(reliability.reliable);
    }

    #[test]
    fn test_channel_init_validation() {
        let init = DataChannelInit {
            stream_id: Some(65535),
            ..Default::default()
        };
        assert_eq!(
            init.validate(),
            Err(ConfigValidationError::InvalidStreamId(65535))
        );

        let init = DataChannelInit {
            negotiated: true,
            ..Default::default()
        };
        assert_eq!(
            init.validate(),
            Err(ConfigValidationError::NegotiatedWithoutStreamId)
        );

        let init = DataChannelInit {
            negotiated: true,
            stream_id: Some(MAX_STREAM_ID),
            protocol: Some("binary".to_string()),
            ..Default::default()
        };
        assert!(init.validate().is_ok());
        let raw = init.to_engine();
        assert!(raw.manual_stream);
        assert_eq!(raw.stream, 65534);
        assert_eq!(raw.protocol.as_deref(), Some("binary"));
    }
}
