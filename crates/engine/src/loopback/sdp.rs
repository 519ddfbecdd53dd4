//! Session description text for the loopback engine
//!
//! Only the attributes the loopback engine reads back are meaningful
//! (`a=ice-ufrag` and `a=candidate`); the rest keeps the descriptions shaped
//! like the ones a real data-channel-only engine produces.

use uuid::Uuid;

const SCTP_PORT: u16 = 5000;
const HOST_PRIORITY: u32 = 2_122_317_823;

/// ICE and DTLS credentials of one connection
#[derive(Debug, Clone)]
pub(super) struct Credentials {
    pub ufrag: String,
    pub pwd: String,
    pub fingerprint: String,
    pub session_id: u64,
}

impl Credentials {
    pub fn generate() -> Self {
        let ufrag = Uuid::new_v4().simple().to_string()[..8].to_owned();
        let pwd = Uuid::new_v4().simple().to_string();

        let mut digest = [0u8; 32];
        digest[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        digest[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        let fingerprint = digest
            .iter()
            .map(|byte| format!("{byte:02X}"))
            .collect::<Vec<_>>()
            .join(":");

        let session_id = (Uuid::new_v4().as_u128() as u64) & (i64::MAX as u64);

        Self {
            ufrag,
            pwd,
            fingerprint,
            session_id,
        }
    }
}

/// Builds an application-only session description.
///
/// `setup` is `actpass` for offers and `active` for answers.
pub(super) fn session_description(
    credentials: &Credentials,
    setup: &str,
    max_message_size: usize,
) -> String {
    let lines = [
        "v=0".to_owned(),
        format!("o=rtc {} 0 IN IP4 127.0.0.1", credentials.session_id),
        "s=-".to_owned(),
        "t=0 0".to_owned(),
        "a=group:BUNDLE 0".to_owned(),
        "a=msid-semantic:WMS *".to_owned(),
        format!("a=setup:{setup}"),
        format!("a=ice-ufrag:{}", credentials.ufrag),
        format!("a=ice-pwd:{}", credentials.pwd),
        "a=ice-options:trickle".to_owned(),
        format!("a=fingerprint:sha-256 {}", credentials.fingerprint),
        "m=application 9 UDP/DTLS/SCTP webrtc-datachannel".to_owned(),
        "c=IN IP4 0.0.0.0".to_owned(),
        "a=mid:0".to_owned(),
        "a=sendrecv".to_owned(),
        format!("a=sctp-port:{SCTP_PORT}"),
        format!("a=max-message-size:{max_message_size}"),
    ];
    let mut sdp = lines.join("\r\n");
    sdp.push_str("\r\n");
    sdp
}

fn attribute<'a>(sdp: &'a str, name: &str) -> impl Iterator<Item = &'a str> + 'a {
    let prefix = format!("a={name}:");
    sdp.lines()
        .filter_map(move |line| line.trim_end_matches('\r').strip_prefix(prefix.as_str()))
        .map(str::trim)
}

pub(super) fn ice_ufrag(sdp: &str) -> Option<&str> {
    attribute(sdp, "ice-ufrag").find(|ufrag| !ufrag.is_empty())
}

/// Candidates embedded in a description, as `a=candidate:` lines
pub(super) fn embedded_candidates(sdp: &str) -> Vec<String> {
    attribute(sdp, "candidate")
        .map(|value| format!("a=candidate:{value}"))
        .collect()
}

pub(super) fn host_candidate(address: &str, port: u16) -> String {
    format!("a=candidate:1 1 UDP {HOST_PRIORITY} {address} {port} typ host")
}

/// `address:port` of a candidate line, `None` when it is malformed
pub(super) fn candidate_address(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    let candidate = candidate.strip_prefix("a=").unwrap_or(candidate);
    let fields: Vec<&str> = candidate
        .strip_prefix("candidate:")?
        .split_whitespace()
        .collect();
    if fields.len() < 8 || fields[6] != "typ" {
        return None;
    }
    let port: u16 = fields[5].parse().ok()?;
    Some(format!("{}:{}", fields[4], port))
}
