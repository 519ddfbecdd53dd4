//! In-process loopback engine
//!
//! Simulates a peer network inside one process. Every connection gets ICE
//! credentials that end up in its session descriptions; two connections that
//! have exchanged descriptions (and at least one candidate each) find each
//! other by ufrag, connect, pair their channels and exchange messages.
//!
//! All engine state lives behind one lock. Operations mutate it and post
//! [`Event`]s to a queue drained by the `rtc-loopback` thread, which looks up
//! the callback and user pointer at delivery time and invokes the callback
//! with the lock released.

mod sdp;

use crate::engine::Engine;
use crate::ffi::*;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::ffi::{c_char, c_int, c_void, CString};
use std::io;
use std::sync::{Arc, Weak};
use std::thread;

/// Default local SCTP max message size (256 KiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 * 1024;

const BASE_PORT: u16 = 50000;
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
const DEFAULT_MID: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescriptionKind {
    Offer,
    Answer,
    PrAnswer,
    Rollback,
}

impl DescriptionKind {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "offer" => Some(Self::Offer),
            "answer" => Some(Self::Answer),
            "pranswer" => Some(Self::PrAnswer),
            "rollback" => Some(Self::Rollback),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::PrAnswer => "pranswer",
            Self::Rollback => "rollback",
        }
    }
}

#[derive(Debug, Clone)]
struct Description {
    sdp: String,
    kind: DescriptionKind,
}

#[derive(Default, Clone, Copy)]
struct PeerCallbacks {
    local_description: Option<DescriptionCallbackFn>,
    local_candidate: Option<CandidateCallbackFn>,
    state_change: Option<StateChangeCallbackFn>,
    gathering_state_change: Option<GatheringStateCallbackFn>,
    signaling_state_change: Option<SignalingStateCallbackFn>,
    data_channel: Option<DataChannelCallbackFn>,
}

#[derive(Default, Clone, Copy)]
struct ChannelCallbacks {
    open: Option<OpenCallbackFn>,
    closed: Option<ClosedCallbackFn>,
    error: Option<ErrorCallbackFn>,
    message: Option<MessageCallbackFn>,
    buffered_amount_low: Option<BufferedAmountLowCallbackFn>,
    available: Option<AvailableCallbackFn>,
}

struct Peer {
    credentials: sdp::Credentials,
    bind_address: String,
    port: u16,
    disable_auto_negotiation: bool,
    max_message_size: usize,
    callbacks: PeerCallbacks,
    state: RtcState,
    gathering: GatheringState,
    signaling: SignalingState,
    local: Option<Description>,
    remote: Option<Description>,
    remote_ufrag: Option<String>,
    local_candidate: Option<String>,
    remote_candidates: Vec<String>,
    remote_peer: Option<c_int>,
    channels: Vec<c_int>,
    next_stream: u16,
}

struct Channel {
    pc: c_int,
    label: String,
    protocol: String,
    reliability: RawReliability,
    negotiated: bool,
    stream: u16,
    open: bool,
    closed: bool,
    remote: Option<c_int>,
    inbox: VecDeque<Message>,
    buffered: usize,
    low_threshold: usize,
    callbacks: ChannelCallbacks,
}

#[derive(Debug, Clone)]
struct Message {
    data: Vec<u8>,
    text: bool,
}

/// Work for the callback thread
enum Event {
    Log(LogLevel, String),
    LocalDescription {
        pc: c_int,
        sdp: String,
        kind: DescriptionKind,
    },
    LocalCandidate {
        pc: c_int,
        candidate: String,
    },
    StateChange(c_int, RtcState),
    GatheringStateChange(c_int, GatheringState),
    SignalingStateChange(c_int, SignalingState),
    DataChannel {
        pc: c_int,
        dc: c_int,
    },
    Open(c_int),
    Closed(c_int),
    Error(c_int, String),
    Deliver {
        from: c_int,
        to: c_int,
        message: Message,
    },
    /// Flush queued messages into a newly attached message callback
    Drain(c_int),
}

struct Outbox(Sender<Event>);

impl Outbox {
    fn emit(&self, event: Event) {
        // The receiver only goes away together with the engine
        let _ = self.0.send(event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(Event::Log(level, message.into()));
    }
}

struct World {
    next_id: c_int,
    peers: HashMap<c_int, Peer>,
    channels: HashMap<c_int, Channel>,
    user_pointers: HashMap<c_int, usize>,
    outbox: Outbox,
}

impl World {
    fn allocate_id(&mut self) -> c_int {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn user_pointer(&self, id: c_int) -> *mut c_void {
        self.user_pointers.get(&id).copied().unwrap_or(0) as *mut c_void
    }

    fn create_peer_connection(&mut self, config: &EngineConfiguration) -> c_int {
        if let Some(url) = config
            .ice_servers
            .iter()
            .find(|url| !["stun:", "turn:", "turns:"].iter().any(|s| url.starts_with(s)))
        {
            self.outbox
                .log(LogLevel::Error, format!("Invalid ICE server URL: {url}"));
            return RTC_ERR_INVALID;
        }
        if config.port_range_begin > 0
            && config.port_range_end > 0
            && config.port_range_begin > config.port_range_end
        {
            self.outbox.log(LogLevel::Error, "Invalid port range");
            return RTC_ERR_INVALID;
        }

        let pc = self.allocate_id();
        let port = if config.port_range_begin > 0 {
            config.port_range_begin
        } else {
            BASE_PORT + (pc % 10_000) as u16
        };
        let max_message_size = usize::try_from(config.max_message_size)
            .ok()
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE);

        self.peers.insert(
            pc,
            Peer {
                credentials: sdp::Credentials::generate(),
                bind_address: config
                    .bind_address
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_owned()),
                port,
                disable_auto_negotiation: config.disable_auto_negotiation,
                max_message_size,
                callbacks: PeerCallbacks::default(),
                state: RtcState::New,
                gathering: GatheringState::New,
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                remote_ufrag: None,
                local_candidate: None,
                remote_candidates: Vec::new(),
                remote_peer: None,
                channels: Vec::new(),
                next_stream: 0,
            },
        );
        self.outbox
            .log(LogLevel::Debug, format!("Created peer connection {pc}"));
        pc
    }

    fn set_signaling(&mut self, pc: c_int, state: SignalingState) {
        if let Some(peer) = self.peers.get_mut(&pc) {
            if peer.signaling != state {
                peer.signaling = state;
                self.outbox.emit(Event::SignalingStateChange(pc, state));
            }
        }
    }

    fn set_local_description(&mut self, pc: c_int, kind: Option<DescriptionKind>) -> c_int {
        let Some(peer) = self.peers.get_mut(&pc) else {
            return RTC_ERR_INVALID;
        };
        if peer.state == RtcState::Closed {
            return RTC_ERR_FAILURE;
        }

        let kind = kind.unwrap_or(match peer.signaling {
            SignalingState::HaveRemoteOffer | SignalingState::HaveLocalPrAnswer => {
                DescriptionKind::Answer
            }
            _ => DescriptionKind::Offer,
        });

        use SignalingState::*;
        let next = match (kind, peer.signaling) {
            (DescriptionKind::Offer, Stable | HaveLocalOffer) => HaveLocalOffer,
            (DescriptionKind::Answer, HaveRemoteOffer | HaveLocalPrAnswer) => Stable,
            (DescriptionKind::PrAnswer, HaveRemoteOffer | HaveLocalPrAnswer) => HaveLocalPrAnswer,
            (DescriptionKind::Rollback, current) => {
                match current {
                    HaveLocalOffer => peer.local = None,
                    HaveRemoteOffer => {
                        peer.remote = None;
                        peer.remote_ufrag = None;
                    }
                    _ => {}
                }
                self.set_signaling(pc, Stable);
                return RTC_ERR_SUCCESS;
            }
            (kind, current) => {
                self.outbox.log(
                    LogLevel::Error,
                    format!(
                        "Unexpected local {} in signaling state {:?}",
                        kind.as_str(),
                        current
                    ),
                );
                return RTC_ERR_FAILURE;
            }
        };

        let setup = if kind == DescriptionKind::Offer {
            "actpass"
        } else {
            "active"
        };
        let description = sdp::session_description(&peer.credentials, setup, peer.max_message_size);
        peer.local = Some(Description {
            sdp: description.clone(),
            kind,
        });
        let candidate = if peer.gathering == GatheringState::New {
            let candidate = sdp::host_candidate(&peer.bind_address, peer.port);
            peer.gathering = GatheringState::Complete;
            peer.local_candidate = Some(candidate.clone());
            Some(candidate)
        } else {
            None
        };

        self.set_signaling(pc, next);
        self.outbox.emit(Event::LocalDescription {
            pc,
            sdp: description,
            kind,
        });
        if let Some(candidate) = candidate {
            self.outbox
                .emit(Event::GatheringStateChange(pc, GatheringState::InProgress));
            self.outbox.emit(Event::LocalCandidate { pc, candidate });
            self.outbox
                .emit(Event::GatheringStateChange(pc, GatheringState::Complete));
        }

        self.try_connect(pc);
        RTC_ERR_SUCCESS
    }

    fn set_remote_description(&mut self, pc: c_int, description: &str, kind: Option<&str>) -> c_int {
        let Some(peer) = self.peers.get_mut(&pc) else {
            return RTC_ERR_INVALID;
        };
        if peer.state == RtcState::Closed {
            return RTC_ERR_FAILURE;
        }

        let kind = match kind {
            Some(value) => match DescriptionKind::parse(value) {
                Some(kind) => kind,
                None => return RTC_ERR_INVALID,
            },
            None => match peer.signaling {
                SignalingState::HaveLocalOffer | SignalingState::HaveRemotePrAnswer => {
                    DescriptionKind::Answer
                }
                _ => DescriptionKind::Offer,
            },
        };
        let Some(ufrag) = sdp::ice_ufrag(description) else {
            self.outbox
                .log(LogLevel::Error, "Remote description has no ICE ufrag");
            return RTC_ERR_INVALID;
        };

        use SignalingState::*;
        let next = match (kind, peer.signaling) {
            (DescriptionKind::Offer, Stable | HaveRemoteOffer) => HaveRemoteOffer,
            (DescriptionKind::Answer, HaveLocalOffer | HaveRemotePrAnswer) => Stable,
            (DescriptionKind::PrAnswer, HaveLocalOffer | HaveRemotePrAnswer) => HaveRemotePrAnswer,
            (DescriptionKind::Rollback, _) => return RTC_ERR_INVALID,
            (kind, current) => {
                self.outbox.log(
                    LogLevel::Error,
                    format!(
                        "Unexpected remote {} in signaling state {:?}",
                        kind.as_str(),
                        current
                    ),
                );
                return RTC_ERR_FAILURE;
            }
        };

        peer.remote_ufrag = Some(ufrag.to_owned());
        peer.remote = Some(Description {
            sdp: description.to_owned(),
            kind,
        });
        peer.remote_candidates
            .extend(sdp::embedded_candidates(description));
        let auto_answer = kind == DescriptionKind::Offer && !peer.disable_auto_negotiation;

        self.set_signaling(pc, next);
        if auto_answer {
            return self.set_local_description(pc, Some(DescriptionKind::Answer));
        }
        self.try_connect(pc);
        RTC_ERR_SUCCESS
    }

    fn add_remote_candidate(&mut self, pc: c_int, candidate: &str) -> c_int {
        let Some(peer) = self.peers.get_mut(&pc) else {
            return RTC_ERR_INVALID;
        };
        if peer.remote.is_none() {
            self.outbox.log(
                LogLevel::Error,
                "Got a remote candidate without remote description",
            );
            return RTC_ERR_FAILURE;
        }
        if sdp::candidate_address(candidate).is_none() {
            self.outbox
                .log(LogLevel::Error, format!("Invalid candidate: {candidate}"));
            return RTC_ERR_INVALID;
        }
        peer.remote_candidates.push(candidate.trim().to_owned());
        self.try_connect(pc);
        RTC_ERR_SUCCESS
    }

    /// The remote ufrag of a connection that is ready to connect
    fn ready_for(&self, pc: c_int) -> Option<&str> {
        let peer = self.peers.get(&pc)?;
        let ready = peer.state == RtcState::New
            && peer.signaling == SignalingState::Stable
            && peer.local.is_some()
            && peer.remote.is_some()
            && peer.local_candidate.is_some()
            && !peer.remote_candidates.is_empty();
        if ready {
            peer.remote_ufrag.as_deref()
        } else {
            None
        }
    }

    fn try_connect(&mut self, pc: c_int) {
        let Some(remote_ufrag) = self.ready_for(pc).map(str::to_owned) else {
            return;
        };
        let Some(other) = self
            .peers
            .iter()
            .find(|(id, peer)| **id != pc && peer.credentials.ufrag == remote_ufrag)
            .map(|(id, _)| *id)
        else {
            return;
        };
        let own_ufrag = match self.peers.get(&pc) {
            Some(peer) => peer.credentials.ufrag.clone(),
            None => return,
        };
        if self.ready_for(other) != Some(own_ufrag.as_str()) {
            return;
        }

        for (id, state) in [
            (pc, RtcState::Connecting),
            (other, RtcState::Connecting),
            (pc, RtcState::Connected),
            (other, RtcState::Connected),
        ] {
            if let Some(peer) = self.peers.get_mut(&id) {
                peer.state = state;
                peer.remote_peer = Some(if id == pc { other } else { pc });
                self.outbox.emit(Event::StateChange(id, state));
            }
        }
        self.outbox.log(
            LogLevel::Info,
            format!("Peer connections {pc} and {other} connected"),
        );

        self.negotiate_channels(pc, other);
        self.negotiate_channels(other, pc);
    }

    fn negotiate_channels(&mut self, from: c_int, to: c_int) {
        let pending: Vec<c_int> = match self.peers.get(&from) {
            Some(peer) => peer
                .channels
                .iter()
                .copied()
                .filter(|dc| {
                    self.channels
                        .get(dc)
                        .is_some_and(|channel| channel.remote.is_none() && !channel.closed)
                })
                .collect(),
            None => return,
        };
        for dc in pending {
            self.pair_channel(dc, to);
        }
    }

    /// Finds or creates the counterpart of `dc` on `to` and opens both ends
    fn pair_channel(&mut self, dc: c_int, to: c_int) {
        let Some(channel) = self.channels.get(&dc) else {
            return;
        };
        if channel.remote.is_some() {
            return;
        }

        if channel.negotiated {
            let stream = channel.stream;
            let counterpart = self.peers.get(&to).and_then(|peer| {
                peer.channels.iter().copied().find(|id| {
                    self.channels.get(id).is_some_and(|other| {
                        other.negotiated
                            && other.remote.is_none()
                            && !other.closed
                            && other.stream == stream
                    })
                })
            });
            if let Some(counterpart) = counterpart {
                self.link(dc, counterpart);
            }
            return;
        }

        let label = channel.label.clone();
        let protocol = channel.protocol.clone();
        let reliability = channel.reliability;
        let stream = channel.stream;

        let counterpart = self.allocate_id();
        let Some(peer) = self.peers.get_mut(&to) else {
            return;
        };
        peer.channels.push(counterpart);
        self.channels.insert(
            counterpart,
            Channel {
                pc: to,
                label,
                protocol,
                reliability,
                negotiated: false,
                stream,
                open: false,
                closed: false,
                remote: None,
                inbox: VecDeque::new(),
                buffered: 0,
                low_threshold: 0,
                callbacks: ChannelCallbacks::default(),
            },
        );
        self.outbox.emit(Event::DataChannel {
            pc: to,
            dc: counterpart,
        });
        self.link(dc, counterpart);
    }

    fn link(&mut self, a: c_int, b: c_int) {
        for (id, remote) in [(a, b), (b, a)] {
            if let Some(channel) = self.channels.get_mut(&id) {
                channel.remote = Some(remote);
                channel.open = true;
                self.outbox.emit(Event::Open(id));
            }
        }
    }

    fn create_data_channel(&mut self, pc: c_int, label: &str, init: Option<&ChannelInit>) -> c_int {
        let init = init.cloned().unwrap_or_default();
        let Some(peer) = self.peers.get(&pc) else {
            return RTC_ERR_INVALID;
        };
        if peer.state == RtcState::Closed {
            return RTC_ERR_FAILURE;
        }

        let used: Vec<u16> = peer
            .channels
            .iter()
            .filter_map(|dc| self.channels.get(dc).map(|channel| channel.stream))
            .collect();
        let stream = if init.manual_stream {
            if init.stream > 65534 {
                self.outbox
                    .log(LogLevel::Error, format!("Invalid stream id {}", init.stream));
                return RTC_ERR_INVALID;
            }
            init.stream
        } else {
            let mut stream = peer.next_stream;
            while used.contains(&stream) {
                stream = stream.wrapping_add(1) % 65535;
            }
            stream
        };

        let dc = self.allocate_id();
        let Some(peer) = self.peers.get_mut(&pc) else {
            return RTC_ERR_INVALID;
        };
        if !init.manual_stream {
            peer.next_stream = stream.wrapping_add(1) % 65535;
        }
        peer.channels.push(dc);
        let connected_to = peer
            .remote_peer
            .filter(|_| peer.state == RtcState::Connected);
        let offer = connected_to.is_none()
            && !init.negotiated
            && !peer.disable_auto_negotiation
            && peer.signaling == SignalingState::Stable
            && peer.local.is_none();

        self.channels.insert(
            dc,
            Channel {
                pc,
                label: label.to_owned(),
                protocol: init.protocol.unwrap_or_default(),
                reliability: init.reliability,
                negotiated: init.negotiated,
                stream,
                open: false,
                closed: false,
                remote: None,
                inbox: VecDeque::new(),
                buffered: 0,
                low_threshold: 0,
                callbacks: ChannelCallbacks::default(),
            },
        );
        self.outbox.log(
            LogLevel::Debug,
            format!("Created data channel {dc} \"{label}\" on peer connection {pc}"),
        );

        if let Some(remote) = connected_to {
            self.pair_channel(dc, remote);
        } else if offer {
            self.set_local_description(pc, Some(DescriptionKind::Offer));
        }
        dc
    }

    fn close_channel(&mut self, dc: c_int, reason: Option<&str>) {
        let Some(channel) = self.channels.get_mut(&dc) else {
            return;
        };
        channel.remote = None;
        channel.open = false;
        if !channel.closed {
            channel.closed = true;
            if let Some(reason) = reason {
                self.outbox.emit(Event::Error(dc, reason.to_owned()));
            }
            self.outbox.emit(Event::Closed(dc));
        }
    }

    fn delete_data_channel(&mut self, dc: c_int) -> c_int {
        let Some(channel) = self.channels.remove(&dc) else {
            return RTC_ERR_INVALID;
        };
        self.user_pointers.remove(&dc);
        if let Some(peer) = self.peers.get_mut(&channel.pc) {
            peer.channels.retain(|id| *id != dc);
        }
        if let Some(remote) = channel.remote {
            self.close_channel(remote, None);
        }
        RTC_ERR_SUCCESS
    }

    fn delete_peer_connection(&mut self, pc: c_int) -> c_int {
        let Some(peer) = self.peers.remove(&pc) else {
            return RTC_ERR_INVALID;
        };
        self.user_pointers.remove(&pc);

        for dc in &peer.channels {
            let remote = self.channels.get(dc).and_then(|channel| channel.remote);
            self.close_channel(*dc, None);
            if let Some(remote) = remote {
                self.close_channel(remote, Some("Peer connection closed"));
            }
        }
        if let Some(remote) = peer.remote_peer {
            if let Some(other) = self.peers.get_mut(&remote) {
                other.remote_peer = None;
                if other.state == RtcState::Connected {
                    other.state = RtcState::Disconnected;
                    self.outbox
                        .emit(Event::StateChange(remote, RtcState::Disconnected));
                }
            }
        }
        self.outbox
            .log(LogLevel::Debug, format!("Deleted peer connection {pc}"));
        RTC_ERR_SUCCESS
    }

    fn send_message(&mut self, dc: c_int, data: &[u8], text: bool) -> c_int {
        let Some(channel) = self.channels.get_mut(&dc) else {
            return RTC_ERR_INVALID;
        };
        if !channel.open {
            return RTC_ERR_FAILURE;
        }
        let limit = self
            .peers
            .get(&channel.pc)
            .map_or(DEFAULT_MAX_MESSAGE_SIZE, |peer| peer.max_message_size);
        if data.len() > limit {
            self.outbox.log(
                LogLevel::Warning,
                format!("Message size {} exceeds limit {limit}", data.len()),
            );
            return RTC_ERR_INVALID;
        }
        let Some(to) = channel.remote else {
            return RTC_ERR_FAILURE;
        };
        channel.buffered += data.len();
        self.outbox.emit(Event::Deliver {
            from: dc,
            to,
            message: Message {
                data: data.to_vec(),
                text,
            },
        });
        RTC_ERR_SUCCESS
    }

    fn receive_message(&mut self, dc: c_int, buffer: &mut [u8], size: &mut c_int) -> c_int {
        let Some(channel) = self.channels.get_mut(&dc) else {
            return RTC_ERR_INVALID;
        };
        let Some(front) = channel.inbox.front() else {
            return RTC_ERR_NOT_AVAIL;
        };
        let capacity = usize::try_from(*size).unwrap_or(0).min(buffer.len());
        let len = front.data.len();
        if len > capacity {
            *size = c_int::try_from(len).unwrap_or(c_int::MAX);
            return RTC_ERR_TOO_SMALL;
        }
        let Some(message) = channel.inbox.pop_front() else {
            return RTC_ERR_NOT_AVAIL;
        };
        buffer[..len].copy_from_slice(&message.data);
        *size = len as c_int;
        RTC_ERR_SUCCESS
    }
}

struct Shared {
    world: Mutex<World>,
    logger: Mutex<Option<(LogLevel, LogCallbackFn)>>,
}

impl Shared {
    fn peer_callback<F>(
        &self,
        pc: c_int,
        pick: impl FnOnce(&PeerCallbacks) -> Option<F>,
    ) -> Option<(F, *mut c_void)> {
        let world = self.world.lock();
        let callback = pick(&world.peers.get(&pc)?.callbacks)?;
        Some((callback, world.user_pointer(pc)))
    }

    fn channel_callback<F>(
        &self,
        dc: c_int,
        pick: impl FnOnce(&ChannelCallbacks) -> Option<F>,
    ) -> Option<(F, *mut c_void)> {
        let world = self.world.lock();
        let callback = pick(&world.channels.get(&dc)?.callbacks)?;
        Some((callback, world.user_pointer(dc)))
    }

    /// Runs on the callback thread; the world lock is never held while a
    /// callback runs.
    fn dispatch(&self, event: Event) {
        // SAFETY: callbacks are `extern "C"` functions registered through the
        // engine contract and receive pointers valid for the duration of the
        // call.
        unsafe {
            match event {
                Event::Log(level, message) => {
                    let logger = *self.logger.lock();
                    if let Some((max, callback)) = logger {
                        if level != LogLevel::None && level <= max {
                            if let Ok(message) = CString::new(message) {
                                callback(level.as_raw(), message.as_ptr());
                            }
                        }
                    }
                }
                Event::LocalDescription { pc, sdp, kind } => {
                    if let Some((callback, ptr)) = self.peer_callback(pc, |c| c.local_description)
                    {
                        if let (Ok(sdp), Ok(kind)) = (CString::new(sdp), CString::new(kind.as_str()))
                        {
                            callback(pc, sdp.as_ptr(), kind.as_ptr(), ptr);
                        }
                    }
                }
                Event::LocalCandidate { pc, candidate } => {
                    if let Some((callback, ptr)) = self.peer_callback(pc, |c| c.local_candidate) {
                        if let (Ok(candidate), Ok(mid)) =
                            (CString::new(candidate), CString::new(DEFAULT_MID))
                        {
                            callback(pc, candidate.as_ptr(), mid.as_ptr(), ptr);
                        }
                    }
                }
                Event::StateChange(pc, state) => {
                    if let Some((callback, ptr)) = self.peer_callback(pc, |c| c.state_change) {
                        callback(pc, state.as_raw(), ptr);
                    }
                }
                Event::GatheringStateChange(pc, state) => {
                    if let Some((callback, ptr)) =
                        self.peer_callback(pc, |c| c.gathering_state_change)
                    {
                        callback(pc, state.as_raw(), ptr);
                    }
                }
                Event::SignalingStateChange(pc, state) => {
                    if let Some((callback, ptr)) =
                        self.peer_callback(pc, |c| c.signaling_state_change)
                    {
                        callback(pc, state.as_raw(), ptr);
                    }
                }
                Event::DataChannel { pc, dc } => {
                    if let Some((callback, ptr)) = self.peer_callback(pc, |c| c.data_channel) {
                        callback(pc, dc, ptr);
                    }
                }
                Event::Open(dc) => {
                    if let Some((callback, ptr)) = self.channel_callback(dc, |c| c.open) {
                        callback(dc, ptr);
                    }
                }
                Event::Closed(dc) => {
                    if let Some((callback, ptr)) = self.channel_callback(dc, |c| c.closed) {
                        callback(dc, ptr);
                    }
                }
                Event::Error(dc, error) => {
                    if let Some((callback, ptr)) = self.channel_callback(dc, |c| c.error) {
                        if let Ok(error) = CString::new(error) {
                            callback(dc, error.as_ptr(), ptr);
                        }
                    }
                }
                Event::Deliver { from, to, message } => self.deliver(from, to, message),
                Event::Drain(dc) => self.drain(dc, false),
            }
        }
    }

    fn deliver(&self, from: c_int, to: c_int, message: Message) {
        let len = message.data.len();
        let (low, queued) = {
            let mut guard = self.world.lock();
            let world = &mut *guard;
            let mut low = None;
            if let Some(sender) = world.channels.get_mut(&from) {
                let before = sender.buffered;
                sender.buffered = before.saturating_sub(len);
                if before > sender.low_threshold && sender.buffered <= sender.low_threshold {
                    low = sender
                        .callbacks
                        .buffered_amount_low
                        .map(|callback| (callback, world.user_pointers.get(&from).copied()));
                }
            }
            let queued = match world.channels.get_mut(&to) {
                Some(receiver) if receiver.open => {
                    receiver.inbox.push_back(message);
                    true
                }
                _ => false,
            };
            (low, queued)
        };

        if let Some((callback, ptr)) = low {
            // SAFETY: see `dispatch`
            unsafe { callback(from, ptr.unwrap_or(0) as *mut c_void) };
        }
        if queued {
            self.drain(to, true);
        }
    }

    /// Hands queued messages to the message callback, or signals
    /// availability when none is attached.
    fn drain(&self, dc: c_int, notify_available: bool) {
        loop {
            let next = {
                let mut world = self.world.lock();
                let ptr = world.user_pointer(dc);
                let Some(channel) = world.channels.get_mut(&dc) else {
                    return;
                };
                match channel.callbacks.message {
                    Some(callback) => match channel.inbox.pop_front() {
                        Some(message) => Ok((callback, message, ptr)),
                        None => return,
                    },
                    None => Err(channel
                        .callbacks
                        .available
                        .filter(|_| notify_available && !channel.inbox.is_empty())
                        .map(|callback| (callback, ptr))),
                }
            };

            match next {
                Ok((callback, message, ptr)) => {
                    let text = if message.text {
                        CString::new(message.data.clone()).ok()
                    } else {
                        None
                    };
                    // SAFETY: see `dispatch`
                    unsafe {
                        match text {
                            Some(text) => callback(
                                dc,
                                text.as_ptr(),
                                -(message.data.len() as c_int) - 1,
                                ptr,
                            ),
                            None => callback(
                                dc,
                                message.data.as_ptr() as *const c_char,
                                message.data.len() as c_int,
                                ptr,
                            ),
                        }
                    }
                }
                Err(available) => {
                    if let Some((callback, ptr)) = available {
                        // SAFETY: see `dispatch`
                        unsafe { callback(dc, ptr) };
                    }
                    return;
                }
            }
        }
    }
}

fn run_worker(events: Receiver<Event>, shared: Weak<Shared>) {
    while let Ok(event) = events.recv() {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.dispatch(event);
    }
}

/// An [`Engine`] that connects peers living in the same process
#[derive(Clone)]
pub struct LoopbackEngine {
    shared: Arc<Shared>,
}

impl LoopbackEngine {
    /// Creates the engine and starts its `rtc-loopback` callback thread
    pub fn new() -> io::Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(Shared {
            world: Mutex::new(World {
                next_id: 1,
                peers: HashMap::new(),
                channels: HashMap::new(),
                user_pointers: HashMap::new(),
                outbox: Outbox(sender),
            }),
            logger: Mutex::new(None),
        });

        let weak = Arc::downgrade(&shared);
        thread::Builder::new()
            .name("rtc-loopback".to_owned())
            .spawn(move || run_worker(receiver, weak))?;

        Ok(Self { shared })
    }

    /// Whether `id` names a connection or channel that has not been deleted
    pub fn contains(&self, id: c_int) -> bool {
        let world = self.shared.world.lock();
        world.peers.contains_key(&id) || world.channels.contains_key(&id)
    }

    /// Number of connections and channels not yet deleted
    pub fn live_resources(&self) -> usize {
        let world = self.shared.world.lock();
        world.peers.len() + world.channels.len()
    }

    fn with_world<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        f(&mut self.shared.world.lock())
    }

    fn set_peer_callback(&self, pc: c_int, set: impl FnOnce(&mut PeerCallbacks)) -> c_int {
        self.with_world(|world| match world.peers.get_mut(&pc) {
            Some(peer) => {
                set(&mut peer.callbacks);
                RTC_ERR_SUCCESS
            }
            None => RTC_ERR_INVALID,
        })
    }

    fn set_channel_callback(&self, dc: c_int, set: impl FnOnce(&mut ChannelCallbacks)) -> c_int {
        self.with_world(|world| match world.channels.get_mut(&dc) {
            Some(channel) => {
                set(&mut channel.callbacks);
                RTC_ERR_SUCCESS
            }
            None => RTC_ERR_INVALID,
        })
    }

    fn query_peer(
        &self,
        pc: c_int,
        buffer: &mut [u8],
        query: impl FnOnce(&Peer) -> Option<String>,
    ) -> c_int {
        self.with_world(|world| match world.peers.get(&pc) {
            Some(peer) => match query(peer) {
                Some(value) => copy_to_buffer(&value, buffer),
                None => RTC_ERR_NOT_AVAIL,
            },
            None => RTC_ERR_INVALID,
        })
    }

    fn remote_candidate(peer: &Peer) -> Option<&String> {
        if peer.state == RtcState::Connected {
            peer.remote_candidates.first()
        } else {
            None
        }
    }
}

impl Engine for LoopbackEngine {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn init_logger(&self, level: LogLevel, callback: Option<LogCallbackFn>) {
        *self.shared.logger.lock() = callback.map(|callback| (level, callback));
    }

    fn preload(&self) {
        self.with_world(|world| world.outbox.log(LogLevel::Debug, "Preloaded loopback engine"));
    }

    fn cleanup(&self) {
        self.with_world(|world| {
            let dropped = world.peers.len() + world.channels.len();
            world.peers.clear();
            world.channels.clear();
            world.user_pointers.clear();
            if dropped > 0 {
                world.outbox.log(
                    LogLevel::Warning,
                    format!("Cleanup dropped {dropped} live resources"),
                );
            }
        });
    }

    fn set_user_pointer(&self, id: c_int, ptr: *mut c_void) {
        self.with_world(|world| {
            if ptr.is_null() {
                world.user_pointers.remove(&id);
            } else {
                world.user_pointers.insert(id, ptr as usize);
            }
        });
    }

    fn create_peer_connection(&self, config: &EngineConfiguration) -> c_int {
        self.with_world(|world| world.create_peer_connection(config))
    }

    fn delete_peer_connection(&self, pc: c_int) -> c_int {
        self.with_world(|world| world.delete_peer_connection(pc))
    }

    fn set_local_description_callback(
        &self,
        pc: c_int,
        cb: Option<DescriptionCallbackFn>,
    ) -> c_int {
        self.set_peer_callback(pc, |callbacks| callbacks.local_description = cb)
    }

    fn set_local_candidate_callback(&self, pc: c_int, cb: Option<CandidateCallbackFn>) -> c_int {
        self.set_peer_callback(pc, |callbacks| callbacks.local_candidate = cb)
    }

    fn set_state_change_callback(&self, pc: c_int, cb: Option<StateChangeCallbackFn>) -> c_int {
        self.set_peer_callback(pc, |callbacks| callbacks.state_change = cb)
    }

    fn set_gathering_state_change_callback(
        &self,
        pc: c_int,
        cb: Option<GatheringStateCallbackFn>,
    ) -> c_int {
        self.set_peer_callback(pc, |callbacks| callbacks.gathering_state_change = cb)
    }

    fn set_signaling_state_change_callback(
        &self,
        pc: c_int,
        cb: Option<SignalingStateCallbackFn>,
    ) -> c_int {
        self.set_peer_callback(pc, |callbacks| callbacks.signaling_state_change = cb)
    }

    fn set_data_channel_callback(&self, pc: c_int, cb: Option<DataChannelCallbackFn>) -> c_int {
        self.set_peer_callback(pc, |callbacks| callbacks.data_channel = cb)
    }

    fn set_local_description(&self, pc: c_int, sdp_type: Option<&str>) -> c_int {
        let kind = match sdp_type {
            Some(value) => match DescriptionKind::parse(value) {
                Some(kind) => Some(kind),
                None => return RTC_ERR_INVALID,
            },
            None => None,
        };
        self.with_world(|world| world.set_local_description(pc, kind))
    }

    fn set_remote_description(&self, pc: c_int, sdp: &str, sdp_type: Option<&str>) -> c_int {
        self.with_world(|world| world.set_remote_description(pc, sdp, sdp_type))
    }

    fn add_remote_candidate(&self, pc: c_int, candidate: &str, _mid: Option<&str>) -> c_int {
        self.with_world(|world| world.add_remote_candidate(pc, candidate))
    }

    fn get_local_description(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        self.query_peer(pc, buffer, |peer| peer.local.as_ref().map(|d| d.sdp.clone()))
    }

    fn get_remote_description(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        self.query_peer(pc, buffer, |peer| peer.remote.as_ref().map(|d| d.sdp.clone()))
    }

    fn get_local_description_type(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        self.query_peer(pc, buffer, |peer| {
            peer.local.as_ref().map(|d| d.kind.as_str().to_owned())
        })
    }

    fn get_remote_description_type(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        self.query_peer(pc, buffer, |peer| {
            peer.remote.as_ref().map(|d| d.kind.as_str().to_owned())
        })
    }

    fn get_local_address(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        self.query_peer(pc, buffer, |peer| {
            (peer.state == RtcState::Connected)
                .then(|| format!("{}:{}", peer.bind_address, peer.port))
        })
    }

    fn get_remote_address(&self, pc: c_int, buffer: &mut [u8]) -> c_int {
        self.query_peer(pc, buffer, |peer| {
            Self::remote_candidate(peer).and_then(|c| sdp::candidate_address(c))
        })
    }

    fn get_selected_candidate_pair(
        &self,
        pc: c_int,
        local: &mut [u8],
        remote: &mut [u8],
    ) -> c_int {
        self.with_world(|world| {
            let Some(peer) = world.peers.get(&pc) else {
                return RTC_ERR_INVALID;
            };
            let (Some(local_candidate), Some(remote_candidate)) =
                (peer.local_candidate.as_ref(), Self::remote_candidate(peer))
            else {
                return RTC_ERR_NOT_AVAIL;
            };
            let local_size = copy_to_buffer(local_candidate, local);
            if local_size < 0 {
                return local_size;
            }
            let remote_size = copy_to_buffer(remote_candidate, remote);
            if remote_size < 0 {
                return remote_size;
            }
            local_size.max(remote_size)
        })
    }

    fn create_data_channel(&self, pc: c_int, label: &str, init: Option<&ChannelInit>) -> c_int {
        self.with_world(|world| world.create_data_channel(pc, label, init))
    }

    fn delete_data_channel(&self, dc: c_int) -> c_int {
        self.with_world(|world| world.delete_data_channel(dc))
    }

    fn get_data_channel_stream(&self, dc: c_int) -> c_int {
        self.with_world(|world| {
            world
                .channels
                .get(&dc)
                .map_or(RTC_ERR_INVALID, |channel| c_int::from(channel.stream))
        })
    }

    fn get_data_channel_label(&self, dc: c_int, buffer: &mut [u8]) -> c_int {
        self.with_world(|world| match world.channels.get(&dc) {
            Some(channel) => copy_to_buffer(&channel.label, buffer),
            None => RTC_ERR_INVALID,
        })
    }

    fn get_data_channel_protocol(&self, dc: c_int, buffer: &mut [u8]) -> c_int {
        self.with_world(|world| match world.channels.get(&dc) {
            Some(channel) => copy_to_buffer(&channel.protocol, buffer),
            None => RTC_ERR_INVALID,
        })
    }

    fn get_data_channel_reliability(&self, dc: c_int, reliability: &mut RawReliability) -> c_int {
        self.with_world(|world| match world.channels.get(&dc) {
            Some(channel) => {
                *reliability = channel.reliability;
                RTC_ERR_SUCCESS
            }
            None => RTC_ERR_INVALID,
        })
    }

    fn set_open_callback(&self, id: c_int, cb: Option<OpenCallbackFn>) -> c_int {
        self.set_channel_callback(id, |callbacks| callbacks.open = cb)
    }

    fn set_closed_callback(&self, id: c_int, cb: Option<ClosedCallbackFn>) -> c_int {
        self.set_channel_callback(id, |callbacks| callbacks.closed = cb)
    }

    fn set_error_callback(&self, id: c_int, cb: Option<ErrorCallbackFn>) -> c_int {
        self.set_channel_callback(id, |callbacks| callbacks.error = cb)
    }

    fn set_message_callback(&self, id: c_int, cb: Option<MessageCallbackFn>) -> c_int {
        self.with_world(|world| match world.channels.get_mut(&id) {
            Some(channel) => {
                channel.callbacks.message = cb;
                if cb.is_some() && !channel.inbox.is_empty() {
                    world.outbox.emit(Event::Drain(id));
                }
                RTC_ERR_SUCCESS
            }
            None => RTC_ERR_INVALID,
        })
    }

    fn set_buffered_amount_low_callback(
        &self,
        id: c_int,
        cb: Option<BufferedAmountLowCallbackFn>,
    ) -> c_int {
        self.set_channel_callback(id, |callbacks| callbacks.buffered_amount_low = cb)
    }

    fn set_available_callback(&self, id: c_int, cb: Option<AvailableCallbackFn>) -> c_int {
        self.set_channel_callback(id, |callbacks| callbacks.available = cb)
    }

    fn is_open(&self, id: c_int) -> bool {
        self.with_world(|world| world.channels.get(&id).is_some_and(|channel| channel.open))
    }

    fn is_closed(&self, id: c_int) -> bool {
        self.with_world(|world| world.channels.get(&id).is_none_or(|channel| channel.closed))
    }

    fn send_message(&self, id: c_int, data: &[u8], size: c_int) -> c_int {
        self.with_world(|world| world.send_message(id, data, size < 0))
    }

    fn get_buffered_amount(&self, id: c_int) -> c_int {
        self.with_world(|world| match world.channels.get(&id) {
            Some(channel) => c_int::try_from(channel.buffered).unwrap_or(c_int::MAX),
            None => RTC_ERR_INVALID,
        })
    }

    fn set_buffered_amount_low_threshold(&self, id: c_int, amount: c_int) -> c_int {
        let Ok(amount) = usize::try_from(amount) else {
            return RTC_ERR_INVALID;
        };
        self.with_world(|world| match world.channels.get_mut(&id) {
            Some(channel) => {
                channel.low_threshold = amount;
                RTC_ERR_SUCCESS
            }
            None => RTC_ERR_INVALID,
        })
    }

    fn receive_message(&self, id: c_int, buffer: &mut [u8], size: &mut c_int) -> c_int {
        self.with_world(|world| world.receive_message(id, buffer, size))
    }

    fn get_available_amount(&self, id: c_int) -> c_int {
        self.with_world(|world| match world.channels.get(&id) {
            Some(channel) => {
                let total: usize = channel.inbox.iter().map(|m| m.data.len()).sum();
                c_int::try_from(total).unwrap_or(c_int::MAX)
            }
            None => RTC_ERR_INVALID,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn engine() -> LoopbackEngine {
        LoopbackEngine::new().expect("spawn loopback thread")
    }

    fn manual() -> EngineConfiguration {
        EngineConfiguration {
            disable_auto_negotiation: true,
            ..Default::default()
        }
    }

    fn read(query: impl FnOnce(&mut [u8]) -> c_int) -> Option<String> {
        let mut buffer = vec![0u8; 65535];
        let written = query(&mut buffer);
        if written <= 0 {
            return None;
        }
        let len = written as usize - 1;
        Some(String::from_utf8_lossy(&buffer[..len]).into_owned())
    }

    /// Exchanges descriptions and candidates synchronously
    fn connect(engine: &LoopbackEngine, a: c_int, b: c_int) {
        assert_eq!(engine.set_local_description(a, Some("offer")), 0);
        let offer = read(|buf| engine.get_local_description(a, buf)).expect("offer");
        assert_eq!(engine.set_remote_description(b, &offer, Some("offer")), 0);
        assert_eq!(engine.set_local_description(b, Some("answer")), 0);
        let answer = read(|buf| engine.get_local_description(b, buf)).expect("answer");
        assert_eq!(engine.set_remote_description(a, &answer, Some("answer")), 0);

        assert_eq!(
            engine.add_remote_candidate(a, &sdp::host_candidate("127.0.0.1", 50002), Some("0")),
            0
        );
        assert_eq!(
            engine.add_remote_candidate(b, &sdp::host_candidate("127.0.0.1", 50001), Some("0")),
            0
        );
    }

    #[test]
    fn test_unknown_ids_are_invalid() {
        let engine = engine();
        let mut buffer = [0u8; 16];
        assert_eq!(engine.delete_peer_connection(99), RTC_ERR_INVALID);
        assert_eq!(engine.delete_data_channel(99), RTC_ERR_INVALID);
        assert_eq!(engine.get_data_channel_label(99, &mut buffer), RTC_ERR_INVALID);
        assert_eq!(engine.set_open_callback(99, None), RTC_ERR_INVALID);
        assert!(!engine.is_open(99));
        assert!(engine.is_closed(99));
    }

    #[test]
    fn test_create_rejects_bad_configuration() {
        let engine = engine();
        let config = EngineConfiguration {
            ice_servers: vec!["http://example.com".to_owned()],
            ..Default::default()
        };
        assert_eq!(engine.create_peer_connection(&config), RTC_ERR_INVALID);

        let config = EngineConfiguration {
            port_range_begin: 6000,
            port_range_end: 5000,
            ..Default::default()
        };
        assert_eq!(engine.create_peer_connection(&config), RTC_ERR_INVALID);
        assert_eq!(engine.live_resources(), 0);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let engine = engine();
        let first = engine.create_peer_connection(&manual());
        assert!(first > 0);
        assert_eq!(engine.delete_peer_connection(first), 0);
        let second = engine.create_peer_connection(&manual());
        assert!(second > first);
        assert!(!engine.contains(first));
        assert!(engine.contains(second));
    }

    #[test]
    fn test_channel_metadata_queries() {
        let engine = engine();
        let pc = engine.create_peer_connection(&manual());
        let init = ChannelInit {
            reliability: RawReliability {
                unordered: true,
                unreliable: true,
                max_packet_life_time: 0,
                max_retransmits: 3,
            },
            protocol: Some("chat".to_owned()),
            negotiated: false,
            manual_stream: true,
            stream: 7,
        };
        let dc = engine.create_data_channel(pc, "label", Some(&init));
        assert!(dc > pc);

        assert_eq!(read(|buf| engine.get_data_channel_label(dc, buf)).as_deref(), Some("label"));
        assert_eq!(read(|buf| engine.get_data_channel_protocol(dc, buf)).as_deref(), Some("chat"));
        assert_eq!(engine.get_data_channel_stream(dc), 7);

        let mut reliability = RawReliability::default();
        assert_eq!(engine.get_data_channel_reliability(dc, &mut reliability), 0);
        assert_eq!(reliability, init.reliability);

        let mut tiny = [0u8; 3];
        assert_eq!(engine.get_data_channel_label(dc, &mut tiny), RTC_ERR_TOO_SMALL);
    }

    #[test]
    fn test_signaling_transitions() {
        let engine = engine();
        let pc = engine.create_peer_connection(&manual());
        let mut buffer = [0u8; 64];

        assert_eq!(engine.get_local_description(pc, &mut buffer), RTC_ERR_NOT_AVAIL);
        assert_eq!(engine.set_local_description(pc, Some("answer")), RTC_ERR_FAILURE);
        assert_eq!(engine.set_local_description(pc, Some("bogus")), RTC_ERR_INVALID);
        assert_eq!(engine.set_local_description(pc, None), 0);
        assert_eq!(
            read(|buf| engine.get_local_description_type(pc, buf)).as_deref(),
            Some("offer")
        );
        assert_eq!(engine.set_local_description(pc, Some("rollback")), 0);
        assert_eq!(engine.get_local_description(pc, &mut buffer), RTC_ERR_NOT_AVAIL);
    }

    #[test]
    fn test_remote_description_requires_ufrag() {
        let engine = engine();
        let pc = engine.create_peer_connection(&manual());
        assert_eq!(
            engine.set_remote_description(pc, "v=0\r\ns=-\r\n", Some("offer")),
            RTC_ERR_INVALID
        );
        assert_eq!(
            engine.add_remote_candidate(pc, &sdp::host_candidate("127.0.0.1", 1), None),
            RTC_ERR_FAILURE
        );
    }

    #[test]
    fn test_connect_pairs_channels() {
        let engine = engine();
        let a = engine.create_peer_connection(&manual());
        let b = engine.create_peer_connection(&manual());
        let dc = engine.create_data_channel(a, "pair", None);
        assert!(!engine.is_open(dc));

        connect(&engine, a, b);

        assert!(engine.is_open(dc));
        // a, b, dc and the counterpart created on b
        assert_eq!(engine.live_resources(), 4);
        let address = read(|buf| engine.get_remote_address(a, buf));
        assert_eq!(address.as_deref(), Some("127.0.0.1:50002"));
    }

    #[test]
    fn test_messages_queue_for_pull() {
        let engine = engine();
        let a = engine.create_peer_connection(&manual());
        let b = engine.create_peer_connection(&manual());
        let dc = engine.create_data_channel(a, "pull", None);
        connect(&engine, a, b);
        let counterpart = dc + 1;

        assert_eq!(engine.send_message(dc, b"hello", 5), 0);
        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.get_available_amount(counterpart) < 5 {
            assert!(Instant::now() < deadline, "message never arrived");
            thread::sleep(Duration::from_millis(5));
        }

        let mut small = [0u8; 2];
        let mut size = 2;
        assert_eq!(
            engine.receive_message(counterpart, &mut small, &mut size),
            RTC_ERR_TOO_SMALL
        );
        assert_eq!(size, 5);

        let mut buffer = [0u8; 16];
        let mut size = 16;
        assert_eq!(engine.receive_message(counterpart, &mut buffer, &mut size), 0);
        assert_eq!(&buffer[..size as usize], b"hello");
        assert_eq!(
            engine.receive_message(counterpart, &mut buffer, &mut size),
            RTC_ERR_NOT_AVAIL
        );
    }

    #[test]
    fn test_send_requires_open_channel() {
        let engine = engine();
        let pc = engine.create_peer_connection(&manual());
        let dc = engine.create_data_channel(pc, "closed", None);
        assert_eq!(engine.send_message(dc, b"x", 1), RTC_ERR_FAILURE);
        assert_eq!(engine.set_buffered_amount_low_threshold(dc, -1), RTC_ERR_INVALID);
    }

    #[test]
    fn test_delete_closes_counterpart() {
        let engine = engine();
        let a = engine.create_peer_connection(&manual());
        let b = engine.create_peer_connection(&manual());
        let dc = engine.create_data_channel(a, "bye", None);
        connect(&engine, a, b);
        let counterpart = dc + 1;
        assert!(engine.is_open(counterpart));

        assert_eq!(engine.delete_data_channel(dc), 0);
        assert!(!engine.is_open(counterpart));
        assert!(engine.is_closed(counterpart));
        assert_eq!(engine.delete_data_channel(dc), RTC_ERR_INVALID);
    }
}
