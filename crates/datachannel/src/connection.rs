//! Peer connection proxy
//!
//! A connection owns its data channels: channels created by the caller and
//! channels announced by the remote peer join the same set, and disposing
//! the connection disposes every member before the connection itself is
//! deleted from the engine. Connection, gathering and signaling states are
//! projections of engine callbacks.

use crate::callbacks;
use crate::channel::{ChannelShared, DataChannel};
use crate::config::{DataChannelInit, PeerConfiguration};
use crate::error::{check, RtcError, RtcResult};
use crate::events::{self, remove_from, Handler, Subscribers, SubscriptionId};
use crate::handle::{NativeHandle, ResourceKind};
use crate::marshal::{decode, read_string, STRING_BUFFER_SIZE};
use crate::registry::{self, Proxy};
use crate::release_queue;
use crate::sdp::{CandidatePair, IceCandidate, SdpType, SessionDescription};
use datachannel_engine::{Engine, GatheringState, RtcState, SignalingState};
use std::ffi::c_int;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

#[derive(Default)]
struct ConnectionSubscribers {
    local_description: Subscribers<SessionDescription>,
    local_candidate: Subscribers<IceCandidate>,
    state_change: Subscribers<RtcState>,
    gathering_state_change: Subscribers<GatheringState>,
    signaling_state_change: Subscribers<SignalingState>,
    data_channel: Subscribers<DataChannel>,
}

pub(crate) struct ConnectionState {
    channels: Vec<Arc<ChannelShared>>,
    state: RtcState,
    gathering: GatheringState,
    signaling: SignalingState,
    subscribers: ConnectionSubscribers,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            state: RtcState::New,
            gathering: GatheringState::New,
            signaling: SignalingState::Stable,
            subscribers: ConnectionSubscribers::default(),
        }
    }
}

pub(crate) struct ConnectionShared {
    pub(crate) handle: NativeHandle<ConnectionState>,
}

impl ConnectionShared {
    fn engine(&self) -> &dyn Engine {
        self.handle.engine().as_ref()
    }

    pub(crate) fn dispose(&self) {
        let pc = self.handle.id();
        let Some((children, subscribers)) = self.handle.begin_dispose(|state| {
            state.state = RtcState::Closed;
            state.gathering = GatheringState::New;
            state.signaling = SignalingState::Stable;
            (
                std::mem::take(&mut state.channels),
                std::mem::take(&mut state.subscribers),
            )
        }) else {
            return;
        };
        drop(subscribers);

        debug!(pc, channels = children.len(), "Disposing peer connection");
        for child in &children {
            child.dispose();
        }
        drop(children);

        self.handle.release();
        info!(pc, "Peer connection disposed");
    }

    /// Removes a disposed channel from the set
    pub(crate) fn forget_channel(&self, dc: c_int) {
        let removed = {
            let mut guard = self.handle.lock();
            let channels = &mut guard.state.channels;
            channels
                .iter()
                .position(|channel| channel.handle.id() == dc)
                .map(|index| channels.remove(index))
        };
        drop(removed);
    }

    /// Adds a freshly adopted channel, or disposes it if the connection is
    /// already gone.
    fn insert_channel(&self, channel: &Arc<ChannelShared>) -> RtcResult<()> {
        {
            let mut guard = self.handle.lock();
            if !guard.disposed {
                guard.state.channels.push(Arc::clone(channel));
                return Ok(());
            }
        }
        channel.dispose();
        Err(RtcError::Disposed)
    }

    fn deliver<A: ?Sized>(
        &self,
        pick: impl FnOnce(&mut ConnectionState) -> &Subscribers<A>,
        arg: &A,
    ) -> bool {
        self.handle.dispatch(
            |state| pick(state).snapshot(),
            |handlers| events::emit(handlers, arg),
        )
    }

    pub(crate) fn handle_local_description(&self, description: SessionDescription) {
        self.deliver(|s| &s.subscribers.local_description, &description);
    }

    pub(crate) fn handle_local_candidate(&self, candidate: IceCandidate) {
        self.deliver(|s| &s.subscribers.local_candidate, &candidate);
    }

    pub(crate) fn handle_state_change(&self, state: RtcState) {
        let pc = self.handle.id();
        self.deliver(
            |s| {
                s.state = state;
                info!(pc, state = ?state, "Peer connection state changed");
                &s.subscribers.state_change
            },
            &state,
        );
    }

    pub(crate) fn handle_gathering_state_change(&self, state: GatheringState) {
        let pc = self.handle.id();
        self.deliver(
            |s| {
                s.gathering = state;
                debug!(pc, state = ?state, "Gathering state changed");
                &s.subscribers.gathering_state_change
            },
            &state,
        );
    }

    pub(crate) fn handle_signaling_state_change(&self, state: SignalingState) {
        let pc = self.handle.id();
        self.deliver(
            |s| {
                s.signaling = state;
                debug!(pc, state = ?state, "Signaling state changed");
                &s.subscribers.signaling_state_change
            },
            &state,
        );
    }

    /// The remote peer opened a channel. The proxy joins the set before any
    /// handler sees it.
    pub(crate) fn handle_data_channel(self: &Arc<Self>, dc: c_int) {
        let pc = self.handle.id();
        if self.handle.is_disposed() {
            debug!(pc, dc, "Deleting data channel announced after disposal");
            let engine = Arc::clone(self.handle.engine());
            release_queue::defer(move || {
                let _ = engine.delete_data_channel(dc);
            });
            return;
        }

        let channel =
            match ChannelShared::adopt(Arc::clone(self.handle.engine()), dc, Arc::downgrade(self))
            {
                Ok(channel) => channel,
                Err(e) => {
                    warn!(pc, dc, error = %e, "Failed to adopt incoming data channel");
                    return;
                }
            };

        let delivered = self.handle.dispatch(
            |state| {
                state.channels.push(Arc::clone(&channel));
                debug!(pc, dc, "Incoming data channel");
                state.subscribers.data_channel.snapshot()
            },
            |handlers| {
                events::emit(
                    handlers,
                    &DataChannel {
                        shared: Arc::clone(&channel),
                    },
                )
            },
        );
        if !delivered {
            channel.dispose();
        }
    }
}

impl Drop for ConnectionShared {
    fn drop(&mut self) {
        if !self.handle.is_disposed() {
            debug!(pc = self.handle.id(), "Disposing dropped peer connection");
            self.dispose();
        }
    }
}

/// A WebRTC peer connection.
///
/// Cloning yields another handle to the same connection; the connection is
/// disposed when [`PeerConnection::dispose`] is called or the last handle is
/// dropped. Handlers that need the connection should capture a
/// [`WeakPeerConnection`] to avoid keeping it alive.
///
/// # Disposal from handlers
///
/// `dispose` waits for handlers of the same resource running on other
/// threads. A handler may dispose its own resource or its connection, but two
/// handlers running concurrently on different engine threads must not each
/// dispose the other's resource: they would wait on each other forever. The
/// loopback engine runs every callback on one thread and cannot hit this.
#[derive(Clone)]
pub struct PeerConnection {
    pub(crate) shared: Arc<ConnectionShared>,
}

impl PeerConnection {
    /// Creates a connection with the default configuration
    pub fn new(engine: Arc<dyn Engine>) -> RtcResult<Self> {
        Self::with_config(engine, &PeerConfiguration::default())
    }

    pub fn with_config(engine: Arc<dyn Engine>, config: &PeerConfiguration) -> RtcResult<Self> {
        config.validate()?;
        let pc = check(engine.create_peer_connection(&config.to_engine()))?;
        let token = match registry::reserve() {
            Ok(token) => token,
            Err(e) => {
                let _ = engine.delete_peer_connection(pc);
                return Err(e);
            }
        };

        let shared = Arc::new(ConnectionShared {
            handle: NativeHandle::new(
                pc,
                ResourceKind::Connection,
                token,
                Arc::clone(&engine),
                ConnectionState::default(),
            ),
        });
        // From here on dropping `shared` disposes it
        registry::bind(token, Proxy::Connection(Arc::downgrade(&shared)))?;
        engine.set_user_pointer(pc, token.as_ptr());
        callbacks::attach_connection_callbacks(engine.as_ref(), pc)?;

        info!(pc, engine = engine.name(), "Peer connection created");
        Ok(Self { shared })
    }

    /// Engine id of the connection
    pub fn id(&self) -> c_int {
        self.shared.handle.id()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.handle.is_disposed()
    }

    /// Closes every channel, then the connection. Idempotent.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    pub fn downgrade(&self) -> WeakPeerConnection {
        WeakPeerConnection {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Connection state; `Closed` once disposed
    pub fn state(&self) -> RtcState {
        self.shared.handle.lock().state.state
    }

    /// ICE gathering state; `New` once disposed
    pub fn gathering_state(&self) -> GatheringState {
        self.shared.handle.lock().state.gathering
    }

    /// Signaling state; `Stable` once disposed
    pub fn signaling_state(&self) -> SignalingState {
        self.shared.handle.lock().state.signaling
    }

    /// The channels currently owned by this connection
    pub fn channels(&self) -> Vec<DataChannel> {
        self.shared
            .handle
            .lock()
            .state
            .channels
            .iter()
            .map(|shared| DataChannel {
                shared: Arc::clone(shared),
            })
            .collect()
    }

    pub fn create_data_channel(&self, label: &str) -> RtcResult<DataChannel> {
        self.create_data_channel_with(label, &DataChannelInit::default())
    }

    pub fn create_data_channel_with(
        &self,
        label: &str,
        init: &DataChannelInit,
    ) -> RtcResult<DataChannel> {
        init.validate()?;
        let pc = self.id();
        if self.is_disposed() {
            return Err(RtcError::Disposed);
        }

        let engine = Arc::clone(self.shared.handle.engine());
        let dc = match check(engine.create_data_channel(pc, label, Some(&init.to_engine()))) {
            Ok(dc) => dc,
            Err(_) if self.is_disposed() => return Err(RtcError::Disposed),
            Err(e) => return Err(e),
        };
        let channel = ChannelShared::adopt(engine, dc, Arc::downgrade(&self.shared))?;
        self.shared.insert_channel(&channel)?;

        debug!(pc, dc, label, "Data channel created");
        Ok(DataChannel { shared: channel })
    }

    /// Sets the local description, letting the engine infer the type when
    /// `None`
    pub fn set_local_description(&self, sdp_type: Option<SdpType>) -> RtcResult<()> {
        let _state = self.shared.handle.lock_live()?;
        check(
            self.shared
                .engine()
                .set_local_description(self.id(), sdp_type.as_ref().map(SdpType::as_str)),
        )?;
        Ok(())
    }

    pub fn create_offer(&self) -> RtcResult<()> {
        self.set_local_description(Some(SdpType::Offer))
    }

    pub fn create_answer(&self) -> RtcResult<()> {
        self.set_local_description(Some(SdpType::Answer))
    }

    pub fn set_remote_description(&self, description: &SessionDescription) -> RtcResult<()> {
        let _state = self.shared.handle.lock_live()?;
        check(self.shared.engine().set_remote_description(
            self.id(),
            &description.sdp,
            Some(description.sdp_type.as_str()),
        ))?;
        Ok(())
    }

    pub fn add_remote_candidate(&self, candidate: &IceCandidate) -> RtcResult<()> {
        let _state = self.shared.handle.lock_live()?;
        check(self.shared.engine().add_remote_candidate(
            self.id(),
            &candidate.candidate,
            candidate.mid.as_deref(),
        ))?;
        Ok(())
    }

    fn description(
        &self,
        sdp: impl FnOnce(&dyn Engine, &mut [u8]) -> c_int,
        sdp_type: impl FnOnce(&dyn Engine, &mut [u8]) -> c_int,
    ) -> RtcResult<Option<SessionDescription>> {
        let _state = self.shared.handle.lock_live()?;
        let engine = self.shared.engine();
        let text = match read_string(STRING_BUFFER_SIZE, |buf| sdp(engine, buf)) {
            Ok(text) => text,
            Err(RtcError::NotAvailable) => return Ok(None),
            Err(e) => return Err(e),
        };
        let kind = read_string(STRING_BUFFER_SIZE, |buf| sdp_type(engine, buf))?;
        Ok(Some(SessionDescription::new(kind.parse()?, text)))
    }

    /// `None` until a local description is set
    pub fn local_description(&self) -> RtcResult<Option<SessionDescription>> {
        let pc = self.id();
        self.description(
            |engine, buf| engine.get_local_description(pc, buf),
            |engine, buf| engine.get_local_description_type(pc, buf),
        )
    }

    /// `None` until a remote description is set
    pub fn remote_description(&self) -> RtcResult<Option<SessionDescription>> {
        let pc = self.id();
        self.description(
            |engine, buf| engine.get_remote_description(pc, buf),
            |engine, buf| engine.get_remote_description_type(pc, buf),
        )
    }

    fn address(
        &self,
        query: impl FnOnce(&dyn Engine, &mut [u8]) -> c_int,
    ) -> RtcResult<Option<SocketAddr>> {
        let _state = self.shared.handle.lock_live()?;
        let engine = self.shared.engine();
        match read_string(STRING_BUFFER_SIZE, |buf| query(engine, buf)) {
            Ok(address) => parse_address(&address).map(Some),
            Err(RtcError::NotAvailable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Local address of the selected candidate pair, once connected
    pub fn local_address(&self) -> RtcResult<Option<SocketAddr>> {
        let pc = self.id();
        self.address(|engine, buf| engine.get_local_address(pc, buf))
    }

    /// Remote address of the selected candidate pair, once connected
    pub fn remote_address(&self) -> RtcResult<Option<SocketAddr>> {
        let pc = self.id();
        self.address(|engine, buf| engine.get_remote_address(pc, buf))
    }

    pub fn selected_candidate_pair(&self) -> RtcResult<Option<CandidatePair>> {
        let _state = self.shared.handle.lock_live()?;
        let mut local = vec![0u8; STRING_BUFFER_SIZE];
        let mut remote = vec![0u8; STRING_BUFFER_SIZE];
        let result =
            self.shared
                .engine()
                .get_selected_candidate_pair(self.id(), &mut local, &mut remote);
        match check(result) {
            Ok(_) => Ok(Some(CandidatePair {
                local: decode(&local)?,
                remote: decode(&remote)?,
            })),
            Err(RtcError::NotAvailable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn subscribe<A: ?Sized>(
        &self,
        handler: Handler<A>,
        pick: impl FnOnce(&mut ConnectionSubscribers) -> &mut Subscribers<A>,
    ) -> RtcResult<SubscriptionId> {
        let mut state = self.shared.handle.lock_live()?;
        Ok(pick(&mut state.subscribers).add(handler))
    }

    /// Fires with every local description the engine produces; forward it
    /// to the remote peer.
    pub fn on_local_description(
        &self,
        handler: impl Fn(&SessionDescription) + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<SessionDescription> = Arc::new(handler);
        self.subscribe(handler, |s| &mut s.local_description)
    }

    /// Fires with every gathered local candidate; forward it to the remote
    /// peer.
    pub fn on_local_candidate(
        &self,
        handler: impl Fn(&IceCandidate) + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<IceCandidate> = Arc::new(handler);
        self.subscribe(handler, |s| &mut s.local_candidate)
    }

    pub fn on_state_change(
        &self,
        handler: impl Fn(RtcState) + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<RtcState> = Arc::new(move |state: &RtcState| handler(*state));
        self.subscribe(handler, |s| &mut s.state_change)
    }

    pub fn on_gathering_state_change(
        &self,
        handler: impl Fn(GatheringState) + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<GatheringState> =
            Arc::new(move |state: &GatheringState| handler(*state));
        self.subscribe(handler, |s| &mut s.gathering_state_change)
    }

    pub fn on_signaling_state_change(
        &self,
        handler: impl Fn(SignalingState) + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<SignalingState> =
            Arc::new(move |state: &SignalingState| handler(*state));
        self.subscribe(handler, |s| &mut s.signaling_state_change)
    }

    /// Fires when the remote peer opens a channel. The channel is already
    /// in [`PeerConnection::channels`] when the handler runs.
    pub fn on_data_channel(
        &self,
        handler: impl Fn(&DataChannel) + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<DataChannel> = Arc::new(handler);
        self.subscribe(handler, |s| &mut s.data_channel)
    }

    /// Removes a subscription made on this connection; `false` if unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut guard = self.shared.handle.lock();
            if guard.disposed {
                return false;
            }
            let s = &mut guard.state.subscribers;
            remove_from!(id;
                s.local_description,
                s.local_candidate,
                s.state_change,
                s.gathering_state_change,
                s.signaling_state_change,
                s.data_channel,
            )
        };
        removed.is_some()
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.shared.handle.lock();
        f.debug_struct("PeerConnection")
            .field("id", &self.shared.handle.id())
            .field("state", &guard.state.state)
            .field("channels", &guard.state.channels.len())
            .field("disposed", &guard.disposed)
            .finish()
    }
}

/// Non-owning reference to a [`PeerConnection`]
#[derive(Clone)]
pub struct WeakPeerConnection {
    shared: Weak<ConnectionShared>,
}

impl WeakPeerConnection {
    pub fn upgrade(&self) -> Option<PeerConnection> {
        self.shared.upgrade().map(|shared| PeerConnection { shared })
    }
}

/// Parses `ip:port`, also accepting bare (unbracketed) IPv6 addresses
pub(crate) fn parse_address(address: &str) -> RtcResult<SocketAddr> {
    if let Ok(address) = address.parse::<SocketAddr>() {
        return Ok(address);
    }
    let (ip, port) = address
        .rsplit_once(':')
        .ok_or_else(|| RtcError::parse(format!("invalid address: {address}")))?;
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| RtcError::parse(format!("invalid address: {address}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| RtcError::parse(format!("invalid port in address: {address}")))?;
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use datachannel_engine::LoopbackEngine;

    fn manual() -> PeerConfiguration {
        PeerConfiguration {
            disable_auto_negotiation: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(
            parse_address("127.0.0.1:5000").unwrap(),
            "127.0.0.1:5000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_address("[::1]:9").unwrap(),
            "[::1]:9".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_address("::1:9").unwrap().port(), 9);
        assert!(parse_address("nonsense").is_err());
        assert!(parse_address("127.0.0.1:http").is_err());
    }

    #[test]
    fn test_invalid_config_is_rejected_before_engine() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let config = PeerConfiguration {
            ice_servers: vec!["bogus".to_string()],
            ..Default::default()
        };
        let result = PeerConnection::with_config(engine.clone(), &config);
        assert!(matches!(result, Err(RtcError::Config(_))));
        assert_eq!(engine.live_resources(), 0);
    }

    #[test]
    fn test_initial_projections() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let pc = PeerConnection::with_config(engine, &manual()).unwrap();
        assert_eq!(pc.state(), RtcState::New);
        assert_eq!(pc.gathering_state(), GatheringState::New);
        assert_eq!(pc.signaling_state(), SignalingState::Stable);
        assert_eq!(pc.local_description().unwrap(), None);
        assert_eq!(pc.local_address().unwrap(), None);
        assert_eq!(pc.selected_candidate_pair().unwrap(), None);
    }

    #[test]
    fn test_local_description_round_trip() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let pc = PeerConnection::with_config(engine, &manual()).unwrap();
        pc.create_offer().unwrap();
        let description = pc.local_description().unwrap().unwrap();
        assert_eq!(description.sdp_type, SdpType::Offer);
        assert!(description.sdp.contains("a=ice-ufrag:"));
        assert!(matches!(pc.create_answer(), Err(RtcError::Failure)));
    }

    #[test]
    fn test_dispose_forces_terminal_projections() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let pc = PeerConnection::with_config(engine.clone(), &manual()).unwrap();
        let id = pc.id();
        pc.create_offer().unwrap();

        pc.dispose();
        assert!(pc.is_disposed());
        assert_eq!(pc.state(), RtcState::Closed);
        assert_eq!(pc.gathering_state(), GatheringState::New);
        assert_eq!(pc.signaling_state(), SignalingState::Stable);
        assert!(!engine.contains(id));
        assert!(matches!(pc.create_offer(), Err(RtcError::Disposed)));
        assert!(matches!(
            pc.create_data_channel("late"),
            Err(RtcError::Disposed)
        ));
        assert!(matches!(
            pc.on_state_change(|_| {}),
            Err(RtcError::Disposed)
        ));
    }

    #[test]
    fn test_drop_disposes() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let pc = PeerConnection::with_config(engine.clone(), &manual()).unwrap();
        let dc = pc.create_data_channel("child").unwrap();
        let (pc_id, dc_id) = (pc.id(), dc.id());
        drop(dc);
        assert!(engine.contains(dc_id));

        drop(pc);
        assert!(!engine.contains(pc_id));
        assert!(!engine.contains(dc_id));
    }

    #[test]
    fn test_weak_handle() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let pc = PeerConnection::with_config(engine, &manual()).unwrap();
        let weak = pc.downgrade();
        assert!(weak.upgrade().is_some());
        drop(pc);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_unsubscribe() {
        let engine = Arc::new(LoopbackEngine::new().unwrap());
        let pc = PeerConnection::with_config(engine, &manual()).unwrap();
        let id = pc.on_signaling_state_change(|_| {}).unwrap();
        assert!(pc.unsubscribe(id));
        assert!(!pc.unsubscribe(id));
    }
}
