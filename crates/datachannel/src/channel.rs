//! Data channel proxy
//!
//! Besides the usual queries and commands, a channel arbitrates how incoming
//! messages reach the caller. Subscribing a message handler switches the
//! channel to push delivery (the engine message callback is attached on the
//! first subscriber and detached after the last one leaves); polling with
//! [`DataChannel::try_receive`] is pull delivery. The two never overlap.

use crate::callbacks;
use crate::config::Reliability;
use crate::connection::{ConnectionShared, PeerConnection};
use crate::error::{check, RtcError, RtcResult};
use crate::events::{self, remove_from, Handler, Subscribers, SubscriptionId};
use crate::handle::{NativeHandle, ResourceKind};
use crate::marshal::{read_string, LABEL_BUFFER_SIZE, STRING_BUFFER_SIZE};
use crate::registry::{self, Proxy};
use datachannel_engine::ffi::{RTC_ERR_NOT_AVAIL, RTC_ERR_TOO_SMALL};
use datachannel_engine::{Engine, RawReliability};
use std::ffi::c_int;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, trace, warn};

/// How incoming messages currently reach the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Messages queue in the engine
    Idle,
    /// Messages go to subscribed handlers
    Push,
    /// A [`DataChannel::try_receive`] is in progress
    Pull,
}

#[derive(Debug, Clone, Copy, Default)]
enum Delivery {
    #[default]
    Idle,
    Push,
    /// Number of receives in flight
    Pull(usize),
}

#[derive(Default)]
struct ChannelSubscribers {
    open: Subscribers<()>,
    closed: Subscribers<()>,
    error: Subscribers<str>,
    message: Subscribers<[u8]>,
    buffered_amount_low: Subscribers<()>,
    available: Subscribers<()>,
}

#[derive(Default)]
pub(crate) struct ChannelState {
    delivery: Delivery,
    subscribers: ChannelSubscribers,
}

enum Received {
    Message(usize),
    Empty,
    TooSmall(usize),
}

pub(crate) struct ChannelShared {
    pub(crate) handle: NativeHandle<ChannelState>,
    connection: Weak<ConnectionShared>,
    label: OnceLock<String>,
    protocol: OnceLock<String>,
    reliability: OnceLock<Reliability>,
    stream_id: OnceLock<u16>,
}

impl ChannelShared {
    /// Wraps an engine channel id: registers a token, installs it as user
    /// pointer and attaches the structural callbacks.
    ///
    /// On error the id has already been deleted.
    pub(crate) fn adopt(
        engine: Arc<dyn Engine>,
        dc: c_int,
        connection: Weak<ConnectionShared>,
    ) -> RtcResult<Arc<Self>> {
        let token = match registry::reserve() {
            Ok(token) => token,
            Err(e) => {
                let _ = engine.delete_data_channel(dc);
                return Err(e);
            }
        };
        let shared = Arc::new(ChannelShared {
            handle: NativeHandle::new(
                dc,
                ResourceKind::Channel,
                token,
                Arc::clone(&engine),
                ChannelState::default(),
            ),
            connection,
            label: OnceLock::new(),
            protocol: OnceLock::new(),
            reliability: OnceLock::new(),
            stream_id: OnceLock::new(),
        });
        // From here on dropping `shared` disposes it
        registry::bind(token, Proxy::Channel(Arc::downgrade(&shared)))?;
        engine.set_user_pointer(dc, token.as_ptr());
        callbacks::attach_channel_callbacks(engine.as_ref(), dc)?;
        debug!(dc, "Data channel adopted");
        Ok(shared)
    }

    fn engine(&self) -> &dyn Engine {
        self.handle.engine().as_ref()
    }

    pub(crate) fn dispose(&self) {
        let dc = self.handle.id();
        let engine = self.engine();
        let Some(subscribers) = self.handle.begin_dispose(|state| {
            if matches!(state.delivery, Delivery::Push) {
                if let Err(e) = check(engine.set_message_callback(dc, None)) {
                    warn!(dc, error = %e, "Failed to detach message callback");
                }
            }
            state.delivery = Delivery::Idle;
            std::mem::take(&mut state.subscribers)
        }) else {
            return;
        };
        drop(subscribers);

        if let Some(connection) = self.connection.upgrade() {
            connection.forget_channel(dc);
        }
        self.handle.release();
        debug!(dc, "Data channel disposed");
    }

    fn deliver<A: ?Sized>(
        &self,
        pick: impl FnOnce(&ChannelSubscribers) -> &Subscribers<A>,
        arg: &A,
    ) -> bool {
        let delivered = self.handle.dispatch(
            |state| pick(&state.subscribers).snapshot(),
            |handlers| events::emit(handlers, arg),
        );
        if !delivered {
            trace!(dc = self.handle.id(), "Dropping event for disposed data channel");
        }
        delivered
    }

    pub(crate) fn handle_open(&self) {
        if self.deliver(|s| &s.open, &()) {
            debug!(dc = self.handle.id(), "Data channel open");
        }
    }

    pub(crate) fn handle_closed(&self) {
        if self.deliver(|s| &s.closed, &()) {
            debug!(dc = self.handle.id(), "Data channel closed");
        }
    }

    pub(crate) fn handle_error(&self, error: &str) {
        if self.deliver(|s| &s.error, error) {
            warn!(dc = self.handle.id(), error, "Data channel error");
        }
    }

    pub(crate) fn handle_message(&self, message: &[u8]) {
        self.deliver(|s| &s.message, message);
    }

    pub(crate) fn handle_buffered_amount_low(&self) {
        self.deliver(|s| &s.buffered_amount_low, &());
    }

    pub(crate) fn handle_available(&self) {
        self.deliver(|s| &s.available, &());
    }

    fn subscribe<A: ?Sized>(
        &self,
        handler: Handler<A>,
        pick: impl FnOnce(&mut ChannelSubscribers) -> &mut Subscribers<A>,
    ) -> RtcResult<SubscriptionId> {
        let mut state = self.handle.lock_live()?;
        Ok(pick(&mut state.subscribers).add(handler))
    }

    fn subscribe_message(&self, handler: Handler<[u8]>) -> RtcResult<SubscriptionId> {
        let dc = self.handle.id();
        let mut state = self.handle.lock_live()?;
        match state.delivery {
            Delivery::Pull(_) => {
                return Err(RtcError::ModeConflict(
                    "cannot subscribe to messages while a receive is in progress",
                ))
            }
            Delivery::Idle => {
                callbacks::set_message_callback(self.engine(), dc, true)?;
                state.delivery = Delivery::Push;
                debug!(dc, "Message delivery switched to push");
            }
            Delivery::Push => {}
        }
        Ok(state.subscribers.message.add(handler))
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let dc = self.handle.id();
        let removed = {
            let mut guard = self.handle.lock();
            if guard.disposed {
                return false;
            }
            let state = &mut guard.state;
            if let Some(handler) = state.subscribers.message.remove(id) {
                if state.subscribers.message.is_empty() && matches!(state.delivery, Delivery::Push)
                {
                    match callbacks::set_message_callback(self.engine(), dc, false) {
                        Ok(()) => {
                            state.delivery = Delivery::Idle;
                            debug!(dc, "Message delivery back to idle");
                        }
                        Err(e) => warn!(dc, error = %e, "Failed to detach message callback"),
                    }
                }
                Some(Box::new(handler) as Box<dyn std::any::Any + Send>)
            } else {
                let s = &mut state.subscribers;
                remove_from!(id; s.open, s.closed, s.error, s.buffered_amount_low, s.available)
            }
        };
        removed.is_some()
    }

    /// Runs one pull-mode receive with the lock released during the engine
    /// call
    fn receive_into(&self, buffer: &mut [u8]) -> RtcResult<Received> {
        let dc = self.handle.id();
        {
            let mut state = self.handle.lock_live()?;
            state.delivery = match state.delivery {
                Delivery::Push => {
                    return Err(RtcError::ModeConflict(
                        "cannot receive while a message handler is subscribed",
                    ))
                }
                Delivery::Idle => Delivery::Pull(1),
                Delivery::Pull(n) => Delivery::Pull(n + 1),
            };
        }
        let _pull = PullGuard(self);

        let mut size = c_int::try_from(buffer.len()).unwrap_or(c_int::MAX);
        let result = self.engine().receive_message(dc, buffer, &mut size);
        match result {
            RTC_ERR_NOT_AVAIL => Ok(Received::Empty),
            RTC_ERR_TOO_SMALL => Ok(Received::TooSmall(size.max(0) as usize)),
            code if code < 0 => {
                if self.handle.is_disposed() {
                    Err(RtcError::Disposed)
                } else {
                    Err(RtcError::from_code(code))
                }
            }
            _ => Ok(Received::Message(size.max(0) as usize)),
        }
    }
}

impl Drop for ChannelShared {
    fn drop(&mut self) {
        if !self.handle.is_disposed() {
            debug!(dc = self.handle.id(), "Disposing dropped data channel");
            self.dispose();
        }
    }
}

/// Ends one pull receive
struct PullGuard<'a>(&'a ChannelShared);

impl Drop for PullGuard<'_> {
    fn drop(&mut self) {
        let mut guard = self.0.handle.lock();
        guard.state.delivery = match guard.state.delivery {
            Delivery::Pull(n) if n > 1 => Delivery::Pull(n - 1),
            Delivery::Pull(_) => Delivery::Idle,
            other => other,
        };
    }
}

/// A data channel of a [`PeerConnection`].
///
/// Cloning yields another handle to the same channel. The channel stays
/// alive while its connection does; [`DataChannel::dispose`] closes it
/// early.
///
/// # Disposal from handlers
///
/// `dispose` waits for handlers of the same resource running on other
/// threads. A handler may dispose its own resource or its connection, but two
/// handlers running concurrently on different engine threads must not each
/// dispose the other's resource: they would wait on each other forever. The
/// loopback engine runs every callback on one thread and cannot hit this.
#[derive(Clone)]
pub struct DataChannel {
    pub(crate) shared: Arc<ChannelShared>,
}

impl DataChannel {
    /// Engine id of the channel
    pub fn id(&self) -> c_int {
        self.shared.handle.id()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.handle.is_disposed()
    }

    /// Closes the channel and releases its engine resource. Idempotent.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    /// The owning connection, unless it was already dropped
    pub fn connection(&self) -> Option<PeerConnection> {
        self.shared
            .connection
            .upgrade()
            .map(|shared| PeerConnection { shared })
    }

    pub fn label(&self) -> RtcResult<String> {
        if let Some(label) = self.shared.label.get() {
            return Ok(label.clone());
        }
        let _state = self.shared.handle.lock_live()?;
        let label = read_string(LABEL_BUFFER_SIZE, |buf| {
            self.shared.engine().get_data_channel_label(self.id(), buf)
        })?;
        Ok(self.shared.label.get_or_init(|| label).clone())
    }

    pub fn protocol(&self) -> RtcResult<String> {
        if let Some(protocol) = self.shared.protocol.get() {
            return Ok(protocol.clone());
        }
        let _state = self.shared.handle.lock_live()?;
        let protocol = read_string(LABEL_BUFFER_SIZE, |buf| {
            self.shared.engine().get_data_channel_protocol(self.id(), buf)
        })?;
        Ok(self.shared.protocol.get_or_init(|| protocol).clone())
    }

    pub fn reliability(&self) -> RtcResult<Reliability> {
        if let Some(reliability) = self.shared.reliability.get() {
            return Ok(*reliability);
        }
        let _state = self.shared.handle.lock_live()?;
        let mut raw = RawReliability::default();
        check(
            self.shared
                .engine()
                .get_data_channel_reliability(self.id(), &mut raw),
        )?;
        Ok(*self.shared.reliability.get_or_init(|| raw.into()))
    }

    pub fn stream_id(&self) -> RtcResult<u16> {
        if let Some(stream) = self.shared.stream_id.get() {
            return Ok(*stream);
        }
        let _state = self.shared.handle.lock_live()?;
        let stream = check(self.shared.engine().get_data_channel_stream(self.id()))?;
        let stream = u16::try_from(stream)
            .map_err(|_| RtcError::parse(format!("stream id out of range: {stream}")))?;
        Ok(*self.shared.stream_id.get_or_init(|| stream))
    }

    /// `false` once disposed
    pub fn is_open(&self) -> bool {
        let guard = self.shared.handle.lock();
        !guard.disposed && self.shared.engine().is_open(self.id())
    }

    /// `true` once disposed
    pub fn is_closed(&self) -> bool {
        let guard = self.shared.handle.lock();
        guard.disposed || self.shared.engine().is_closed(self.id())
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        match self.shared.handle.lock().state.delivery {
            Delivery::Idle => DeliveryMode::Idle,
            Delivery::Push => DeliveryMode::Push,
            Delivery::Pull(_) => DeliveryMode::Pull,
        }
    }

    /// Sends a binary message
    pub fn send(&self, data: &[u8]) -> RtcResult<()> {
        let size = c_int::try_from(data.len()).map_err(|_| RtcError::InvalidArgument)?;
        let _state = self.shared.handle.lock_live()?;
        check(self.shared.engine().send_message(self.id(), data, size))?;
        Ok(())
    }

    /// Sends a text message
    pub fn send_text(&self, text: &str) -> RtcResult<()> {
        let _state = self.shared.handle.lock_live()?;
        check(self.shared.engine().send_message(self.id(), text.as_bytes(), -1))?;
        Ok(())
    }

    /// Bytes queued for sending
    pub fn buffered_amount(&self) -> RtcResult<usize> {
        let _state = self.shared.handle.lock_live()?;
        let amount = check(self.shared.engine().get_buffered_amount(self.id()))?;
        Ok(amount as usize)
    }

    /// Sets the level at or below which `buffered_amount_low` fires
    pub fn set_buffered_amount_low_threshold(&self, amount: usize) -> RtcResult<()> {
        let amount = c_int::try_from(amount).map_err(|_| RtcError::InvalidArgument)?;
        let _state = self.shared.handle.lock_live()?;
        check(
            self.shared
                .engine()
                .set_buffered_amount_low_threshold(self.id(), amount),
        )?;
        Ok(())
    }

    /// Bytes received and waiting for [`DataChannel::try_receive`]
    pub fn available_amount(&self) -> RtcResult<usize> {
        let _state = self.shared.handle.lock_live()?;
        let amount = check(self.shared.engine().get_available_amount(self.id()))?;
        Ok(amount as usize)
    }

    /// Pops one pending message into `buffer`.
    ///
    /// Returns the message length, or `None` when nothing is pending. Fails
    /// with [`RtcError::ModeConflict`] while a message handler is subscribed
    /// and with [`RtcError::BufferTooSmall`] when the message does not fit.
    pub fn try_receive(&self, buffer: &mut [u8]) -> RtcResult<Option<usize>> {
        match self.shared.receive_into(buffer)? {
            Received::Message(size) => Ok(Some(size)),
            Received::Empty => Ok(None),
            Received::TooSmall(_) => Err(RtcError::BufferTooSmall),
        }
    }

    /// Pops one pending message, sizing the buffer as needed
    pub fn try_receive_message(&self) -> RtcResult<Option<Vec<u8>>> {
        let mut buffer = vec![0u8; STRING_BUFFER_SIZE];
        loop {
            match self.shared.receive_into(&mut buffer)? {
                Received::Message(size) => {
                    buffer.truncate(size);
                    return Ok(Some(buffer));
                }
                Received::Empty => return Ok(None),
                Received::TooSmall(needed) => buffer.resize(needed.max(buffer.len() + 1), 0),
            }
        }
    }

    pub fn on_open(&self, handler: impl Fn() + Send + Sync + 'static) -> RtcResult<SubscriptionId> {
        let handler: Handler<()> = Arc::new(move |_: &()| handler());
        self.shared.subscribe(handler, |s| &mut s.open)
    }

    pub fn on_closed(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<()> = Arc::new(move |_: &()| handler());
        self.shared.subscribe(handler, |s| &mut s.closed)
    }

    pub fn on_error(
        &self,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<str> = Arc::new(handler);
        self.shared.subscribe(handler, |s| &mut s.error)
    }

    /// Subscribes to incoming messages, switching the channel to push
    /// delivery. Fails with [`RtcError::ModeConflict`] while a receive is in
    /// progress.
    pub fn on_message(
        &self,
        handler: impl Fn(&[u8]) + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<[u8]> = Arc::new(handler);
        self.shared.subscribe_message(handler)
    }

    pub fn on_buffered_amount_low(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<()> = Arc::new(move |_: &()| handler());
        self.shared
            .subscribe(handler, |s| &mut s.buffered_amount_low)
    }

    /// Fires when a message is queued for pull delivery
    pub fn on_available(
        &self,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> RtcResult<SubscriptionId> {
        let handler: Handler<()> = Arc::new(move |_: &()| handler());
        self.shared.subscribe(handler, |s| &mut s.available)
    }

    /// Removes a subscription made on this channel; `false` if unknown.
    ///
    /// Removing the last message handler returns the channel to idle
    /// delivery.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.unsubscribe(id)
    }
}

impl fmt::Debug for DataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataChannel")
            .field("id", &self.id())
            .field("label", &self.shared.label.get())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl PartialEq for DataChannel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for DataChannel {}
