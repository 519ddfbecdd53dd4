//! Shared helpers for the loopback integration tests

#![allow(dead_code)]

use crossbeam::channel::{unbounded, Receiver};
use datachannel::{
    DataChannel, Engine, LoopbackEngine, PeerConfiguration, PeerConnection, RtcState, SdpType,
    WeakPeerConnection,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,datachannel=debug")
        .with_test_writer()
        .try_init();
}

pub fn engine() -> Arc<dyn Engine> {
    init_logging();
    datachannel::loopback().expect("loopback engine")
}

/// A loopback engine whose resource table the test can inspect
pub fn loopback_engine() -> Arc<LoopbackEngine> {
    init_logging();
    Arc::new(LoopbackEngine::new().expect("loopback engine"))
}

pub fn manual_config() -> PeerConfiguration {
    PeerConfiguration {
        disable_auto_negotiation: true,
        ..Default::default()
    }
}

/// Forwards descriptions and candidates of `from` to `to`, answering
/// offers on `to`'s behalf when `answer` is set.
pub fn signal(from: &PeerConnection, to: &PeerConnection, answer: bool) {
    let target = to.downgrade();
    from.on_local_description(move |description| {
        let Some(to) = target.upgrade() else {
            return;
        };
        to.set_remote_description(description)
            .expect("set remote description");
        if answer && description.sdp_type == SdpType::Offer {
            to.create_answer().expect("create answer");
        }
    })
    .expect("subscribe local description");

    let target: WeakPeerConnection = to.downgrade();
    from.on_local_candidate(move |candidate| {
        if let Some(to) = target.upgrade() {
            to.add_remote_candidate(candidate)
                .expect("add remote candidate");
        }
    })
    .expect("subscribe local candidate");
}

pub struct Pair {
    pub engine: Arc<dyn Engine>,
    pub offerer: PeerConnection,
    pub answerer: PeerConnection,
}

/// Two connections wired to each other, not yet negotiated
pub fn pair(config: &PeerConfiguration) -> Pair {
    pair_on(engine(), config)
}

pub fn pair_on(engine: Arc<dyn Engine>, config: &PeerConfiguration) -> Pair {
    let offerer = PeerConnection::with_config(engine.clone(), config).expect("offerer");
    let answerer = PeerConnection::with_config(engine.clone(), config).expect("answerer");
    let answer = config.disable_auto_negotiation;
    signal(&offerer, &answerer, answer);
    signal(&answerer, &offerer, answer);
    Pair {
        engine,
        offerer,
        answerer,
    }
}

/// Streams incoming channels of `pc`
pub fn incoming_channels(pc: &PeerConnection) -> Receiver<DataChannel> {
    let (tx, rx) = unbounded();
    pc.on_data_channel(move |dc| {
        let _ = tx.send(dc.clone());
    })
    .expect("subscribe data channel");
    rx
}

/// Streams state changes of `pc`
pub fn states(pc: &PeerConnection) -> Receiver<RtcState> {
    let (tx, rx) = unbounded();
    pc.on_state_change(move |state| {
        let _ = tx.send(state);
    })
    .expect("subscribe state change");
    rx
}

/// Streams messages received on `dc`, switching it to push delivery
pub fn messages(dc: &DataChannel) -> Receiver<Vec<u8>> {
    let (tx, rx) = unbounded();
    dc.on_message(move |message| {
        let _ = tx.send(message.to_vec());
    })
    .expect("subscribe message");
    rx
}

/// Blocks until `dc` is open
pub fn wait_open(dc: &DataChannel) {
    let (tx, rx) = unbounded();
    let id = dc
        .on_open(move || {
            let _ = tx.send(());
        })
        .expect("subscribe open");
    if !dc.is_open() {
        rx.recv_timeout(TIMEOUT).expect("channel did not open");
    }
    dc.unsubscribe(id);
}

/// Blocks until `state` shows up on `rx`
pub fn wait_state(rx: &Receiver<RtcState>, state: RtcState) {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let next = rx
            .recv_timeout(remaining)
            .unwrap_or_else(|_| panic!("no {state:?} state change"));
        if next == state {
            return;
        }
    }
}

/// Polls a pull-mode channel until a message arrives
pub fn poll_message(dc: &DataChannel) -> Vec<u8> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(message) = dc.try_receive_message().expect("try receive") {
            return message;
        }
        assert!(Instant::now() < deadline, "no message to receive");
        std::thread::sleep(Duration::from_millis(5));
    }
}
