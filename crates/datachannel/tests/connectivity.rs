//! End-to-end tests over the loopback engine

mod common;

use common::*;
use datachannel::{
    DataChannelInit, DeliveryMode, GatheringState, PeerConfiguration, Reliability, RtcError,
    RtcState, SdpType, SignalingState,
};

#[test]
fn test_message_exchange() {
    let pair = pair(&manual_config());
    let incoming = incoming_channels(&pair.answerer);
    let local = pair
        .offerer
        .create_data_channel_with(
            "test",
            &DataChannelInit {
                protocol: Some("chat".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let local_messages = messages(&local);
    pair.offerer.create_offer().unwrap();

    let remote = incoming.recv_timeout(TIMEOUT).expect("no incoming channel");
    let remote_messages = messages(&remote);
    wait_open(&local);
    wait_open(&remote);

    assert_eq!(remote.label().unwrap(), local.label().unwrap());
    assert_eq!(remote.protocol().unwrap(), "chat");
    assert_eq!(remote.connection().unwrap().id(), pair.answerer.id());

    let payload = vec![7u8; 1000];
    local.send(&payload).unwrap();
    let received = remote_messages.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(received, payload);

    remote.send_text("pong").unwrap();
    assert_eq!(local_messages.recv_timeout(TIMEOUT).unwrap(), b"pong");

    // exactly one delivery per message
    assert!(remote_messages.try_recv().is_err());
    assert!(local_messages.try_recv().is_err());
}

#[test]
fn test_remote_channel_mirrors_options() {
    let pair = pair(&manual_config());
    let incoming = incoming_channels(&pair.answerer);
    let init = DataChannelInit {
        reliability: Reliability {
            ordered: false,
            reliable: false,
            max_packet_life_time: 0,
            max_retransmits: 3,
        },
        protocol: Some("telemetry".to_string()),
        negotiated: false,
        stream_id: Some(42),
    };
    let local = pair.offerer.create_data_channel_with("lossy", &init).unwrap();
    pair.offerer.create_offer().unwrap();

    let remote = incoming.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(remote.label().unwrap(), "lossy");
    assert_eq!(remote.protocol().unwrap(), "telemetry");
    assert_eq!(remote.reliability().unwrap(), init.reliability);
    assert_eq!(remote.stream_id().unwrap(), 42);
    assert_eq!(local.reliability().unwrap(), remote.reliability().unwrap());
    assert!(pair.answerer.channels().contains(&remote));
}

#[test]
fn test_auto_negotiation() {
    let pair = pair(&PeerConfiguration::default());
    let incoming = incoming_channels(&pair.answerer);
    let local = pair.offerer.create_data_channel("auto").unwrap();

    let remote = incoming.recv_timeout(TIMEOUT).unwrap();
    wait_open(&local);
    wait_open(&remote);
    assert_eq!(remote.label().unwrap(), "auto");

    let description = pair.offerer.local_description().unwrap().unwrap();
    assert_eq!(description.sdp_type, SdpType::Offer);
    let answer = pair.offerer.remote_description().unwrap().unwrap();
    assert_eq!(answer.sdp_type, SdpType::Answer);
    assert_eq!(pair.offerer.signaling_state(), SignalingState::Stable);
    assert_eq!(pair.offerer.gathering_state(), GatheringState::Complete);
}

#[test]
fn test_negotiated_channels_pair_by_stream() {
    let pair = pair(&manual_config());
    let incoming = incoming_channels(&pair.answerer);
    let init = DataChannelInit {
        negotiated: true,
        stream_id: Some(5),
        ..Default::default()
    };
    let a = pair.offerer.create_data_channel_with("shared", &init).unwrap();
    let b = pair.answerer.create_data_channel_with("shared", &init).unwrap();
    let b_messages = messages(&b);
    pair.offerer.create_offer().unwrap();

    wait_open(&a);
    wait_open(&b);
    a.send_text("over stream five").unwrap();
    assert_eq!(b_messages.recv_timeout(TIMEOUT).unwrap(), b"over stream five");

    // negotiated channels are never announced
    assert!(incoming.try_recv().is_err());
    assert_eq!(pair.answerer.channels(), vec![b]);
}

#[test]
fn test_pull_delivery() {
    let pair = pair(&manual_config());
    let incoming = incoming_channels(&pair.answerer);
    let local = pair.offerer.create_data_channel("pull").unwrap();
    pair.offerer.create_offer().unwrap();
    let remote = incoming.recv_timeout(TIMEOUT).unwrap();
    wait_open(&local);

    local.send(b"first").unwrap();
    local.send(b"second").unwrap();

    assert_eq!(poll_message(&remote), b"first");
    let deadline = std::time::Instant::now() + TIMEOUT;
    while remote.available_amount().unwrap() < 6 {
        assert!(std::time::Instant::now() < deadline, "second message missing");
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert_eq!(remote.available_amount().unwrap(), 6);

    let mut small = [0u8; 2];
    assert!(matches!(
        remote.try_receive(&mut small),
        Err(RtcError::BufferTooSmall)
    ));
    let mut buffer = [0u8; 16];
    assert_eq!(remote.try_receive(&mut buffer).unwrap(), Some(6));
    assert_eq!(&buffer[..6], b"second");
    assert_eq!(remote.try_receive(&mut buffer).unwrap(), None);
    assert_eq!(remote.delivery_mode(), DeliveryMode::Idle);
}

#[test]
fn test_queued_messages_flush_to_new_subscriber() {
    let pair = pair(&manual_config());
    let incoming = incoming_channels(&pair.answerer);
    let local = pair.offerer.create_data_channel("late").unwrap();
    pair.offerer.create_offer().unwrap();
    let remote = incoming.recv_timeout(TIMEOUT).unwrap();
    wait_open(&local);

    let (available_tx, available_rx) = crossbeam::channel::unbounded();
    remote
        .on_available(move || {
            let _ = available_tx.send(());
        })
        .unwrap();
    local.send(b"queued").unwrap();
    available_rx.recv_timeout(TIMEOUT).unwrap();

    let received = messages(&remote);
    assert_eq!(received.recv_timeout(TIMEOUT).unwrap(), b"queued");
}

#[test]
fn test_connection_details() {
    let pair = pair(&manual_config());
    let offerer_states = states(&pair.offerer);
    let answerer_states = states(&pair.answerer);
    pair.offerer.create_data_channel("details").unwrap();
    pair.offerer.create_offer().unwrap();

    wait_state(&offerer_states, RtcState::Connected);
    wait_state(&answerer_states, RtcState::Connected);
    assert_eq!(pair.offerer.state(), RtcState::Connected);

    let local = pair.offerer.local_address().unwrap().unwrap();
    let remote = pair.answerer.remote_address().unwrap().unwrap();
    assert_eq!(local, remote);

    let selected = pair.offerer.selected_candidate_pair().unwrap().unwrap();
    assert!(selected.local.starts_with("a=candidate:"));
    assert!(selected.remote.starts_with("a=candidate:"));

    pair.answerer.dispose();
    wait_state(&offerer_states, RtcState::Disconnected);
}

#[test]
fn test_send_limits() {
    let config = PeerConfiguration {
        max_message_size: Some(64),
        ..manual_config()
    };
    let pair = pair(&config);
    let local = pair.offerer.create_data_channel("limits").unwrap();
    pair.offerer.create_offer().unwrap();
    wait_open(&local);

    assert!(matches!(
        local.send(&[0u8; 65]),
        Err(RtcError::InvalidArgument)
    ));
    local.send(&[0u8; 64]).unwrap();
}
