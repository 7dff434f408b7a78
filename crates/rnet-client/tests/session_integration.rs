//! Integration tests for the session over an in-memory transport.
//!
//! # Setup
//!
//! Each test wires a [`Session`] to one end of a `tokio::io::duplex` pipe and
//! drives the other end as a fake RNET controller ("the peer").  The peer
//! decodes whatever the session writes and answers with hand-built frames,
//! so these tests exercise the real codec, queue, correlation and retry
//! machinery end to end.
//!
//! ```text
//! Session ── Connection ── DuplexTransport ═══ duplex ═══ Peer (test)
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rnet_client::infrastructure::connection::{BoxedReader, BoxedWriter};
use rnet_client::{
    Connection, ConnectionError, PathUpdate, ProtocolIssue, Reply, Session, SessionConfig,
    SessionError, SessionEvent, SessionState, Transport,
};
use rnet_core::{
    decode_message, encode_message, DeviceAddress, Envelope, EventId, EventMessage,
    FrameDecoder, HandshakeKind, HandshakeMessage, Message, Path, Priority, ProtocolError,
    SetDataMessage,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const PATIENCE: Duration = Duration::from_secs(2);

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Hands the session its end of a duplex pipe, once.
struct DuplexTransport {
    stream: Mutex<Option<DuplexStream>>,
}

#[async_trait]
impl Transport for DuplexTransport {
    fn describe(&self) -> String {
        "duplex://test".to_string()
    }

    async fn connect(&self) -> Result<(BoxedReader, BoxedWriter), ConnectionError> {
        let stream = self
            .stream
            .lock()
            .unwrap()
            .take()
            .ok_or(ConnectionError::NotOpen)?;
        let (r, w) = tokio::io::split(stream);
        Ok((Box::new(r), Box::new(w)))
    }
}

/// The fake controller on the far end of the pipe.
struct Peer {
    stream: DuplexStream,
    decoder: FrameDecoder,
}

impl Peer {
    /// Next envelope written by the session.  Panics after [`PATIENCE`].
    async fn next(&mut self) -> Envelope {
        self.try_next(PATIENCE)
            .await
            .expect("session wrote nothing")
    }

    async fn try_next(&mut self, wait: Duration) -> Option<Envelope> {
        let read = async {
            loop {
                if let Some(frame) = self.decoder.next_frame().expect("session wrote a bad frame") {
                    return decode_message(&frame).expect("session wrote a bad message");
                }
                let mut buf = [0u8; 256];
                let n = self.stream.read(&mut buf).await.expect("peer read");
                assert!(n > 0, "session closed the stream");
                self.decoder.extend(&buf[..n]);
            }
        };
        tokio::time::timeout(wait, read).await.ok()
    }

    async fn send(&mut self, envelope: &Envelope) {
        let bytes = encode_message(envelope).expect("encode");
        self.stream.write_all(&bytes).await.expect("peer write");
    }

    async fn handshake(&mut self, from: DeviceAddress, kind: HandshakeKind) {
        self.send(&Envelope::new(
            DeviceAddress::external(),
            from,
            Message::Handshake(HandshakeMessage { kind }),
        ))
        .await;
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        request_timeout: Duration::from_millis(100),
        retries: 0,
        scan_interval: Duration::from_millis(5),
        ..SessionConfig::default()
    }
}

fn wire(config: SessionConfig) -> (Session, Peer) {
    wire_with_capacity(config, 8192)
}

/// Like [`wire`], with `capacity` bytes of buffering in each direction.
fn wire_with_capacity(config: SessionConfig, capacity: usize) -> (Session, Peer) {
    let (ours, theirs) = tokio::io::duplex(capacity);
    let transport = Arc::new(DuplexTransport {
        stream: Mutex::new(Some(ours)),
    });
    let session = Session::new(Connection::new(transport), config);
    let peer = Peer {
        stream: theirs,
        decoder: FrameDecoder::new(),
    };
    (session, peer)
}

async fn started(config: SessionConfig) -> (Session, Peer) {
    started_with_capacity(config, 8192).await
}

async fn started_with_capacity(config: SessionConfig, capacity: usize) -> (Session, Peer) {
    let (session, peer) = wire_with_capacity(config, capacity);
    session.start().await.expect("start");
    (session, peer)
}

fn volume_up(zone: u8) -> Message {
    Message::Event(EventMessage::new(
        Path::new([2, zone]).unwrap(),
        EventId::VOLUME_UP,
        Priority::High,
    ))
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_and_stop_walk_the_state_machine() {
    // Arrange
    let (session, _peer) = wire(fast_config());
    let mut events = session.events();

    // Act
    session.start().await.unwrap();
    let while_running = session.state();
    session.stop().await;

    // Assert
    let states: Vec<SessionState> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::SessionStateChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(while_running, SessionState::Started);
    assert_eq!(
        states,
        vec![
            SessionState::Starting,
            SessionState::Started,
            SessionState::Stopping,
            SessionState::Stopped,
        ]
    );
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let (session, _peer) = started(fast_config()).await;

    let again = session.start().await;

    assert!(matches!(again, Err(SessionError::AlreadyStarted)));
    session.stop().await;
}

#[tokio::test]
async fn test_stop_completes_while_peer_stops_reading() {
    // Arrange – a tiny pipe the peer never drains, so the writer blocks
    let (session, _peer) = started_with_capacity(
        SessionConfig {
            request_timeout: Duration::from_secs(5),
            ..fast_config()
        },
        32,
    )
    .await;
    let handles: Vec<_> = (0..10)
        .map(|zone| {
            session
                .send(DeviceAddress::controller(1), volume_up(zone), Priority::Low)
                .unwrap()
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Act
    let stopped = tokio::time::timeout(PATIENCE, session.stop()).await;

    // Assert
    assert!(stopped.is_ok(), "stop hung behind a blocked write");
    assert_eq!(session.state(), SessionState::Stopped);
    for handle in handles {
        assert!(matches!(handle.wait().await, Err(SessionError::Cancelled)));
    }
}

#[tokio::test]
async fn test_send_after_stop_is_not_started() {
    let (session, _peer) = started(fast_config()).await;
    session.stop().await;

    let result = session.send(DeviceAddress::root_controller(), volume_up(0), Priority::Low);

    assert!(matches!(result, Err(SessionError::NotStarted)));
}

// ── Request / reply ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_event_resolves_on_handshake() {
    // Arrange
    let (session, mut peer) = started(fast_config()).await;
    let controller = DeviceAddress::root_controller();

    // Act
    let handle = session
        .send(controller, volume_up(0), Priority::High)
        .unwrap();
    let written = peer.next().await;
    peer.handshake(controller, HandshakeKind::Command).await;
    let reply = tokio::time::timeout(PATIENCE, handle.wait()).await.unwrap();

    // Assert
    assert_eq!(written.target, controller);
    assert_eq!(written.source, DeviceAddress::external());
    assert_eq!(written.message, volume_up(0));
    assert_eq!(reply.unwrap(), Reply::Ack(HandshakeKind::Command));
    assert_eq!(session.pending_count(), 0);
    session.stop().await;
}

#[tokio::test]
async fn test_high_priority_frame_written_before_earlier_low() {
    // Arrange
    let (session, mut peer) = started(fast_config()).await;

    // Act – queue all three before the writer task gets to run
    let _a = session
        .send(DeviceAddress::controller(1), volume_up(1), Priority::Low)
        .unwrap();
    let _b = session
        .send(DeviceAddress::controller(2), volume_up(2), Priority::High)
        .unwrap();
    let _c = session
        .send(DeviceAddress::controller(3), volume_up(3), Priority::Low)
        .unwrap();
    let order = vec![
        peer.next().await.target,
        peer.next().await.target,
        peer.next().await.target,
    ];

    // Assert
    assert_eq!(
        order,
        vec![
            DeviceAddress::controller(2),
            DeviceAddress::controller(1),
            DeviceAddress::controller(3),
        ]
    );
    session.stop().await;
}

#[tokio::test]
async fn test_unanswered_event_resends_then_times_out() {
    // Arrange
    let config = SessionConfig {
        request_timeout: Duration::from_millis(60),
        retries: 2,
        ..fast_config()
    };
    let (session, mut peer) = started(config).await;

    // Act
    let handle = session
        .send(DeviceAddress::root_controller(), volume_up(0), Priority::Low)
        .unwrap();
    let outcome = tokio::time::timeout(PATIENCE, handle.wait()).await.unwrap();

    // Assert – one original plus exactly two resends of the same frame
    assert!(matches!(outcome, Err(SessionError::Timeout { attempts: 3 })));
    for _ in 0..3 {
        assert_eq!(peer.next().await.message, volume_up(0));
    }
    assert!(peer.try_next(Duration::from_millis(150)).await.is_none());
    session.stop().await;
}

#[tokio::test]
async fn test_zero_scan_interval_still_times_out() {
    // Arrange
    let config = SessionConfig {
        request_timeout: Duration::from_millis(30),
        scan_interval: Duration::ZERO,
        ..fast_config()
    };
    let (session, _peer) = started(config).await;

    // Act
    let handle = session
        .send(DeviceAddress::root_controller(), volume_up(0), Priority::Low)
        .unwrap();
    let outcome = tokio::time::timeout(PATIENCE, handle.wait()).await;

    // Assert
    assert!(matches!(
        outcome,
        Ok(Err(SessionError::Timeout { attempts: 1 }))
    ));
    session.stop().await;
}

#[tokio::test]
async fn test_data_handshake_does_not_complete_event() {
    // Arrange
    let (session, mut peer) = started(fast_config()).await;
    let controller = DeviceAddress::controller(1);
    let handle = session
        .send(controller, volume_up(0), Priority::Low)
        .unwrap();
    peer.next().await;

    // Act – a late pacing handshake arrives before the real acknowledgement
    peer.handshake(controller, HandshakeKind::Data).await;
    peer.handshake(controller, HandshakeKind::Command).await;

    // Assert
    let reply = tokio::time::timeout(PATIENCE, handle.wait()).await.unwrap();
    assert_eq!(reply.unwrap(), Reply::Ack(HandshakeKind::Command));
    session.stop().await;
}

#[tokio::test]
async fn test_broadcast_event_completes_when_written() {
    let (session, mut peer) = started(fast_config()).await;

    let handle = session
        .send(DeviceAddress::all_controllers(), volume_up(0), Priority::High)
        .unwrap();
    let reply = tokio::time::timeout(PATIENCE, handle.wait()).await.unwrap();

    assert_eq!(reply.unwrap(), Reply::Sent);
    assert_eq!(peer.next().await.target, DeviceAddress::all_controllers());
    assert_eq!(session.pending_count(), 0);
    session.stop().await;
}

#[tokio::test]
async fn test_unmatched_handshake_is_ignored() {
    // Arrange
    let (session, mut peer) = started(fast_config()).await;
    let handle = session
        .send(DeviceAddress::controller(1), volume_up(0), Priority::Low)
        .unwrap();
    peer.next().await;

    // Act – the wrong controller answers first
    peer.handshake(DeviceAddress::controller(5), HandshakeKind::Command).await;
    peer.handshake(DeviceAddress::controller(1), HandshakeKind::Command).await;

    // Assert
    let reply = tokio::time::timeout(PATIENCE, handle.wait()).await.unwrap();
    assert_eq!(reply.unwrap(), Reply::Ack(HandshakeKind::Command));
    session.stop().await;
}

// ── Path data ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_read_path_reassembles_multi_packet_reply() {
    // Arrange
    let (session, mut peer) = started(fast_config()).await;
    let controller = DeviceAddress::root_controller();
    let path = Path::new([2, 0, 0, 7]).unwrap();
    let value: Vec<u8> = (0..100u8).collect();
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    session.subscribe(controller, path.clone(), move |u| {
        sink.lock().unwrap().push(u.clone());
    });

    // Act
    let reader = {
        let session = session.clone();
        let path = path.clone();
        tokio::spawn(async move { session.read_path(controller, &path, false).await })
    };
    let request = peer.next().await;
    let packets = SetDataMessage::split(&Path::root(), &path, &value).unwrap();
    for packet in &packets {
        peer.send(&Envelope::new(
            DeviceAddress::external(),
            controller,
            Message::SetData(packet.clone()),
        ))
        .await;
    }
    let result = tokio::time::timeout(PATIENCE, reader).await.unwrap().unwrap();

    // Assert
    match request.message {
        Message::RequestData(r) => assert_eq!(r.target_path, path),
        other => panic!("expected RequestData, got {other:?}"),
    }
    assert_eq!(&*result.unwrap(), value.as_slice());
    for _ in &packets {
        let ack = peer.next().await;
        assert_eq!(ack.target, controller);
        assert_eq!(
            ack.message,
            Message::Handshake(HandshakeMessage {
                kind: HandshakeKind::Data
            })
        );
    }
    let seen = updates.lock().unwrap().clone();
    assert_eq!(seen.len(), packets.len() + 1);
    assert!(matches!(
        seen.last(),
        Some(PathUpdate::Complete { value: v, .. }) if &**v == value.as_slice()
    ));
    session.stop().await;
}

#[tokio::test]
async fn test_read_path_with_lost_packet_never_resolves_as_data() {
    // Arrange
    let (session, mut peer) = started(SessionConfig {
        request_timeout: Duration::from_millis(200),
        acknowledge_data: false,
        ..fast_config()
    })
    .await;
    let mut events = session.events();
    let controller = DeviceAddress::root_controller();
    let path = Path::new([2, 0, 0, 7]).unwrap();
    let reader = {
        let session = session.clone();
        let path = path.clone();
        tokio::spawn(async move { session.read_path(controller, &path, false).await })
    };
    peer.next().await;

    // Act – packet 1 of 3 is lost
    let packets = SetDataMessage::split(&Path::root(), &path, &[0x33; 150]).unwrap();
    for packet in [&packets[0], &packets[2]] {
        peer.send(&Envelope::new(
            DeviceAddress::external(),
            controller,
            Message::SetData(packet.clone()),
        ))
        .await;
    }
    let result = tokio::time::timeout(PATIENCE, reader).await.unwrap().unwrap();

    // Assert
    assert!(matches!(result, Err(SessionError::Timeout { .. })));
    assert_eq!(session.cached(controller, &path), None);
    let reported = drain(&mut events).into_iter().any(|e| {
        matches!(
            e,
            SessionEvent::ProtocolError(ProtocolIssue::Reassembly { .. })
        )
    });
    assert!(reported);
    session.stop().await;
}

#[tokio::test]
async fn test_cached_read_sends_nothing() {
    // Arrange – an unsolicited push fills the cache
    let (session, mut peer) = started(SessionConfig {
        acknowledge_data: false,
        ..fast_config()
    })
    .await;
    let controller = DeviceAddress::controller(0);
    let path = Path::new([2, 0, 1]).unwrap();
    peer.send(&Envelope::new(
        DeviceAddress::external(),
        controller,
        Message::SetData(SetDataMessage {
            target_path: Path::root(),
            source_path: path.clone(),
            packet_number: 0,
            packet_count: 1,
            data: b"Den".to_vec(),
        }),
    ))
    .await;
    let mut waited = Duration::ZERO;
    while session.cached(controller, &path).is_none() && waited < PATIENCE {
        tokio::time::sleep(Duration::from_millis(5)).await;
        waited += Duration::from_millis(5);
    }

    // Act
    let value = session.read_path(controller, &path, false).await.unwrap();

    // Assert
    assert_eq!(&*value, b"Den");
    assert!(peer.try_next(Duration::from_millis(50)).await.is_none());
    session.stop().await;
}

#[tokio::test]
async fn test_write_path_splits_value_into_packets() {
    // Arrange
    let (session, mut peer) = started(fast_config()).await;
    let controller = DeviceAddress::controller(0);
    let path = Path::new([2, 0, 0, 3]).unwrap();
    let value = vec![0xF0; 100];

    // Act
    let result = tokio::time::timeout(
        PATIENCE,
        session.write_path(controller, &path, &value, Priority::Low),
    )
    .await
    .unwrap();

    // Assert
    assert!(result.is_ok());
    let mut joined = Vec::new();
    for expected in 0..2u16 {
        match peer.next().await.message {
            Message::SetData(p) => {
                assert_eq!(p.target_path, path);
                assert_eq!(p.packet_number, expected);
                assert_eq!(p.packet_count, 2);
                joined.extend(p.data);
            }
            other => panic!("expected SetData, got {other:?}"),
        }
    }
    assert_eq!(joined, value);
    session.stop().await;
}

// ── Failure handling ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_cancels_outstanding_requests() {
    // Arrange
    let (session, mut peer) = started(fast_config()).await;
    let handle = session
        .send(DeviceAddress::root_controller(), volume_up(0), Priority::Low)
        .unwrap();
    peer.next().await;

    // Act
    session.stop().await;

    // Assert
    let outcome = handle.wait().await;
    assert!(matches!(outcome, Err(SessionError::Cancelled)));
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_cancel_withdraws_single_request() {
    // Arrange
    let (session, _peer) = started(SessionConfig {
        request_timeout: Duration::from_secs(5),
        ..fast_config()
    })
    .await;
    let first = session
        .send(DeviceAddress::controller(1), volume_up(1), Priority::Low)
        .unwrap();
    let _second = session
        .send(DeviceAddress::controller(2), volume_up(2), Priority::Low)
        .unwrap();

    // Act
    assert!(first.cancel());
    let outcome = first.wait().await;

    // Assert
    assert!(matches!(outcome, Err(SessionError::Cancelled)));
    assert_eq!(session.pending_count(), 1);
    session.stop().await;
}

#[tokio::test]
async fn test_peer_disconnect_fails_pending_and_stops_session() {
    // Arrange
    let (session, mut peer) = started(SessionConfig {
        request_timeout: Duration::from_secs(5),
        ..fast_config()
    })
    .await;
    let handle = session
        .send(DeviceAddress::root_controller(), volume_up(0), Priority::Low)
        .unwrap();
    peer.next().await;
    let mut states = session.watch_state();

    // Act
    drop(peer);
    let outcome = tokio::time::timeout(PATIENCE, handle.wait()).await.unwrap();

    // Assert
    assert!(matches!(outcome, Err(SessionError::Connection(_))));
    tokio::time::timeout(PATIENCE, states.wait_for(|s| *s == SessionState::Stopped))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.pending_count(), 0);
}

#[tokio::test]
async fn test_corrupt_frame_is_reported_and_stream_recovers() {
    // Arrange
    let (session, mut peer) = started(fast_config()).await;
    let mut events = session.events();
    let controller = DeviceAddress::root_controller();
    let handle = session
        .send(controller, volume_up(0), Priority::High)
        .unwrap();
    peer.next().await;
    let ack = Envelope::new(
        DeviceAddress::external(),
        controller,
        Message::Handshake(HandshakeMessage {
            kind: HandshakeKind::Command,
        }),
    );
    let mut corrupt = encode_message(&ack).unwrap();
    let checksum_at = corrupt.len() - 2;
    corrupt[checksum_at] ^= 0x01;

    // Act
    peer.stream.write_all(&corrupt).await.unwrap();
    peer.send(&ack).await;
    let reply = tokio::time::timeout(PATIENCE, handle.wait()).await.unwrap();

    // Assert
    assert_eq!(reply.unwrap(), Reply::Ack(HandshakeKind::Command));
    let reported = drain(&mut events).into_iter().any(|e| {
        matches!(
            e,
            SessionEvent::ProtocolError(ProtocolIssue::Decode(ProtocolError::ChecksumError { .. }))
        )
    });
    assert!(reported);
    session.stop().await;
}

#[tokio::test]
async fn test_packet_without_first_is_reported_as_no_active_write() {
    // Arrange
    let (session, mut peer) = started(SessionConfig {
        acknowledge_data: false,
        ..fast_config()
    })
    .await;
    let mut events = session.events();

    // Act
    peer.send(&Envelope::new(
        DeviceAddress::external(),
        DeviceAddress::controller(0),
        Message::SetData(SetDataMessage {
            target_path: Path::root(),
            source_path: Path::new([2, 0]).unwrap(),
            packet_number: 1,
            packet_count: 2,
            data: vec![1, 2],
        }),
    ))
    .await;

    // Assert
    let issue = tokio::time::timeout(PATIENCE, async {
        loop {
            if let SessionEvent::ProtocolError(issue) = events.recv().await.unwrap() {
                return issue;
            }
        }
    })
    .await
    .unwrap();
    assert!(matches!(issue, ProtocolIssue::Reassembly { .. }));
    session.stop().await;
}
