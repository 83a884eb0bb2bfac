use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use super::*;
use crate::buffer::BufferPool;
use crate::config::SessionConfig;
use crate::frame::{Frame, FrameCodec, GoAwayStatus, RstStatus, FLAG_FIN};
use crate::net::ConnectionTracker;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Frame(u32, &'static str),
    Closed(u32),
}

struct RecordingHandler {
    events: mpsc::UnboundedSender<Event>,
}

impl StreamHandler for RecordingHandler {
    fn on_frame(&self, stream: &StreamContext, frame: Frame) {
        let _ = self
            .events
            .send(Event::Frame(stream.stream_id(), frame.kind_name()));
    }

    fn on_close(&self, stream: &StreamContext) {
        let _ = self.events.send(Event::Closed(stream.stream_id()));
    }
}

/// Server side of the connection fails every write.
struct FailingWrites(DuplexStream);

impl AsyncRead for FailingWrites {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for FailingWrites {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct Harness {
    peer: Framed<DuplexStream, FrameCodec>,
    session: Arc<Session>,
    events: mpsc::UnboundedReceiver<Event>,
    stop: broadcast::Sender<()>,
    tracker: ConnectionTracker,
    task: JoinHandle<CloseReason>,
}

async fn start(config: SessionConfig) -> Harness {
    let (client, server) = tokio::io::duplex(64 * 1024);
    start_io(config, server, client).await
}

async fn start_io<S>(config: SessionConfig, io: S, peer: DuplexStream) -> Harness
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (events_tx, events) = mpsc::unbounded_channel();
    let tracker = ConnectionTracker::new();
    let manager = SessionManager::new(
        config,
        BufferPool::new(4096, 8, 0),
        Arc::new(RecordingHandler { events: events_tx }),
        Arc::new(tracker.clone()),
    );
    let (stop, stop_rx) = broadcast::channel(1);
    let (session_tx, session_rx) = oneshot::channel();
    let id = tracker.open();

    let task = tokio::spawn(async move {
        manager
            .drive(id, io, stop_rx, move |session| {
                let _ = session_tx.send(Arc::clone(session));
            })
            .await
    });
    let session = session_rx.await.expect("session started");

    Harness {
        peer: Framed::new(peer, FrameCodec::default()),
        session,
        events,
        stop,
        tracker,
        task,
    }
}

impl Harness {
    async fn send(&mut self, frame: Frame) {
        self.peer.send(frame).await.expect("send frame");
    }

    async fn recv(&mut self) -> Option<Frame> {
        timeout(WAIT, self.peer.next())
            .await
            .expect("timed out waiting for a frame")
            .map(|frame| frame.expect("decode frame"))
    }

    /// Round-trip a PING so every earlier frame has been dispatched.
    async fn sync(&mut self, id: u32) {
        self.send(Frame::Ping { id }).await;
        assert_eq!(self.recv().await, Some(Frame::Ping { id }));
    }

    async fn event(&mut self) -> Event {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for a handler event")
            .expect("handler dropped")
    }

    fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    async fn finish(&mut self) -> CloseReason {
        timeout(WAIT, &mut self.task)
            .await
            .expect("session did not finish")
            .expect("session task panicked")
    }
}

fn syn(stream_id: u32) -> Frame {
    Frame::SynStream {
        stream_id,
        associated_stream_id: 0,
        priority: 0,
        slot: 0,
        flags: 0,
        header_block: Bytes::from_static(b"headers"),
    }
}

fn data(stream_id: u32, flags: u8) -> Frame {
    Frame::Data {
        stream_id,
        flags,
        data: Bytes::from_static(b"body"),
    }
}

fn goaway() -> Frame {
    Frame::GoAway {
        last_good_stream_id: 0,
        status: GoAwayStatus::Ok,
    }
}

fn for_stream(events: &[Event], id: u32) -> Vec<Event> {
    events
        .iter()
        .filter(|event| match event {
            Event::Frame(stream, _) | Event::Closed(stream) => *stream == id,
        })
        .cloned()
        .collect()
}

#[tokio::test]
async fn peer_goaway_drains_open_streams() {
    let mut h = start(SessionConfig::default()).await;

    h.send(syn(1)).await;
    h.send(syn(3)).await;
    h.sync(100).await;
    assert_eq!(h.session.registry().ids(), vec![1, 3]);
    assert_eq!(h.session.registry().high_water_mark(), 3);

    h.send(goaway()).await;
    h.sync(101).await;
    assert_eq!(h.session.state(), SessionState::DrainingPeerGoaway);

    h.send(data(1, FLAG_FIN)).await;
    h.sync(102).await;
    assert!(!h.session.is_closed());

    h.send(data(3, FLAG_FIN)).await;
    assert_eq!(h.finish().await, CloseReason::PeerGoaway);
    assert_eq!(h.recv().await, None);

    assert_eq!(h.session.state(), SessionState::Closed);
    assert!(h.session.registry().is_empty());
    assert_eq!(h.session.registry().high_water_mark(), 3);
    assert_eq!(h.tracker.finished_count(), 1);
    assert_eq!(h.tracker.active_count(), 0);

    let events = h.drain_events();
    for id in [1, 3] {
        assert_eq!(
            for_stream(&events, id),
            vec![
                Event::Frame(id, "syn_stream"),
                Event::Frame(id, "data"),
                Event::Closed(id),
            ]
        );
    }
}

#[tokio::test]
async fn goaway_without_streams_closes_immediately() {
    let mut h = start(SessionConfig::default()).await;

    h.send(goaway()).await;
    assert_eq!(h.finish().await, CloseReason::PeerGoaway);
    assert_eq!(h.recv().await, None);
    assert_eq!(h.tracker.finished_count(), 1);
}

#[tokio::test]
async fn ping_is_echoed_once() {
    let mut h = start(SessionConfig::default()).await;

    h.send(Frame::Ping { id: 7 }).await;
    assert_eq!(h.recv().await, Some(Frame::Ping { id: 7 }));
    h.send(Frame::Ping { id: 8 }).await;
    assert_eq!(h.recv().await, Some(Frame::Ping { id: 8 }));

    assert!(h.session.registry().is_empty());
    assert_eq!(h.session.state(), SessionState::Active);

    h.peer.get_mut().shutdown().await.unwrap();
    assert_eq!(h.finish().await, CloseReason::PeerClosed);
}

#[tokio::test]
async fn streams_opened_after_peer_goaway_are_ignored() {
    let mut h = start(SessionConfig::default()).await;

    h.send(syn(1)).await;
    h.send(goaway()).await;
    h.send(syn(3)).await;
    h.sync(1).await;

    assert_eq!(h.session.registry().ids(), vec![1]);
    assert_eq!(h.session.registry().high_water_mark(), 1);

    h.send(data(1, FLAG_FIN)).await;
    assert_eq!(h.finish().await, CloseReason::PeerGoaway);
    assert!(for_stream(&h.drain_events(), 3).is_empty());
}

#[tokio::test]
async fn stream_limit_refuses_with_rst() {
    let config = SessionConfig {
        max_concurrent_streams: 1,
        ..SessionConfig::default()
    };
    let mut h = start(config).await;

    h.send(syn(1)).await;
    h.send(syn(3)).await;
    assert_eq!(
        h.recv().await,
        Some(Frame::RstStream {
            stream_id: 3,
            status: RstStatus::RefusedStream,
        })
    );
    assert_eq!(h.session.registry().ids(), vec![1]);
    assert_eq!(h.session.registry().high_water_mark(), 1);

    h.peer.get_mut().shutdown().await.unwrap();
    assert_eq!(h.finish().await, CloseReason::PeerClosed);
}

#[tokio::test]
async fn server_stop_announces_goaway_and_drains() {
    let mut h = start(SessionConfig::default()).await;

    h.send(syn(1)).await;
    h.sync(1).await;
    h.stop.send(()).unwrap();

    assert_eq!(
        h.recv().await,
        Some(Frame::GoAway {
            last_good_stream_id: 1,
            status: GoAwayStatus::Ok,
        })
    );
    assert!(h.session.local_goaway());

    h.send(syn(3)).await;
    assert_eq!(
        h.recv().await,
        Some(Frame::RstStream {
            stream_id: 3,
            status: RstStatus::RefusedStream,
        })
    );

    h.send(data(1, FLAG_FIN)).await;
    assert_eq!(h.finish().await, CloseReason::ServerShutdown);
    assert_eq!(h.recv().await, None);
    assert_eq!(h.session.registry().high_water_mark(), 1);
}

#[tokio::test]
async fn server_stop_closes_idle_session() {
    let mut h = start(SessionConfig::default()).await;

    h.stop.send(()).unwrap();
    assert_eq!(
        h.recv().await,
        Some(Frame::GoAway {
            last_good_stream_id: 0,
            status: GoAwayStatus::Ok,
        })
    );
    assert_eq!(h.finish().await, CloseReason::ServerShutdown);
    assert_eq!(h.recv().await, None);
}

#[tokio::test]
async fn grace_period_bounds_the_drain() {
    let config = SessionConfig {
        shutdown_grace_ms: 50,
        ..SessionConfig::default()
    };
    let mut h = start(config).await;

    h.send(syn(1)).await;
    h.sync(1).await;
    h.stop.send(()).unwrap();
    assert!(matches!(h.recv().await, Some(Frame::GoAway { .. })));

    assert_eq!(h.finish().await, CloseReason::ServerShutdown);
    assert!(h.session.registry().is_empty());
    assert!(h.drain_events().contains(&Event::Closed(1)));
}

#[tokio::test]
async fn invalid_stream_frames_are_dropped() {
    let mut h = start(SessionConfig::default()).await;

    h.send(data(5, 0)).await;
    h.send(syn(3)).await;
    h.send(syn(3)).await;
    h.send(syn(1)).await;
    h.send(syn(0)).await;
    h.sync(1).await;

    assert_eq!(h.session.state(), SessionState::Active);
    assert_eq!(h.session.registry().ids(), vec![3]);
    assert_eq!(h.event().await, Event::Frame(3, "syn_stream"));

    h.peer.get_mut().shutdown().await.unwrap();
    assert_eq!(h.finish().await, CloseReason::PeerClosed);
    assert_eq!(h.drain_events(), vec![Event::Closed(3)]);
}

#[tokio::test]
async fn rst_stream_ends_the_stream() {
    let mut h = start(SessionConfig::default()).await;

    h.send(syn(1)).await;
    h.send(Frame::RstStream {
        stream_id: 1,
        status: RstStatus::Cancel,
    })
    .await;

    assert_eq!(h.event().await, Event::Frame(1, "syn_stream"));
    assert_eq!(h.event().await, Event::Frame(1, "rst_stream"));
    assert_eq!(h.event().await, Event::Closed(1));
    assert_eq!(h.session.state(), SessionState::Active);
}

#[tokio::test]
async fn idle_stream_times_out() {
    let config = SessionConfig {
        stream_idle_timeout_ms: 50,
        ..SessionConfig::default()
    };
    let mut h = start(config).await;

    h.send(syn(1)).await;
    assert_eq!(h.event().await, Event::Frame(1, "syn_stream"));
    assert_eq!(
        h.recv().await,
        Some(Frame::RstStream {
            stream_id: 1,
            status: RstStatus::Cancel,
        })
    );
    assert_eq!(h.event().await, Event::Closed(1));

    // The stream deregisters right after its close callback.
    timeout(WAIT, async {
        while !h.session.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stream never deregistered");
    assert_eq!(h.session.state(), SessionState::Active);
}

#[tokio::test]
async fn undecodable_input_closes_session() {
    let mut h = start(SessionConfig::default()).await;

    // PING with protocol version 2.
    let bad = [0x80, 0x02, 0x00, 0x06, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01];
    h.peer.get_mut().write_all(&bad).await.unwrap();

    assert_eq!(h.finish().await, CloseReason::DecodeError);
    assert_eq!(h.tracker.finished_count(), 1);
}

#[tokio::test]
async fn write_failure_closes_every_stream() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let mut h = start_io(SessionConfig::default(), FailingWrites(server), client).await;

    h.send(syn(1)).await;
    h.send(syn(3)).await;
    h.send(Frame::Ping { id: 1 }).await;

    assert_eq!(h.finish().await, CloseReason::WriteFailed);
    assert_eq!(h.session.state(), SessionState::Closed);
    assert!(h.session.registry().is_empty());
    assert_eq!(h.tracker.finished_count(), 1);

    let events = h.drain_events();
    assert!(events.contains(&Event::Closed(1)));
    assert!(events.contains(&Event::Closed(3)));
}

#[tokio::test]
async fn exhausted_pool_still_reports_finished() {
    let tracker = ConnectionTracker::new();
    let pool = BufferPool::new(1024, 1, 1);
    let manager = SessionManager::new(
        SessionConfig::default(),
        pool.clone(),
        Arc::new(DiscardHandler),
        Arc::new(tracker.clone()),
    );
    let (_client, server) = tokio::io::duplex(1024);
    let (_stop, stop_rx) = broadcast::channel(1);

    let id = tracker.open();
    let reason = manager.handle_connection(id, server, stop_rx).await;

    assert_eq!(reason, CloseReason::ResourceUnavailable);
    assert_eq!(tracker.finished_count(), 1);
    assert_eq!(tracker.active_count(), 0);
    assert_eq!(pool.outstanding(), 0);
}

#[tokio::test]
async fn duplicate_id_at_stream_limit_is_dropped_not_refused() {
    let config = SessionConfig {
        max_concurrent_streams: 1,
        ..SessionConfig::default()
    };
    let mut h = start(config).await;

    h.send(syn(1)).await;
    h.sync(1).await;
    h.send(syn(1)).await;
    // The echo arrives first: no RST_STREAM was sent for the live stream.
    h.sync(2).await;

    assert_eq!(h.session.registry().ids(), vec![1]);
    assert_eq!(h.session.state(), SessionState::Active);

    h.peer.get_mut().shutdown().await.unwrap();
    assert_eq!(h.finish().await, CloseReason::PeerClosed);
}

#[tokio::test]
async fn invalid_id_after_server_stop_is_dropped_not_refused() {
    let mut h = start(SessionConfig::default()).await;

    h.send(syn(3)).await;
    h.sync(1).await;
    h.stop.send(()).unwrap();
    assert_eq!(
        h.recv().await,
        Some(Frame::GoAway {
            last_good_stream_id: 3,
            status: GoAwayStatus::Ok,
        })
    );

    h.send(syn(3)).await;
    h.send(syn(1)).await;
    h.sync(2).await;

    h.send(syn(5)).await;
    assert_eq!(
        h.recv().await,
        Some(Frame::RstStream {
            stream_id: 5,
            status: RstStatus::RefusedStream,
        })
    );

    h.send(data(3, FLAG_FIN)).await;
    assert_eq!(h.finish().await, CloseReason::ServerShutdown);
}

#[tokio::test]
async fn unread_connection_still_finishes() {
    // Room for two PING echoes; the rest of the writes block.
    let (client, server) = tokio::io::duplex(32);
    let mut h = start_io(SessionConfig::default(), server, client).await;

    for id in 0..5 {
        h.send(Frame::Ping { id }).await;
    }
    h.send(goaway()).await;

    assert_eq!(h.finish().await, CloseReason::PeerGoaway);
    assert_eq!(h.tracker.finished_count(), 1);
    assert_eq!(h.tracker.active_count(), 0);
}

#[tokio::test]
async fn server_stop_during_blocked_write_is_bounded_by_grace() {
    let config = SessionConfig {
        shutdown_grace_ms: 100,
        ..SessionConfig::default()
    };
    let (client, server) = tokio::io::duplex(32);
    let mut h = start_io(config, server, client).await;

    h.send(syn(1)).await;
    for id in 0..5 {
        h.send(Frame::Ping { id }).await;
    }
    assert_eq!(h.event().await, Event::Frame(1, "syn_stream"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.stop.send(()).unwrap();

    assert_eq!(h.finish().await, CloseReason::ServerShutdown);
    assert!(h.session.local_goaway());
    assert_eq!(h.tracker.finished_count(), 1);
    assert!(h.drain_events().contains(&Event::Closed(1)));
}
