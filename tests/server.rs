mod common;

use std::sync::Arc;

use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use common::{data, recv, syn, WAIT};
use mux_server::config::ServerConfig;
use mux_server::frame::{Frame, FrameCodec, GoAwayStatus, FLAG_FIN};
use mux_server::lifecycle::Shutdown;
use mux_server::net::Listener;
use mux_server::server::MuxServer;
use mux_server::session::DiscardHandler;

fn local_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config
}

#[tokio::test]
async fn shutdown_drains_open_streams() {
    let config = local_config();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = MuxServer::new(config, Arc::new(DiscardHandler));
    let tracker = server.tracker().clone();
    let shutdown = Shutdown::new();
    let run = tokio::spawn(server.run(listener, shutdown.clone()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut peer = Framed::new(stream, FrameCodec::default());
    peer.send(syn(1)).await.unwrap();
    peer.send(Frame::Ping { id: 1 }).await.unwrap();
    assert_eq!(recv(&mut peer).await, Some(Frame::Ping { id: 1 }));

    shutdown.trigger();
    assert_eq!(
        recv(&mut peer).await,
        Some(Frame::GoAway {
            last_good_stream_id: 1,
            status: GoAwayStatus::Ok,
        })
    );

    peer.send(data(1, FLAG_FIN, b"done")).await.unwrap();
    assert_eq!(recv(&mut peer).await, None);

    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(tracker.finished_count(), 1);
    assert_eq!(tracker.active_count(), 0);
}

#[tokio::test]
async fn grace_period_closes_stalled_sessions() {
    let mut config = local_config();
    config.session.shutdown_grace_ms = 100;
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = MuxServer::new(config, Arc::new(DiscardHandler));
    let tracker = server.tracker().clone();
    let shutdown = Shutdown::new();
    let run = tokio::spawn(server.run(listener, shutdown.clone()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut peer = Framed::new(stream, FrameCodec::default());
    peer.send(syn(1)).await.unwrap();
    peer.send(Frame::Ping { id: 9 }).await.unwrap();
    assert_eq!(recv(&mut peer).await, Some(Frame::Ping { id: 9 }));

    shutdown.trigger();
    assert!(matches!(recv(&mut peer).await, Some(Frame::GoAway { .. })));
    assert_eq!(recv(&mut peer).await, None);

    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(tracker.finished_count(), 1);
}

#[tokio::test]
async fn idle_connection_closes_after_goaway() {
    let config = local_config();
    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = MuxServer::new(config, Arc::new(DiscardHandler));
    let tracker = server.tracker().clone();
    let shutdown = Shutdown::new();
    let run = tokio::spawn(server.run(listener, shutdown.clone()));

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut peer = Framed::new(stream, FrameCodec::default());
    peer.send(Frame::Ping { id: 3 }).await.unwrap();
    assert_eq!(recv(&mut peer).await, Some(Frame::Ping { id: 3 }));

    shutdown.trigger();
    assert_eq!(
        recv(&mut peer).await,
        Some(Frame::GoAway {
            last_good_stream_id: 0,
            status: GoAwayStatus::Ok,
        })
    );
    assert_eq!(recv(&mut peer).await, None);

    tokio::time::timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert_eq!(tracker.finished_count(), 1);
}
