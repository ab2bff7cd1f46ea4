//! Integration tests for the link over the loopback transport.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::timeout;

use spp_link::bluetooth::{MemoryAdapter, MemoryPeer};
use spp_link::{ConnectionManager, Line, LinkSettings, SppError};

const PEER: &str = "98:D3:31:F5:0A:11";
const WAIT: Duration = Duration::from_secs(5);

fn fast_settings(buffer_capacity: usize) -> LinkSettings {
    LinkSettings {
        buffer_capacity,
        read_chunk_size: 16,
        poll_interval: Duration::from_millis(5),
        backpressure_interval: Duration::from_millis(5),
        enable_radio: false,
    }
}

async fn connected(
    settings: LinkSettings,
) -> (
    Arc<ConnectionManager<MemoryAdapter>>,
    MemoryAdapter,
    MemoryPeer,
    DuplexStream,
) {
    let adapter = MemoryAdapter::new();
    let mut peer = adapter.add_peer(PEER);
    let manager = Arc::new(ConnectionManager::with_current_runtime(
        adapter.clone(),
        settings,
    ));

    manager.connect(PEER).await.unwrap();
    let remote = peer.accept().await.unwrap();
    (manager, adapter, peer, remote)
}

#[tokio::test]
async fn test_send_counts_bytes() {
    let (manager, _adapter, _peer, mut remote) = connected(fast_settings(64)).await;

    assert_eq!(manager.send(b"AT\r\n").await.unwrap(), 4);
    assert_eq!(manager.send(b"AT+VERSION\r\n").await.unwrap(), 12);
    assert_eq!(manager.send(b"").await.unwrap(), 0);
    assert_eq!(manager.bytes_sent(), 16);

    let mut buf = [0u8; 16];
    remote.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"AT\r\nAT+VERSION\r\n");
}

#[tokio::test]
async fn test_delimiter_split_across_writes() {
    let (manager, _adapter, _peer, mut remote) = connected(fast_settings(64)).await;

    let writer = tokio::spawn(async move {
        for chunk in [&b"x\r"[..], b"y\r", b"\n"] {
            remote.write_all(chunk).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        remote
    });

    let line = timeout(WAIT, manager.receive_until_delimiter(b"\r\n"))
        .await
        .unwrap();
    assert_eq!(line, Some(Line::Complete(b"x\ry".to_vec())));

    let _remote = writer.await.unwrap();
    assert_eq!(manager.receive_available().await, None);
    assert_eq!(manager.bytes_received(), 5);
}

#[tokio::test]
async fn test_sequential_frames() {
    let (manager, _adapter, _peer, mut remote) = connected(fast_settings(64)).await;

    remote.write_all(b"ab").await.unwrap();
    remote.write_all(b"c\n").await.unwrap();
    remote.write_all(b"de").await.unwrap();

    let first = timeout(WAIT, manager.receive_until_delimiter(b"\n"))
        .await
        .unwrap();
    assert_eq!(first, Some(Line::Complete(b"abc".to_vec())));

    // "de" has no delimiter yet
    let pending = manager.clone();
    let second = tokio::spawn(async move { pending.receive_until_delimiter(b"\n").await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!second.is_finished());

    remote.write_all(b"\n").await.unwrap();
    let second = timeout(WAIT, second).await.unwrap().unwrap();
    assert_eq!(second, Some(Line::Complete(b"de".to_vec())));
}

#[tokio::test]
async fn test_receive_available_polls_buffer() {
    let (manager, _adapter, _peer, mut remote) = connected(fast_settings(64)).await;

    assert_eq!(manager.receive_available().await, None);
    remote.write_all(b"raw bytes").await.unwrap();

    let mut received = Vec::new();
    timeout(WAIT, async {
        while received.len() < 9 {
            if let Some(bytes) = manager.receive_available().await {
                received.extend(bytes);
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(received, b"raw bytes".to_vec());
    assert_eq!(manager.buffered_byte_count(), 0);
    assert_eq!(manager.bytes_received(), 9);
}

#[tokio::test]
async fn test_buffered_byte_count() {
    let (manager, _adapter, _peer, mut remote) = connected(fast_settings(64)).await;

    assert_eq!(manager.receive_available().await, None);
    remote.write_all(b"0123456789").await.unwrap();

    timeout(WAIT, async {
        while manager.buffered_byte_count() < 10 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(manager.buffered_byte_count(), 10);
}

#[tokio::test]
async fn test_backpressure_delivers_everything() {
    let (manager, _adapter, _peer, mut remote) = connected(fast_settings(16)).await;

    let frames: Vec<Vec<u8>> = (0..100).map(|i| format!("frame{i:03}").into_bytes()).collect();
    let mut stream = Vec::new();
    for frame in &frames {
        stream.extend_from_slice(frame);
        stream.push(b';');
    }
    let total = stream.len() as u64;

    let writer = tokio::spawn(async move {
        remote.write_all(&stream).await.unwrap();
        remote
    });

    let mut received = Vec::new();
    while received.len() < frames.len() {
        match timeout(WAIT, manager.receive_until_delimiter(b";")).await.unwrap() {
            Some(Line::Complete(frame)) => received.push(frame),
            other => panic!("unexpected receive result: {:?}", other),
        }
    }

    let _remote = writer.await.unwrap();
    assert_eq!(received, frames);
    assert_eq!(manager.bytes_received(), total);
}

#[tokio::test]
async fn test_overflow_frame() {
    let (manager, _adapter, _peer, mut remote) = connected(fast_settings(8)).await;

    remote.write_all(b"ABCDEFGH").await.unwrap();
    let line = timeout(WAIT, manager.receive_until_delimiter(b"\n"))
        .await
        .unwrap()
        .unwrap();

    assert!(line.is_overflow());
    assert_eq!(line.into_bytes(), b"ABCDEFGH".to_vec());
}

#[tokio::test]
async fn test_cancel_pending_receive() {
    let (manager, _adapter, _peer, _remote) = connected(fast_settings(64)).await;

    let waiter = manager.clone();
    let pending = tokio::spawn(async move { waiter.receive_until_delimiter(b"\n").await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!pending.is_finished());

    manager.cancel_pending_receive();
    let result = timeout(WAIT, pending).await.unwrap().unwrap();
    assert_eq!(result, None);
    assert!(manager.is_connected().await);
}

#[tokio::test]
async fn test_cancel_before_wait_is_ignored() {
    let (manager, _adapter, _peer, mut remote) = connected(fast_settings(64)).await;

    manager.cancel_pending_receive();
    remote.write_all(b"ok\n").await.unwrap();

    let line = timeout(WAIT, manager.receive_until_delimiter(b"\n"))
        .await
        .unwrap();
    assert_eq!(line, Some(Line::Complete(b"ok".to_vec())));
}

#[tokio::test]
async fn test_peer_disconnect_ends_wait() {
    let (manager, _adapter, _peer, remote) = connected(fast_settings(64)).await;

    assert_eq!(manager.receive_available().await, None);
    drop(remote);

    let result = timeout(WAIT, manager.receive_until_delimiter(b"\n"))
        .await
        .unwrap();
    assert_eq!(result, None);
    assert!(!manager.is_connected().await);
    assert!(matches!(manager.send(b"x").await, Err(SppError::NotConnected)));
}

#[tokio::test]
async fn test_send_failure_closes_connection() {
    let (manager, _adapter, _peer, remote) = connected(fast_settings(64)).await;

    drop(remote);
    match manager.send(b"hello").await {
        Err(SppError::ConnectionLost(_)) => {}
        other => panic!("unexpected send result: {:?}", other),
    }

    assert!(!manager.is_connected().await);
    assert_eq!(manager.bytes_sent(), 0);
    assert!(manager.closed_at().await.is_some());
}

#[tokio::test]
async fn test_reconnect_releases_previous_channel() {
    let (manager, adapter, mut peer, mut first) = connected(fast_settings(64)).await;

    assert_eq!(manager.receive_available().await, None);
    manager.connect(PEER).await.unwrap();
    let mut second = peer.accept().await.unwrap();
    assert_eq!(adapter.channels_opened(), 2);

    // The first channel sees end of stream once both halves are gone.
    let mut buf = [0u8; 8];
    let read = timeout(WAIT, first.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(read, 0);

    assert_eq!(manager.send(b"hi").await.unwrap(), 2);
    let mut buf = [0u8; 2];
    second.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hi");
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent() {
    let (manager, _adapter, _peer, _remote) = connected(fast_settings(64)).await;
    assert_eq!(manager.connection_hold_seconds().await, 0);

    tokio::time::advance(Duration::from_secs(3)).await;
    assert_eq!(manager.connection_hold_seconds().await, 3);

    manager.close().await;
    let closed_at = manager.closed_at().await.unwrap();

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(manager.connection_hold_seconds().await, 3);

    manager.close().await;
    assert_eq!(manager.closed_at().await, Some(closed_at));
    assert_eq!(manager.connection_hold_seconds().await, 3);
    assert!(!manager.is_connected().await);
}

#[tokio::test]
async fn test_close_aborts_stalled_send() {
    // The peer never reads, so a send larger than the pipe blocks
    let (manager, _adapter, _peer, _remote) = connected(fast_settings(64)).await;

    let sender = manager.clone();
    let pending = tokio::spawn(async move { sender.send(&vec![0u8; 256 * 1024]).await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!pending.is_finished());

    assert!(timeout(WAIT, manager.is_connected()).await.unwrap());
    assert_eq!(timeout(WAIT, manager.receive_available()).await.unwrap(), None);
    timeout(WAIT, manager.close()).await.unwrap();

    match timeout(WAIT, pending).await.unwrap().unwrap() {
        Err(SppError::ConnectionLost(e)) => {
            assert_eq!(e.kind(), std::io::ErrorKind::ConnectionAborted)
        }
        other => panic!("unexpected send result: {:?}", other),
    }
    assert_eq!(manager.bytes_sent(), 0);
    assert!(!manager.is_connected().await);
}

#[tokio::test]
async fn test_counters_survive_reconnect() {
    let (manager, _adapter, mut peer, _first) = connected(fast_settings(64)).await;

    manager.send(b"one").await.unwrap();
    manager.connect(PEER).await.unwrap();
    let _second = peer.accept().await.unwrap();
    manager.send(b"two!").await.unwrap();

    assert_eq!(manager.bytes_sent(), 7);
}
