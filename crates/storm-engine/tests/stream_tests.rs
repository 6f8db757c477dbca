mod support;

use std::time::Duration;
use storm_engine::engine::stream::{ResetConnection, StreamIdAllocator};
use storm_engine::parser::h2frame::MAX_STREAM_ID;
use storm_engine::StreamError;
use support::{drain, RawFrame, HEADERS, RST_STREAM, SETTINGS};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const IO_TIMEOUT: Duration = Duration::from_secs(2);

#[test]
fn test_allocator_yields_increasing_odd_ids() {
    let mut ids = StreamIdAllocator::new();
    let got: Vec<u32> = (0..4).map(|_| ids.allocate().unwrap()).collect();
    assert_eq!(got, vec![1, 3, 5, 7]);
}

#[test]
fn test_claiming_old_id_fails_fast() {
    let mut ids = StreamIdAllocator::new();
    ids.claim(5).unwrap();

    assert!(matches!(ids.claim(3), Err(StreamError::StreamIdReuse { id: 3, last: 5 })));
    assert!(matches!(ids.claim(5), Err(StreamError::StreamIdReuse { id: 5, last: 5 })));
    ids.claim(9).unwrap();
    assert_eq!(ids.last_sent(), 9);
    assert_eq!(ids.allocate().unwrap(), 11);
}

#[test]
fn test_allocator_exhaustion() {
    let mut ids = StreamIdAllocator::new();
    ids.claim(MAX_STREAM_ID).unwrap();
    assert!(matches!(ids.allocate(), Err(StreamError::StreamIdExhausted)));
}

#[tokio::test]
async fn test_streams_are_opened_then_reset() {
    let (addr, mut frames) = support::spawn_h2_collector(Vec::new()).await;
    let mut conn = ResetConnection::connect(&support::target(addr), IO_TIMEOUT)
        .await
        .unwrap();
    let stop = CancellationToken::new();

    let mut seen = Vec::new();
    let n = conn
        .run_streams(5, Duration::from_millis(1), Some("TestBot/1.0"), &stop, |id| seen.push(id))
        .await
        .unwrap();
    assert_eq!(n, 5);
    assert_eq!(seen, vec![1, 3, 5, 7, 9]);
    assert_eq!(conn.last_stream_id(), 9);
    conn.close().await;
    sleep(Duration::from_millis(100)).await;

    let frames: Vec<RawFrame> = drain(&mut frames);
    // Client SETTINGS first, then strictly alternating HEADERS / RST_STREAM.
    assert_eq!(frames[0].kind, SETTINGS);
    let streams: Vec<&RawFrame> = frames
        .iter()
        .filter(|f| f.kind == HEADERS || f.kind == RST_STREAM)
        .collect();
    assert_eq!(streams.len(), 10);
    for (i, pair) in streams.chunks(2).enumerate() {
        let id = 2 * i as u32 + 1;
        assert_eq!(pair[0].kind, HEADERS);
        assert_eq!(pair[0].stream_id, id);
        assert_eq!(pair[1].kind, RST_STREAM);
        assert_eq!(pair[1].stream_id, id);
        assert_eq!(pair[1].payload, vec![0, 0, 0, 8]);
    }
}

#[tokio::test]
async fn test_reused_stream_id_is_rejected_before_writing() {
    let (addr, mut frames) = support::spawn_h2_collector(Vec::new()).await;
    let mut conn = ResetConnection::connect(&support::target(addr), IO_TIMEOUT)
        .await
        .unwrap();

    let id = conn.open_stream("/a", None).await.unwrap();
    let err = conn.send_headers(id, "/b", None).await.unwrap_err();
    assert!(matches!(err, StreamError::StreamIdReuse { .. }));
    conn.close().await;
    sleep(Duration::from_millis(100)).await;

    let headers = drain(&mut frames)
        .into_iter()
        .filter(|f| f.kind == HEADERS)
        .count();
    assert_eq!(headers, 1);
}

#[tokio::test]
async fn test_server_settings_are_acknowledged() {
    let (addr, mut frames) = support::spawn_h2_collector(support::server_settings()).await;
    let mut conn = ResetConnection::connect(&support::target(addr), IO_TIMEOUT)
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let stop = CancellationToken::new();
    conn.run_streams(2, Duration::from_millis(1), None, &stop, |_| {})
        .await
        .unwrap();
    conn.close().await;
    sleep(Duration::from_millis(100)).await;

    let acked = drain(&mut frames)
        .iter()
        .any(|f| f.kind == SETTINGS && f.flags & 0x1 == 0x1);
    assert!(acked);
}

#[tokio::test]
async fn test_goaway_closes_connection() {
    let (addr, _frames) = support::spawn_h2_collector(support::server_goaway()).await;
    let mut conn = ResetConnection::connect(&support::target(addr), IO_TIMEOUT)
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;

    assert!(conn.is_closed());
    assert!(matches!(
        conn.open_stream("/a", None).await,
        Err(StreamError::ConnectionClosed)
    ));

    let stop = CancellationToken::new();
    let n = conn
        .run_streams(10, Duration::from_millis(1), None, &stop, |_| {})
        .await
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_stopped_before_start_opens_nothing() {
    let (addr, _frames) = support::spawn_h2_collector(Vec::new()).await;
    let mut conn = ResetConnection::connect(&support::target(addr), IO_TIMEOUT)
        .await
        .unwrap();
    let stop = CancellationToken::new();
    stop.cancel();

    let n = conn
        .run_streams(100, Duration::from_millis(1), None, &stop, |_| {})
        .await
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(conn.last_stream_id(), 0);
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let addr = support::unused_addr().await;
    let res = ResetConnection::connect(&support::target(addr), IO_TIMEOUT).await;
    assert!(matches!(res, Err(StreamError::Io(_))));
}
