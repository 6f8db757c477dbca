#![allow(dead_code)]

use bytes::Bytes;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storm_common::TransportConfig;
use storm_engine::bots::BotContext;
use storm_engine::engine::aggregator::MetricsAggregator;
use storm_engine::engine::profile::IntensityProfile;
use storm_engine::engine::simulator::build_client;
use storm_engine::engine::target::Target;
use storm_engine::events::EventLog;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const STREAM_CHUNKS: u64 = 25;

/// Local HTTP server (HTTP/1.1 and prior-knowledge HTTP/2). Every path answers
/// a small JSON body after `delay`; `/streaming` sends `STREAM_CHUNKS` chunks
/// 10ms apart and ends.
pub async fn spawn_http_server(delay: Duration) -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    let make_svc = make_service_fn(move |_conn| {
        let counter = Arc::clone(&counter);
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if req.uri().path() == "/streaming" {
                        let (mut tx, body) = Body::channel();
                        tokio::spawn(async move {
                            for i in 0..STREAM_CHUNKS {
                                let chunk = Bytes::from(format!("chunk {}\n", i));
                                if tx.send_data(chunk).await.is_err() {
                                    return;
                                }
                                tokio::time::sleep(Duration::from_millis(10)).await;
                            }
                        });
                        return Ok::<_, Infallible>(Response::new(body));
                    }
                    tokio::time::sleep(delay).await;
                    let body = format!(r#"{{"timestamp":"now","path":"{}"}}"#, req.uri().path());
                    Ok(Response::new(Body::from(body)))
                }
            }))
        }
    });

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
    let addr = server.local_addr();
    tokio::spawn(server);
    (addr, hits)
}

/// Accepts connections and never writes a byte back.
pub async fn spawn_silent_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}

/// Address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Vec<u8>,
}

pub const HEADERS: u8 = 0x1;
pub const RST_STREAM: u8 = 0x3;
pub const SETTINGS: u8 = 0x4;
pub const GOAWAY: u8 = 0x7;

/// Raw HTTP/2 peer. For every accepted connection it writes `greeting`,
/// checks the client preface, then forwards each frame it reads.
pub async fn spawn_h2_collector(greeting: Vec<u8>) -> (SocketAddr, mpsc::UnboundedReceiver<RawFrame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            let greeting = greeting.clone();
            tokio::spawn(async move {
                if socket.write_all(&greeting).await.is_err() {
                    return;
                }
                let mut preface = [0u8; 24];
                if socket.read_exact(&mut preface).await.is_err() {
                    return;
                }
                assert_eq!(&preface, b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");

                let mut header = [0u8; 9];
                while socket.read_exact(&mut header).await.is_ok() {
                    let length = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
                    let mut payload = vec![0u8; length];
                    if socket.read_exact(&mut payload).await.is_err() {
                        return;
                    }
                    let stream_id = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7FFF_FFFF;
                    let frame = RawFrame {
                        kind: header[3],
                        flags: header[4],
                        stream_id,
                        payload,
                    };
                    if tx.send(frame).is_err() {
                        return;
                    }
                }
            });
        }
    });
    (addr, rx)
}

/// Empty server SETTINGS frame.
pub fn server_settings() -> Vec<u8> {
    vec![0, 0, 0, SETTINGS, 0, 0, 0, 0, 0]
}

/// GOAWAY with last stream id 0 and NO_ERROR.
pub fn server_goaway() -> Vec<u8> {
    vec![0, 0, 8, GOAWAY, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
}

pub fn drain(rx: &mut mpsc::UnboundedReceiver<RawFrame>) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

pub fn target(addr: SocketAddr) -> Target {
    Target::new("local", &format!("http://{}", addr)).unwrap()
}

pub fn targets(addr: SocketAddr) -> Arc<[Target]> {
    vec![target(addr)].into()
}

pub fn profile(concurrency: usize, rate: u32, duration: Duration, reset_probability: f64) -> IntensityProfile {
    IntensityProfile::new(
        "test",
        concurrency,
        rate,
        duration,
        reset_probability,
        vec!["/api/fast".to_string(), "/api/medium".to_string()],
        vec!["TestBot/1.0".to_string()],
    )
    .unwrap()
}

pub fn context(events: EventLog) -> BotContext {
    BotContext {
        client: build_client(&TransportConfig::default()),
        aggregator: Arc::new(MetricsAggregator::new()),
        events,
        seed: Some(7),
    }
}
