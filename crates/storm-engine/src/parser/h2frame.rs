//! Minimal HTTP/2 framing (RFC 9113) and HPACK literal encoding (RFC 7541).
//!
//! Only what a client needs to open and cancel streams on a prior-knowledge
//! connection: the preface, SETTINGS, HEADERS, RST_STREAM, PING ACK, and
//! frame header decoding for the read side. Header blocks use static-table
//! indices and non-Huffman literals, so no dynamic table state is kept.

use bytes::{BufMut, BytesMut};

pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";
pub const FRAME_HEADER_LEN: usize = 9;
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16_384;
pub const MAX_STREAM_ID: u32 = (1 << 31) - 1;

pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;

pub const SETTINGS_ENABLE_PUSH: u16 = 0x2;

pub const ERROR_CANCEL: u32 = 0x8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Data,
    Headers,
    Priority,
    RstStream,
    Settings,
    PushPromise,
    Ping,
    GoAway,
    WindowUpdate,
    Continuation,
    Unknown(u8),
}

impl FrameType {
    pub fn from_u8(b: u8) -> Self {
        match b {
            0x0 => FrameType::Data,
            0x1 => FrameType::Headers,
            0x2 => FrameType::Priority,
            0x3 => FrameType::RstStream,
            0x4 => FrameType::Settings,
            0x5 => FrameType::PushPromise,
            0x6 => FrameType::Ping,
            0x7 => FrameType::GoAway,
            0x8 => FrameType::WindowUpdate,
            0x9 => FrameType::Continuation,
            other => FrameType::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Data => 0x0,
            FrameType::Headers => 0x1,
            FrameType::Priority => 0x2,
            FrameType::RstStream => 0x3,
            FrameType::Settings => 0x4,
            FrameType::PushPromise => 0x5,
            FrameType::Ping => 0x6,
            FrameType::GoAway => 0x7,
            FrameType::WindowUpdate => 0x8,
            FrameType::Continuation => 0x9,
            FrameType::Unknown(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: usize,
    pub kind: FrameType,
    pub flags: u8,
    pub stream_id: u32,
}

/// Decode the 9-byte frame header.
///
/// Returns Err("Incomplete") when fewer than 9 bytes are available.
pub fn decode_frame_header(buf: &[u8]) -> Result<FrameHeader, &'static str> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err("Incomplete");
    }
    let length = (usize::from(buf[0]) << 16) | (usize::from(buf[1]) << 8) | usize::from(buf[2]);
    let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & MAX_STREAM_ID;
    Ok(FrameHeader {
        length,
        kind: FrameType::from_u8(buf[3]),
        flags: buf[4],
        stream_id,
    })
}

pub fn encode_frame_header(buf: &mut BytesMut, length: usize, kind: FrameType, flags: u8, stream_id: u32) {
    buf.put_u8((length >> 16) as u8);
    buf.put_u8((length >> 8) as u8);
    buf.put_u8(length as u8);
    buf.put_u8(kind.as_u8());
    buf.put_u8(flags);
    buf.put_u32(stream_id & MAX_STREAM_ID);
}

pub fn encode_settings(buf: &mut BytesMut, settings: &[(u16, u32)]) {
    encode_frame_header(buf, settings.len() * 6, FrameType::Settings, 0, 0);
    for &(id, value) in settings {
        buf.put_u16(id);
        buf.put_u32(value);
    }
}

pub fn encode_settings_ack(buf: &mut BytesMut) {
    encode_frame_header(buf, 0, FrameType::Settings, FLAG_ACK, 0);
}

pub fn encode_ping_ack(buf: &mut BytesMut, payload: &[u8; 8]) {
    encode_frame_header(buf, 8, FrameType::Ping, FLAG_ACK, 0);
    buf.put_slice(payload);
}

/// HEADERS frame carrying a complete header block.
pub fn encode_headers(buf: &mut BytesMut, stream_id: u32, block: &[u8], end_stream: bool) {
    let mut flags = FLAG_END_HEADERS;
    if end_stream {
        flags |= FLAG_END_STREAM;
    }
    encode_frame_header(buf, block.len(), FrameType::Headers, flags, stream_id);
    buf.put_slice(block);
}

pub fn encode_rst_stream(buf: &mut BytesMut, stream_id: u32, error_code: u32) {
    encode_frame_header(buf, 4, FrameType::RstStream, 0, stream_id);
    buf.put_u32(error_code);
}

/// Error code carried by a GOAWAY payload, if the payload is long enough.
pub fn goaway_error_code(payload: &[u8]) -> Option<u32> {
    payload
        .get(4..8)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

// HPACK static table indices used below.
const IDX_AUTHORITY: usize = 1;
const IDX_METHOD_GET: usize = 2;
const IDX_PATH: usize = 4;
const IDX_SCHEME_HTTP: usize = 6;
const IDX_USER_AGENT: usize = 58;

/// Encode an HPACK integer with an N-bit prefix, OR-ing `first` into the first byte.
pub fn encode_integer(buf: &mut BytesMut, mut value: usize, prefix_bits: u8, first: u8) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        buf.put_u8(first | value as u8);
        return;
    }
    buf.put_u8(first | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        buf.put_u8((value % 128 + 128) as u8);
        value /= 128;
    }
    buf.put_u8(value as u8);
}

fn encode_string(buf: &mut BytesMut, s: &str) {
    encode_integer(buf, s.len(), 7, 0x00);
    buf.put_slice(s.as_bytes());
}

/// Literal header field without indexing, name taken from the static table.
fn encode_literal_indexed_name(buf: &mut BytesMut, index: usize, value: &str) {
    encode_integer(buf, index, 4, 0x00);
    encode_string(buf, value);
}

/// Header block for `GET http://{authority}{path}`.
pub fn encode_request_block(authority: &str, path: &str, user_agent: Option<&str>) -> BytesMut {
    let mut block = BytesMut::with_capacity(32 + authority.len() + path.len());
    encode_integer(&mut block, IDX_METHOD_GET, 7, 0x80);
    encode_integer(&mut block, IDX_SCHEME_HTTP, 7, 0x80);
    encode_literal_indexed_name(&mut block, IDX_PATH, path);
    encode_literal_indexed_name(&mut block, IDX_AUTHORITY, authority);
    if let Some(agent) = user_agent {
        encode_literal_indexed_name(&mut block, IDX_USER_AGENT, agent);
    }
    block
}
