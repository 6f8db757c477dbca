use bytes::BytesMut;
use storm_engine::parser::h2frame::{
    decode_frame_header, encode_headers, encode_integer, encode_request_block, encode_rst_stream,
    encode_settings, encode_settings_ack, goaway_error_code, FrameType, ERROR_CANCEL, FLAG_ACK,
    FLAG_END_HEADERS, FLAG_END_STREAM, SETTINGS_ENABLE_PUSH,
};

#[test]
fn test_decode_frame_header() {
    let raw = [0x00, 0x00, 0x04, 0x03, 0x00, 0x80, 0x00, 0x00, 0x05];
    let head = decode_frame_header(&raw).unwrap();

    assert_eq!(head.length, 4);
    assert_eq!(head.kind, FrameType::RstStream);
    assert_eq!(head.flags, 0);
    // Reserved bit is masked off.
    assert_eq!(head.stream_id, 5);
}

#[test]
fn test_decode_incomplete_header() {
    assert_eq!(decode_frame_header(&[0, 0, 1]), Err("Incomplete"));
}

#[test]
fn test_unknown_frame_type_is_preserved() {
    assert_eq!(FrameType::from_u8(0x2a), FrameType::Unknown(0x2a));
    assert_eq!(FrameType::Unknown(0x2a).as_u8(), 0x2a);
    assert_eq!(FrameType::from_u8(0x4), FrameType::Settings);
}

#[test]
fn test_settings_frames() {
    let mut buf = BytesMut::new();
    encode_settings(&mut buf, &[(SETTINGS_ENABLE_PUSH, 0)]);
    assert_eq!(&buf[..], &[0, 0, 6, 0x4, 0, 0, 0, 0, 0, 0x00, 0x02, 0, 0, 0, 0]);

    let mut ack = BytesMut::new();
    encode_settings_ack(&mut ack);
    assert_eq!(&ack[..], &[0, 0, 0, 0x4, FLAG_ACK, 0, 0, 0, 0]);
}

#[test]
fn test_rst_stream_frame() {
    let mut buf = BytesMut::new();
    encode_rst_stream(&mut buf, 7, ERROR_CANCEL);
    assert_eq!(&buf[..], &[0, 0, 4, 0x3, 0, 0, 0, 0, 7, 0, 0, 0, 8]);
}

#[test]
fn test_headers_frame_flags() {
    let mut buf = BytesMut::new();
    encode_headers(&mut buf, 3, &[0x82, 0x86], true);
    let head = decode_frame_header(&buf).unwrap();

    assert_eq!(head.kind, FrameType::Headers);
    assert_eq!(head.length, 2);
    assert_eq!(head.flags, FLAG_END_HEADERS | FLAG_END_STREAM);
    assert_eq!(head.stream_id, 3);
    assert_eq!(&buf[9..], &[0x82, 0x86]);

    let mut open = BytesMut::new();
    encode_headers(&mut open, 5, &[0x82], false);
    assert_eq!(decode_frame_header(&open).unwrap().flags, FLAG_END_HEADERS);
}

#[test]
fn test_hpack_integer_encoding() {
    // RFC 7541 C.1.1 and C.1.2.
    let mut small = BytesMut::new();
    encode_integer(&mut small, 10, 5, 0);
    assert_eq!(&small[..], &[10]);

    let mut large = BytesMut::new();
    encode_integer(&mut large, 1337, 5, 0);
    assert_eq!(&large[..], &[31, 154, 10]);

    let mut flagged = BytesMut::new();
    encode_integer(&mut flagged, 2, 7, 0x80);
    assert_eq!(&flagged[..], &[0x82]);
}

#[test]
fn test_request_block_layout() {
    let block = encode_request_block("h:1", "/x", Some("ua"));
    let expected: Vec<u8> = [
        &[0x82, 0x86][..],
        &[0x04, 0x02, b'/', b'x'],
        &[0x01, 0x03, b'h', b':', b'1'],
        &[0x0f, 0x2b, 0x02, b'u', b'a'],
    ]
    .concat();
    assert_eq!(&block[..], &expected[..]);

    let bare = encode_request_block("h:1", "/x", None);
    assert_eq!(bare.len(), expected.len() - 5);
}

#[test]
fn test_goaway_error_code() {
    let payload = [0, 0, 0, 9, 0, 0, 0, 0x2];
    assert_eq!(goaway_error_code(&payload), Some(2));
    assert_eq!(goaway_error_code(&payload[..6]), None);
}
