//! Wire-level round trips through the serializer and the parser.

use bytes::BytesMut;
use stomp_core::{AckMode, Frame, FrameParser, HeartBeat, StompVersion, ToServer};

fn serialize(frame: &Frame, version: StompVersion) -> Vec<u8> {
    let mut buffer = BytesMut::new();
    frame.serialize(version, &mut buffer).unwrap();
    buffer.to_vec()
}

fn parse_one(version: StompVersion, bytes: &[u8]) -> Frame {
    let mut parser = FrameParser::new(version);
    parser.push(bytes);
    let frame = parser.next().unwrap().expect("a complete frame");
    assert!(parser.next().unwrap().is_none(), "leftover frames");
    frame
}

#[test]
fn send_round_trip_matches_the_documented_bytes() {
    let frame = Frame::new("SEND")
        .header("destination", "/queue/a")
        .header("content-length", "5")
        .with_body(*b"hello");
    let wire = serialize(&frame, StompVersion::V1_2);
    assert_eq!(wire, b"SEND\ndestination:/queue/a\ncontent-length:5\n\nhello\0");
    assert_eq!(parse_one(StompVersion::V1_2, &wire), frame);
}

#[test]
fn escaped_header_survives_the_round_trip() {
    let value = "a:b\nc\r\\";
    let frame = Frame::new("MESSAGE")
        .header("destination", "/queue/a")
        .header("message-id", "m-1")
        .header("subscription", "s-1")
        .header("weird", value);
    let wire = serialize(&frame, StompVersion::V1_2);
    let wire_text = String::from_utf8_lossy(&wire);
    assert!(wire_text.contains("weird:a\\cb\\nc\\r\\\\"), "{wire_text}");
    assert_eq!(parse_one(StompVersion::V1_2, &wire), frame);
}

#[test]
fn command_built_frames_round_trip_on_every_version() {
    for version in [StompVersion::V1_0, StompVersion::V1_1, StompVersion::V1_2] {
        let commands = vec![
            ToServer::Connect {
                host: Some("broker".into()),
                login: Some("user".into()),
                passcode: Some("secret".into()),
                heart_beat: HeartBeat::new(1000, 1000),
            },
            ToServer::Send {
                destination: "/queue/a".into(),
                transaction: None,
                headers: vec![("priority".into(), "9".into())],
                body: b"payload".to_vec(),
                receipt: Some("r-1".into()),
            },
            ToServer::Subscribe {
                destination: "/topic/t".into(),
                id: Some("s-1".into()),
                ack: AckMode::Client,
                headers: Vec::new(),
                receipt: None,
            },
            ToServer::Begin {
                transaction: "tx-1".into(),
                receipt: None,
            },
            ToServer::Disconnect {
                receipt: Some("r-2".into()),
            },
        ];
        for command in commands {
            let frame = command.to_frame(version).unwrap();
            let wire = serialize(&frame, version);
            assert_eq!(
                parse_one(version, &wire),
                frame,
                "{version}: {}",
                frame.command
            );
        }
    }
}

#[test]
fn concatenated_frames_parse_in_order_under_any_chunking() {
    let frames = vec![
        Frame::new("SEND")
            .header("destination", "/queue/a")
            .header("content-length", "3")
            .with_body(*b"one"),
        Frame::new("SEND")
            .header("destination", "/queue/b")
            .with_body(*b"two"),
        Frame::new("RECEIPT").header("receipt-id", "r-9"),
    ];
    let mut wire = Vec::new();
    for frame in &frames {
        wire.extend_from_slice(&serialize(frame, StompVersion::V1_2));
    }

    for chunk_size in [1, 2, 3, 7, wire.len()] {
        let mut parser = FrameParser::new(StompVersion::V1_2);
        let mut decoded = Vec::new();
        for chunk in wire.chunks(chunk_size) {
            parser.push(chunk);
            while let Some(frame) = parser.next().unwrap() {
                decoded.push(frame);
            }
        }
        assert_eq!(decoded, frames, "chunk size {chunk_size}");
    }
}

#[test]
fn empty_body_with_and_without_declared_length() {
    let with = Frame::new("SEND")
        .header("destination", "/queue/a")
        .header("content-length", "0");
    let without = Frame::new("SEND").header("destination", "/queue/a");
    for frame in [with, without] {
        let wire = serialize(&frame, StompVersion::V1_2);
        let parsed = parse_one(StompVersion::V1_2, &wire);
        assert_eq!(parsed, frame);
        assert!(parsed.body.is_empty());
    }
}

#[test]
fn nul_bytes_in_the_body_require_a_length() {
    // with a declared length the NUL is payload
    let sized = Frame::new("SEND")
        .header("destination", "/queue/a")
        .header("content-length", "7")
        .with_body(*b"a\0b\0c\0d");
    let wire = serialize(&sized, StompVersion::V1_2);
    assert_eq!(parse_one(StompVersion::V1_2, &wire).body, b"a\0b\0c\0d");

    // without one, the first NUL terminates the frame
    let mut parser = FrameParser::new(StompVersion::V1_2);
    parser.push(b"SEND\ndestination:/queue/a\n\na\0");
    assert_eq!(parser.next().unwrap().unwrap().body, b"a");
}

#[test]
fn repeated_headers_keep_wire_order_and_first_wins() {
    let wire = b"MESSAGE\ndestination:/queue/a\nmessage-id:m-1\nsubscription:s-1\nfoo:bar1\nfoo:bar2\n\n\0";
    let frame = parse_one(StompVersion::V1_2, wire);
    assert_eq!(frame.get_header("foo"), Some("bar1"));
    assert_eq!(serialize(&frame, StompVersion::V1_2), wire);
}

#[test]
fn heart_beats_between_frames_are_reported_in_sequence() {
    let mut parser = FrameParser::new(StompVersion::V1_2);
    parser.push(b"RECEIPT\nreceipt-id:r-1\n\n\0\nRECEIPT\nreceipt-id:r-2\n\n\0");
    assert_eq!(parser.next().unwrap().unwrap().command, "RECEIPT");
    assert!(parser.next().unwrap().unwrap().is_heart_beat());
    assert_eq!(
        parser.next().unwrap().unwrap().get_header("receipt-id"),
        Some("r-2")
    );
}
