//! Property-based tests for frame encoding/decoding.
//!
//! These verify that serialization is correct for all valid inputs, not just
//! specific examples.

use bytes::Bytes;
use proptest::prelude::*;
use songclash_proto::{Frame, FrameHeader, Opcode};

/// Strategy for generating arbitrary opcodes
fn arbitrary_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::Hello),
        Just(Opcode::HelloReply),
        Just(Opcode::Goodbye),
        Just(Opcode::Ping),
        Just(Opcode::Pong),
        Just(Opcode::CreateRoom),
        Just(Opcode::JoinRoom),
        Just(Opcode::LeaveRoom),
        Just(Opcode::ToggleReady),
        Just(Opcode::SubmitAnswer),
        Just(Opcode::SnapshotRequest),
        Just(Opcode::UserList),
        Just(Opcode::UserReady),
        Just(Opcode::RoundStart),
        Just(Opcode::RoundEnd),
        Just(Opcode::GameEnd),
        Just(Opcode::Snapshot),
        Just(Opcode::Error),
    ]
}

/// Strategy for generating arbitrary frame headers
fn arbitrary_header() -> impl Strategy<Value = FrameHeader> {
    (arbitrary_opcode(), any::<u32>()).prop_map(|(opcode, request_id)| {
        let mut header = FrameHeader::new(opcode);
        header.set_request_id(request_id);
        header
    })
}

/// Strategy for generating arbitrary frames with payloads
fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (arbitrary_header(), prop::collection::vec(any::<u8>(), 0..1024))
        .prop_map(|(header, payload)| Frame::new(header, Bytes::from(payload)))
}

#[test]
fn prop_frame_encode_decode_roundtrip() {
    proptest!(|(frame in arbitrary_frame())| {
        let mut buf = Vec::new();
        frame.encode(&mut buf).expect("encode should succeed");

        let decoded = Frame::decode(&buf).expect("decode should succeed");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decoded.header, frame.header, "Header mismatch after round-trip");
        prop_assert_eq!(decoded.payload, frame.payload, "Payload content mismatch");
    });
}

#[test]
fn prop_header_roundtrip() {
    proptest!(|(header in arbitrary_header())| {
        let bytes = header.to_bytes();
        let decoded = FrameHeader::from_bytes(&bytes).expect("from_bytes should succeed");

        prop_assert_eq!(decoded.opcode(), header.opcode(), "Opcode mismatch");
        prop_assert_eq!(decoded.request_id(), header.request_id(), "Request id mismatch");
        prop_assert_eq!(decoded.payload_size(), header.payload_size(), "Payload size mismatch");
    });
}

#[test]
fn prop_frame_encoded_size_correct() {
    proptest!(|(frame in arbitrary_frame())| {
        let mut buf = Vec::new();
        frame.encode(&mut buf).expect("encode should succeed");

        // PROPERTY: Encoded size must equal header size + payload size
        prop_assert_eq!(buf.len(), FrameHeader::SIZE + frame.payload.len());
        prop_assert_eq!(buf.len(), frame.encoded_len());
    });
}

#[test]
fn prop_truncated_frames_rejected() {
    proptest!(|(frame in arbitrary_frame(), cut in 1usize..16)| {
        let mut buf = Vec::new();
        frame.encode(&mut buf).expect("encode should succeed");

        let keep = buf.len().saturating_sub(cut);
        // PROPERTY: Any truncation must fail decoding, never mis-parse
        prop_assert!(Frame::decode(&buf[..keep]).is_err());
    });
}
