//! Frame type combining header and payload.
//!
//! A `Frame` is the transport-layer packet: a 16-byte raw binary header plus
//! variable-length payload bytes (already CBOR-encoded). This is a pure data
//! holder; for high-level logic see [`Payload::into_frame`] and
//! [`Payload::from_frame`].
//!
//! [`Payload::into_frame`]: crate::Payload::into_frame
//! [`Payload::from_frame`]: crate::Payload::from_frame

use bytes::{BufMut, Bytes};

use crate::{
    FrameHeader,
    errors::{ProtocolError, Result},
};

/// Complete protocol frame.
///
/// Layout on the wire: `[FrameHeader: 16 bytes] + [payload: variable bytes]`.
///
/// # Invariants
///
/// - `payload.len()` matches `header.payload_size()`; enforced by
///   [`Frame::new`] and verified by [`Frame::decode`].
/// - `payload.len()` never exceeds [`FrameHeader::MAX_PAYLOAD_SIZE`];
///   enforced during encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header (16 bytes)
    pub header: FrameHeader,

    /// Raw payload bytes (already CBOR-encoded)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with automatic `payload_size` calculation.
    ///
    /// The header's size field is always set to the actual payload length,
    /// so a frame with mismatched header and payload cannot be constructed.
    #[must_use]
    pub fn new(mut header: FrameHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // Payload length fits in u32: Bytes is bounded by isize::MAX and the
        // protocol limit is 64 KB.
        header.payload_size = (payload.len() as u32).to_be_bytes();

        Self { header, payload }
    }

    /// Encode the frame into a buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if the payload exceeds
    ///   [`FrameHeader::MAX_PAYLOAD_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        if self.payload.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Decode a frame from a buffer containing header and payload.
    ///
    /// # Errors
    ///
    /// - any [`FrameHeader::from_bytes`] error
    /// - `ProtocolError::PayloadSizeMismatch` if the buffer holds fewer
    ///   payload bytes than the header claims
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = *FrameHeader::from_bytes(bytes)?;

        let claimed = header.payload_size() as usize;
        let available = bytes.len() - FrameHeader::SIZE;

        if available != claimed {
            return Err(ProtocolError::PayloadSizeMismatch { claimed, actual: available });
        }

        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..]);

        Ok(Self { header, payload })
    }

    /// Total encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opcode;

    #[test]
    fn frame_round_trip() {
        let frame = Frame::new(FrameHeader::new(Opcode::Ping), Bytes::new());

        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), frame.encoded_len());

        let decoded = Frame::decode(&buf).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn frame_with_payload_round_trip() {
        let frame = Frame::new(FrameHeader::new(Opcode::SubmitAnswer), &b"payload bytes"[..]);
        assert_eq!(frame.header.payload_size(), 13);

        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();

        let decoded = Frame::decode(&buf).unwrap();
        assert_eq!(decoded.payload, frame.payload);
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let frame = Frame::new(FrameHeader::new(Opcode::SubmitAnswer), &b"some payload"[..]);

        let mut buf = Vec::new();
        frame.encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);

        let result = Frame::decode(&buf);
        assert!(matches!(result, Err(ProtocolError::PayloadSizeMismatch { .. })));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let big = vec![0u8; FrameHeader::MAX_PAYLOAD_SIZE as usize + 1];
        let frame = Frame::new(FrameHeader::new(Opcode::SubmitAnswer), big);

        let mut buf = Vec::new();
        assert!(matches!(frame.encode(&mut buf), Err(ProtocolError::PayloadTooLarge { .. })));
    }
}
