//! Length-prefixed frame codec (spec §4.1).
//!
//! The decoder consumes from an append-only, contiguous receive buffer and
//! leaves unconsumed bytes in place, periodically compacting once the
//! consumed prefix grows past a threshold — the "buffer strategy" called
//! out in the design notes, built on `bytes::BytesMut`.

use bytes::{Buf, BufMut, BytesMut};

use crate::errors::{Error, Result};

/// One length-prefixed protocol message read off (or destined for) the
/// wire. The startup and SSL-request frames have no `kind` byte.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: Option<u8>,
    pub payload: BytesMut,
}

impl Frame {
    pub fn tagged(kind: u8, payload: BytesMut) -> Self {
        Frame {
            kind: Some(kind),
            payload,
        }
    }

    pub fn untagged(payload: BytesMut) -> Self {
        Frame {
            kind: None,
            payload,
        }
    }
}

/// Once the consumed prefix exceeds this many bytes, `compact` relocates
/// the unread tail to the front of the buffer so it doesn't grow forever.
const COMPACT_THRESHOLD: usize = 64 * 1024;

/// Buffered frame decoder over a growing receive buffer.
pub struct Decoder {
    buf: BytesMut,
    consumed: usize,
    max_message_bytes: usize,
}

impl Decoder {
    pub fn new(max_message_bytes: usize) -> Self {
        Decoder {
            buf: BytesMut::with_capacity(8 * 1024),
            consumed: 0,
            max_message_bytes,
        }
    }

    /// Appends bytes just read from the socket.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn remaining(&self) -> &[u8] {
        &self.buf[self.consumed..]
    }

    fn compact_if_needed(&mut self) {
        if self.consumed >= COMPACT_THRESHOLD {
            let _ = self.buf.split_to(self.consumed);
            self.consumed = 0;
        }
    }

    /// Tries to decode one tagged frame (`kind` byte + `int32` length +
    /// payload) from the buffer. Returns `Ok(None)` if fewer than the
    /// declared bytes are present — "need more" without consuming.
    pub fn try_decode_tagged(&mut self) -> Result<Option<Frame>> {
        let remaining = self.remaining();
        if remaining.len() < 5 {
            return Ok(None);
        }
        let kind = remaining[0];
        let length = i32::from_be_bytes(remaining[1..5].try_into().unwrap());
        if length < 4 {
            return Err(Error::ProtocolViolation(format!(
                "frame declared length {length} is smaller than its own header"
            )));
        }
        let total_len = length as usize; // includes the 4 length bytes, not the kind byte
        if total_len - 4 > self.max_message_bytes {
            return Err(Error::MessageTooLarge(total_len - 4));
        }
        if remaining.len() < 1 + total_len {
            return Ok(None);
        }
        let payload = BytesMut::from(&remaining[5..1 + total_len]);
        self.consumed += 1 + total_len;
        self.compact_if_needed();
        Ok(Some(Frame::tagged(kind, payload)))
    }

    /// Tries to decode one untagged frame (`int32` length + payload), as
    /// used for the startup packet, `SSLRequest` and `CancelRequest`.
    pub fn try_decode_untagged(&mut self) -> Result<Option<Frame>> {
        let remaining = self.remaining();
        if remaining.len() < 4 {
            return Ok(None);
        }
        let length = i32::from_be_bytes(remaining[0..4].try_into().unwrap());
        if length < 4 {
            return Err(Error::ProtocolViolation(format!(
                "frame declared length {length} is smaller than its own header"
            )));
        }
        let total_len = length as usize;
        if total_len - 4 > self.max_message_bytes {
            return Err(Error::MessageTooLarge(total_len - 4));
        }
        if remaining.len() < total_len {
            return Ok(None);
        }
        let payload = BytesMut::from(&remaining[4..total_len]);
        self.consumed += total_len;
        self.compact_if_needed();
        Ok(Some(Frame::untagged(payload)))
    }
}

/// Cursor-style payload reader enforcing that every field stays within the
/// frame boundary (spec §4.1's field-accessor invariants).
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        PayloadReader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.need(2)?;
        let v = i16::from_be_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.need(4)?;
        let v = i32::from_be_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Reads a NUL-terminated UTF-8 string. Errors if the terminator isn't
    /// found within the remaining payload.
    pub fn read_cstr(&mut self) -> Result<String> {
        let tail = &self.buf[self.pos..];
        let nul = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::ProtocolViolation("unterminated string".into()))?;
        let s = std::str::from_utf8(&tail[..nul])
            .map_err(|_| Error::ProtocolViolation("non-UTF-8 string".into()))?
            .to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    /// Reads exactly `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n)?;
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Reads a length-prefixed value: `int32` length (-1 = NULL) followed
    /// by that many bytes.
    pub fn read_sized_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.read_bytes(len as usize)?))
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            Err(Error::ProtocolViolation(
                "field read past end of message".into(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Writes a tagged backend message, patching its length after the payload
/// is written so `declared_length == 4 + payload_bytes_written` exactly
/// (spec §4.1's encoder invariant).
pub fn encode_tagged(kind: u8, write: impl FnOnce(&mut BytesMut)) -> BytesMut {
    let mut out = BytesMut::with_capacity(32);
    out.put_u8(kind);
    let len_pos = out.len();
    out.put_i32(0);
    write(&mut out);
    let payload_len = (out.len() - len_pos) as i32;
    out[len_pos..len_pos + 4].copy_from_slice(&payload_len.to_be_bytes());
    out
}

pub fn put_cstr(out: &mut BytesMut, s: &str) {
    out.put_slice(s.as_bytes());
    out.put_u8(0);
}

pub fn put_sized_bytes(out: &mut BytesMut, bytes: Option<&[u8]>) {
    match bytes {
        None => out.put_i32(-1),
        Some(b) => {
            out.put_i32(b.len() as i32);
            out.put_slice(b);
        }
    }
}

pub fn advance_discard(buf: &mut BytesMut, n: usize) {
    buf.advance(n.min(buf.len()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_tagged_frame() {
        let mut decoder = Decoder::new(1024 * 1024);
        let encoded = encode_tagged(b'Q', |out| put_cstr(out, "SELECT 1"));
        decoder.push_bytes(&encoded);
        let frame = decoder.try_decode_tagged().unwrap().unwrap();
        assert_eq!(frame.kind, Some(b'Q'));
        let mut reader = PayloadReader::new(&frame.payload);
        assert_eq!(reader.read_cstr().unwrap(), "SELECT 1");
    }

    #[test]
    fn declared_length_matches_written_bytes() {
        let encoded = encode_tagged(b'C', |out| put_cstr(out, "SELECT 1"));
        let declared = i32::from_be_bytes(encoded[1..5].try_into().unwrap()) as usize;
        assert_eq!(declared, encoded.len() - 1);
    }

    #[test]
    fn partial_frame_yields_none_without_consuming() {
        let mut decoder = Decoder::new(1024);
        let encoded = encode_tagged(b'Q', |out| put_cstr(out, "SELECT 1"));
        decoder.push_bytes(&encoded[..encoded.len() - 1]);
        assert!(decoder.try_decode_tagged().unwrap().is_none());
        decoder.push_bytes(&encoded[encoded.len() - 1..]);
        assert!(decoder.try_decode_tagged().unwrap().is_some());
    }

    #[test]
    fn oversize_frame_is_rejected_before_allocation() {
        let mut decoder = Decoder::new(8);
        let encoded = encode_tagged(b'Q', |out| put_cstr(out, "SELECT 1, 2, 3, 4, 5"));
        decoder.push_bytes(&encoded);
        let err = decoder.try_decode_tagged().unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge(_)));
    }

    #[test]
    fn unterminated_string_is_a_protocol_violation() {
        let mut payload = BytesMut::new();
        payload.put_slice(b"no terminator");
        let mut reader = PayloadReader::new(&payload);
        assert!(reader.read_cstr().is_err());
    }
}
