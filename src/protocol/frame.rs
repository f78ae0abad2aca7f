//! WebSocket frame header layout and in-memory frame encoding (RFC 6455).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                Masking key (if MASK is set)                   |
//! +---------------------------------------------------------------+
//! |                         Payload data                          |
//! +---------------------------------------------------------------+
//! ```
//!
//! No extension is ever negotiated, so the upper nibble of the first byte
//! must be exactly `0000` (more fragments follow) or `1000` (final).

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask_fast;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Largest length expressible in the 7-bit field.
const MAX_SHORT_LEN: usize = 125;

/// Largest length expressible in the 16-bit extended field.
const MAX_MEDIUM_LEN: usize = 65535;

/// What the two fixed header bytes say about a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPrefix {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// A 4-byte masking key follows the length.
    pub masked: bool,
    /// Raw 7-bit length field (126 and 127 announce an extended length).
    pub len7: u8,
}

impl HeaderPrefix {
    /// Decode the two fixed header bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the flag nibble is neither `0000` nor
    /// `1000`, or if the opcode is reserved.
    pub fn parse(byte0: u8, byte1: u8) -> Result<Self> {
        let fin = match byte0 >> 4 {
            0b0000 => false,
            0b1000 => true,
            other => {
                return Err(Error::Protocol(format!(
                    "Received broken header 4bit value: {other:04b}"
                )));
            }
        };

        Ok(Self {
            fin,
            opcode: OpCode::from_u8(byte0 & 0x0F)?,
            masked: byte1 & 0x80 != 0,
            len7: byte1 & 0x7F,
        })
    }

    /// Number of extended length bytes that follow the fixed header.
    #[inline]
    #[must_use]
    pub const fn extended_len_size(&self) -> usize {
        match self.len7 {
            126 => 2,
            127 => 8,
            _ => 0,
        }
    }

    /// Resolve the payload length given the extended length bytes.
    ///
    /// `extended` must hold exactly [`extended_len_size`](Self::extended_len_size) bytes.
    #[must_use]
    pub fn payload_len(&self, extended: &[u8]) -> u64 {
        if extended.is_empty() {
            return u64::from(self.len7);
        }
        extended
            .iter()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
    }
}

/// Append a frame header to `buf`.
///
/// The length is encoded in 7 bits up to 125, as `126` plus 16 bits up to
/// 65535, and as `127` plus 64 bits above that.
pub fn write_header(
    buf: &mut BytesMut,
    fin: bool,
    opcode: OpCode,
    mask: Option<[u8; 4]>,
    payload_len: usize,
) {
    let mut byte0 = opcode.as_u8();
    if fin {
        byte0 |= 0x80;
    }
    buf.put_u8(byte0);

    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
    if payload_len <= MAX_SHORT_LEN {
        buf.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= MAX_MEDIUM_LEN {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(payload_len as u64);
    }

    if let Some(key) = mask {
        buf.put_slice(&key);
    }
}

/// Bytes needed for the header of a frame carrying `payload_len` bytes.
#[must_use]
pub const fn header_size(payload_len: usize, masked: bool) -> usize {
    let extended = if payload_len <= MAX_SHORT_LEN {
        0
    } else if payload_len <= MAX_MEDIUM_LEN {
        2
    } else {
        8
    };
    2 + extended + if masked { 4 } else { 0 }
}

/// A single WebSocket frame held in memory.
///
/// Frames are transient: the codec builds one per outgoing chunk and parses
/// incoming ones straight off the byte channel. This type is the in-memory
/// form used when a whole frame is already buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a frame.
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            opcode,
            payload,
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let payload = match code {
            Some(code) => {
                let mut data = code.to_be_bytes().to_vec();
                data.extend_from_slice(reason.as_bytes());
                data
            }
            None => Vec::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Payload bytes (unmasked).
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Size of this frame on the wire.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        header_size(self.payload.len(), masked) + self.payload.len()
    }

    /// Append the wire form of this frame to `buf`, masking the payload when a key is given.
    pub fn encode(&self, buf: &mut BytesMut, mask: Option<[u8; 4]>) {
        buf.reserve(self.wire_size(mask.is_some()));
        write_header(buf, self.fin, self.opcode, mask, self.payload.len());
        let start = buf.len();
        buf.put_slice(&self.payload);
        if let Some(key) = mask {
            apply_mask_fast(&mut buf[start..], key);
        }
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete frame, or
    /// the frame and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for a malformed header.
    pub fn parse(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let prefix = HeaderPrefix::parse(buf[0], buf[1])?;

        let mut offset = 2;
        let ext = prefix.extended_len_size();
        if buf.len() < offset + ext {
            return Ok(None);
        }
        let payload_len = prefix.payload_len(&buf[offset..offset + ext]);
        offset += ext;

        let mask = if prefix.masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
            offset += 4;
            Some(key)
        } else {
            None
        };

        let payload_len = usize::try_from(payload_len)
            .map_err(|_| Error::Protocol(format!("Payload length {payload_len} too large")))?;
        let Some(end) = offset.checked_add(payload_len) else {
            return Err(Error::Protocol(format!(
                "Payload length {payload_len} too large"
            )));
        };
        if buf.len() < end {
            return Ok(None);
        }

        let mut payload = buf[offset..end].to_vec();
        if let Some(key) = mask {
            apply_mask_fast(&mut payload, key);
        }

        Ok(Some((Self::new(prefix.fin, prefix.opcode, payload), end)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: &Frame, mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        frame.encode(&mut buf, mask);
        buf.to_vec()
    }

    #[test]
    fn test_parse_unmasked_text_frame() {
        let data = &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let (frame, len) = Frame::parse(data).unwrap().unwrap();
        assert_eq!(len, 7);
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_masked_text_frame() {
        let data = &[
            0x81, 0x85, // FIN + Text, MASK + len=5
            0x37, 0xfa, 0x21, 0x3d, // Mask key
            0x7f, 0x9f, 0x4d, 0x51, 0x58, // Masked "Hello"
        ];
        let (frame, len) = Frame::parse(data).unwrap().unwrap();
        assert_eq!(len, 11);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_fragment_and_continuation() {
        let (first, _) = Frame::parse(&[0x01, 0x03, 0x48, 0x65, 0x6c])
            .unwrap()
            .unwrap();
        assert!(!first.fin);
        assert_eq!(first.opcode, OpCode::Text);

        let (last, _) = Frame::parse(&[0x80, 0x02, 0x6c, 0x6f]).unwrap().unwrap();
        assert!(last.fin);
        assert_eq!(last.opcode, OpCode::Continuation);
        assert_eq!(last.payload(), b"lo");
    }

    #[test]
    fn test_parse_extended_length_126() {
        let mut data = vec![0x82, 0x7e, 0x01, 0x00]; // len=256
        data.extend(vec![0xab; 256]);

        let (frame, len) = Frame::parse(&data).unwrap().unwrap();
        assert_eq!(len, 4 + 256);
        assert_eq!(frame.payload().len(), 256);
    }

    #[test]
    fn test_parse_extended_length_127() {
        let mut data = vec![0x82, 0x7f];
        data.extend(65536u64.to_be_bytes());
        data.extend(vec![0xcd; 65536]);

        let (frame, len) = Frame::parse(&data).unwrap().unwrap();
        assert_eq!(len, 10 + 65536);
        assert!(frame.payload().iter().all(|&b| b == 0xcd));
    }

    #[test]
    fn test_parse_incomplete() {
        assert_eq!(Frame::parse(&[0x81]).unwrap(), None);
        assert_eq!(Frame::parse(&[0x81, 0x05, 0x48]).unwrap(), None);
        assert_eq!(Frame::parse(&[0x82, 0x7e, 0x01]).unwrap(), None);
        assert_eq!(Frame::parse(&[0x81, 0x85, 0x00, 0x00]).unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_reserved_bits() {
        // RSV1 set: flag nibble 1100
        let result = Frame::parse(&[0xC1, 0x00]);
        assert!(matches!(result, Err(Error::Protocol(msg)) if msg.contains("1100")));
    }

    #[test]
    fn test_parse_rejects_reserved_opcode() {
        assert!(matches!(Frame::parse(&[0x83, 0x00]), Err(Error::Protocol(_))));
        assert!(matches!(Frame::parse(&[0x8b, 0x00]), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_length_encoding_boundaries() {
        for (len, expected_len7, header) in [
            (0usize, 0u8, 2usize),
            (125, 125, 2),
            (126, 126, 4),
            (65535, 126, 4),
            (65536, 127, 10),
        ] {
            let bytes = encode(&Frame::binary(vec![0u8; len]), None);
            assert_eq!(bytes[1] & 0x7F, expected_len7, "length {len}");
            assert_eq!(bytes.len(), header + len);
            assert_eq!(header_size(len, false), header);
        }
    }

    #[test]
    fn test_encode_masked_sets_mask_bit() {
        let bytes = encode(&Frame::text("Hi"), Some([1, 2, 3, 4]));
        assert_eq!(bytes[0], 0x81);
        assert_eq!(bytes[1], 0x82);
        assert_eq!(&bytes[2..6], &[1, 2, 3, 4]);
        assert_eq!(bytes[6], b'H' ^ 1);
        assert_eq!(bytes[7], b'i' ^ 2);
    }

    #[test]
    fn test_encode_close_frame() {
        let bytes = encode(&Frame::close(Some(1000), "bye"), None);
        assert_eq!(bytes, vec![0x88, 0x05, 0x03, 0xe8, b'b', b'y', b'e']);

        let empty = encode(&Frame::close(None, ""), None);
        assert_eq!(empty, vec![0x88, 0x00]);
    }

    #[test]
    fn test_non_final_header() {
        let mut buf = BytesMut::new();
        write_header(&mut buf, false, OpCode::Continuation, None, 3);
        assert_eq!(&buf[..], &[0x00, 0x03]);
    }

    #[test]
    fn test_prefix_payload_len() {
        let prefix = HeaderPrefix::parse(0x82, 0x7f).unwrap();
        assert_eq!(prefix.extended_len_size(), 8);
        assert_eq!(prefix.payload_len(&70000u64.to_be_bytes()), 70000);

        let prefix = HeaderPrefix::parse(0x82, 0x7e).unwrap();
        assert_eq!(prefix.payload_len(&[0x01, 0x00]), 256);
    }
}
