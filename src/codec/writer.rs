use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::io::ByteChannel;
use crate::protocol::frame::{header_size, write_header};
use crate::protocol::{MAX_CONTROL_FRAME_PAYLOAD, OpCode, apply_mask_fast, generate_mask};
use crate::transport::Transport;

/// How a message is turned into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Maximum payload bytes per frame.
    pub chunk_size: usize,
    /// Mask every frame with a fresh random key.
    pub mask: bool,
    /// Minimum time between two frame writes.
    pub min_write_delay: Duration,
    /// Deadline for writing one frame.
    pub timeout: Duration,
}

/// Split `payload` into wire frames.
///
/// The first frame carries `opcode`, later ones are continuations, and only
/// the last has the final bit set. An empty payload still yields one frame.
/// Control frames are never split.
///
/// # Errors
///
/// Returns [`Error::Protocol`] for a control payload over 125 bytes and
/// [`Error::Io`] if no masking key could be generated.
pub fn encode_frames(
    payload: &[u8],
    opcode: OpCode,
    chunk_size: usize,
    mask: bool,
) -> Result<Vec<Bytes>> {
    let chunk_size = if opcode.is_control() {
        if payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::Protocol(format!(
                "Control frame payload too large: {} bytes",
                payload.len()
            )));
        }
        MAX_CONTROL_FRAME_PAYLOAD
    } else {
        chunk_size.max(1)
    };

    let chunk_count = payload.len().div_ceil(chunk_size).max(1);
    let mut frames = Vec::with_capacity(chunk_count);

    for index in 0..chunk_count {
        let start = index * chunk_size;
        let end = start.saturating_add(chunk_size).min(payload.len());
        let chunk = &payload[start..end];

        let frame_opcode = if index == 0 {
            opcode
        } else {
            OpCode::Continuation
        };
        let key = if mask { Some(generate_mask()?) } else { None };

        let mut buf = BytesMut::with_capacity(header_size(chunk.len(), mask) + chunk.len());
        write_header(&mut buf, index + 1 == chunk_count, frame_opcode, key, chunk.len());
        let body = buf.len();
        buf.put_slice(chunk);
        if let Some(key) = key {
            apply_mask_fast(&mut buf[body..], key);
        }
        frames.push(buf.freeze());
    }

    Ok(frames)
}

/// Encode `payload` and send it frame by frame.
///
/// Before each frame the call sleeps until `min_write_delay` has passed
/// since `last_write`, which is updated after every frame. The first failing
/// frame aborts the message.
///
/// # Errors
///
/// Returns [`Error::Write`] wrapping the cause.
pub fn write_message<T: Transport>(
    channel: &mut ByteChannel<T>,
    payload: &[u8],
    opcode: OpCode,
    options: &WriteOptions,
    last_write: &mut Option<Instant>,
) -> Result<()> {
    let frames = encode_frames(payload, opcode, options.chunk_size, options.mask)
        .map_err(Error::into_write_error)?;

    for frame in frames {
        if let Some(last) = *last_write {
            let ready_at = last + options.min_write_delay;
            let now = Instant::now();
            if ready_at > now {
                std::thread::sleep(ready_at - now);
            }
        }

        channel
            .write_all(&frame, options.timeout)
            .map_err(Error::into_write_error)?;
        *last_write = Some(Instant::now());

        tracing::trace!(%opcode, len = frame.len(), "frame sent");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;
    use crate::transport::mock::MockTransport;

    fn options(chunk_size: usize, mask: bool) -> WriteOptions {
        WriteOptions {
            chunk_size,
            mask,
            min_write_delay: Duration::ZERO,
            timeout: Duration::from_secs(1),
        }
    }

    fn parse_all(mut wire: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        while !wire.is_empty() {
            let (frame, used) = Frame::parse(wire).unwrap().unwrap();
            frames.push(frame);
            wire = &wire[used..];
        }
        frames
    }

    #[test]
    fn test_hello_in_chunks_of_two() {
        let mock = MockTransport::new();
        let mut channel = ByteChannel::new(mock.clone(), Duration::from_millis(1));
        let mut last_write = None;

        write_message(&mut channel, b"hello", OpCode::Text, &options(2, true), &mut last_write)
            .unwrap();

        let wire = mock.written();
        let frames = parse_all(&wire);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].opcode, OpCode::Text);
        assert_eq!(frames[1].opcode, OpCode::Continuation);
        assert_eq!(frames[2].opcode, OpCode::Continuation);
        assert_eq!(
            frames.iter().map(|f| f.fin).collect::<Vec<_>>(),
            vec![false, false, true]
        );
        assert_eq!(frames[0].payload(), b"he");
        assert_eq!(frames[1].payload(), b"ll");
        assert_eq!(frames[2].payload(), b"o");

        // every frame carries the mask bit
        assert_eq!(wire[1] & 0x80, 0x80);
        assert!(last_write.is_some());
    }

    #[test]
    fn test_exact_fit_is_one_frame() {
        let frames = encode_frames(b"abcd", OpCode::Binary, 4, false).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], 0x82);
    }

    #[test]
    fn test_empty_payload_is_one_final_frame() {
        let frames = encode_frames(b"", OpCode::Text, 4096, false).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], &[0x81, 0x00]);
    }

    #[test]
    fn test_masked_frames_use_fresh_keys() {
        let frames = encode_frames(&[0u8; 64], OpCode::Binary, 8, true).unwrap();
        let keys: std::collections::HashSet<_> =
            frames.iter().map(|f| f[2..6].to_vec()).collect();
        // 8 random keys colliding entirely is practically impossible
        assert!(keys.len() > 1);
    }

    #[test]
    fn test_control_frames_are_not_split() {
        let frames = encode_frames(&[1u8; 100], OpCode::Ping, 10, false).unwrap();
        assert_eq!(frames.len(), 1);

        let err = encode_frames(&[1u8; 126], OpCode::Ping, 4096, false).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_write_failure_is_wrapped() {
        let mock = MockTransport::new();
        mock.set_write_limit(1);
        let mut channel = ByteChannel::new(mock, Duration::from_millis(1));

        let err = write_message(&mut channel, b"abc", OpCode::Text, &options(4096, false), &mut None)
            .unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        assert!(err.is_partial_write());
    }

    #[test]
    fn test_min_write_delay_spaces_frames() {
        let mock = MockTransport::new();
        let mut channel = ByteChannel::new(mock.clone(), Duration::from_millis(1));
        let opts = WriteOptions {
            min_write_delay: Duration::from_millis(15),
            ..options(1, false)
        };

        let start = Instant::now();
        write_message(&mut channel, b"abc", OpCode::Binary, &opts, &mut None).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(parse_all(&mock.written()).len(), 3);
    }
}
