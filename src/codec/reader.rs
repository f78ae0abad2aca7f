use std::time::{Duration, Instant};

use crate::config::Limits;
use crate::error::Result;
use crate::io::{ByteChannel, ReadLen};
use crate::protocol::{HeaderPrefix, OpCode, apply_mask_fast};
use crate::transport::Transport;

/// A reassembled message as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Opcode of the first frame, or of the last frame that was not a continuation.
    pub opcode: OpCode,
    /// Payload of every frame, concatenated.
    pub payload: Vec<u8>,
    /// Number of frames read.
    pub frames: usize,
    interrupting: Option<Vec<u8>>,
}

impl RawMessage {
    /// Payload of the frame that decided [`opcode`](Self::opcode).
    ///
    /// Differs from [`payload`](Self::payload) only when a control frame
    /// arrived in the middle of a fragmented message.
    #[must_use]
    pub fn control_payload(&self) -> &[u8] {
        self.interrupting.as_deref().unwrap_or(&self.payload)
    }
}

/// Read frames until one with the final bit set, all within `timeout`.
///
/// Each step waits only for what is left of `timeout`. `limits` bound the
/// frame size, the reassembled size and the number of frames.
///
/// # Errors
///
/// [`Error::Timeout`](crate::Error::Timeout) when the deadline passes,
/// [`Error::Protocol`](crate::Error::Protocol) for a malformed header, the
/// limit errors, and whatever the byte channel reports.
pub fn read_message<T: Transport>(
    channel: &mut ByteChannel<T>,
    timeout: Duration,
    limits: &Limits,
) -> Result<RawMessage> {
    let start = Instant::now();
    let remaining = || timeout.saturating_sub(start.elapsed());

    let mut opcode: Option<OpCode> = None;
    let mut payload = Vec::new();
    let mut interrupting = None;
    let mut frames = 0usize;

    loop {
        let header = channel.read_exact(ReadLen::Exact(2), remaining())?;
        let prefix = HeaderPrefix::parse(header[0], header[1])?;

        frames += 1;
        limits.check_fragment_count(frames)?;

        let extended = match prefix.extended_len_size() {
            0 => Vec::new(),
            size => channel.read_exact(ReadLen::Exact(size), remaining())?,
        };
        let announced = prefix.payload_len(&extended);
        limits.check_frame_size(announced)?;
        // bounded by max_frame_size, which is a usize
        let len = announced as usize;
        limits.check_message_size(payload.len() + len)?;

        let mask = if prefix.masked {
            let key = channel.read_exact(ReadLen::Exact(4), remaining())?;
            Some([key[0], key[1], key[2], key[3]])
        } else {
            None
        };

        let mut data = if len > 0 {
            channel.read_exact(ReadLen::Exact(len), remaining())?
        } else {
            Vec::new()
        };
        if let Some(key) = mask {
            apply_mask_fast(&mut data, key);
        }

        tracing::trace!(
            opcode = %prefix.opcode,
            fin = prefix.fin,
            len,
            masked = prefix.masked,
            "frame received"
        );

        if opcode.is_none() || prefix.opcode != OpCode::Continuation {
            if frames > 1 && prefix.opcode.is_control() {
                interrupting = Some(data.clone());
            }
            opcode = Some(prefix.opcode);
        }
        payload.extend_from_slice(&data);

        if prefix.fin {
            break;
        }
    }

    Ok(RawMessage {
        opcode: opcode.unwrap_or(OpCode::Continuation),
        payload,
        frames,
        interrupting,
    })
}
