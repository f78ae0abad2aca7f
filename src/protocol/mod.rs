//! WebSocket protocol core implementation (RFC 6455).
//!
//! Everything here is sans-io: it works on byte slices and buffers and never
//! touches a transport.

pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;

pub use frame::{Frame, HeaderPrefix, MAX_CONTROL_FRAME_PAYLOAD};
pub use handshake::{
    ClientRequest, HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key,
};
pub use mask::{apply_mask, apply_mask_fast, generate_mask};
pub use opcode::OpCode;
