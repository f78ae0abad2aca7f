//! WebSocket connection role (client or server-accepted).

use crate::message::{CloseCode, CloseFrame};

/// Which end of the connection this side is.
///
/// Decides the handshake direction, the close status sent when this side
/// terminates, and whether frames are masked unless
/// [`Config::mask_frames`](crate::Config::mask_frames) says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Opened the connection and sends the upgrade request.
    Client,
    /// Accepted by a server and answers the upgrade request.
    ServerAccepted,
}

impl Role {
    /// Clients mask outgoing frames, servers never do.
    #[must_use]
    pub const fn masks_by_default(&self) -> bool {
        matches!(self, Role::Client)
    }

    /// Close frame sent when this side terminates the connection.
    #[must_use]
    pub fn local_close(&self) -> CloseFrame {
        match self {
            Role::Client => CloseFrame::new(CloseCode::Normal, "client closing"),
            Role::ServerAccepted => CloseFrame::new(CloseCode::GoingAway, "server going away"),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "Client"),
            Role::ServerAccepted => write!(f, "ServerAccepted"),
        }
    }
}
