//! Connection lifecycle states.

/// Connection lifecycle state.
///
/// `Handshaking -> Open -> Closing -> Terminated`. A failed handshake goes
/// straight to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ConnectionState {
    /// The opening handshake has not completed yet.
    #[default]
    Handshaking,
    /// Upgrade done, messages flow both ways.
    Open,
    /// A close frame was sent or received.
    Closing,
    /// No stream is owned anymore. Permanent.
    Terminated,
}

impl ConnectionState {
    /// Check if sending data is allowed in this state.
    ///
    /// Returns `true` only for `Open` state.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Check if receiving data is allowed in this state.
    ///
    /// Returns `true` for `Open` or `Closing` states.
    #[must_use]
    #[inline]
    pub const fn can_receive(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Closing)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Handshaking => write!(f, "Handshaking"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Terminated => write!(f, "Terminated"),
        }
    }
}
