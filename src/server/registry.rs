use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::connection::{Connection, ConnectionId, ConnectionState, SchedulingStrategy};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::OpCode;
use crate::transport::ConnectionSource;

type Admission<T> = Box<dyn FnMut(&mut Connection<T>) -> Result<bool>>;

/// Server-side set of accepted, open connections keyed by id.
///
/// Connections are only added after their handshake succeeded and the
/// admission check (if any) returned `Ok(true)`. The registry owns them;
/// callers reach them by id.
pub struct ConnectionRegistry<S: ConnectionSource> {
    source: S,
    config: Config,
    connections: HashMap<ConnectionId, Connection<S::Stream>>,
    admission: Option<Admission<S::Stream>>,
}

impl<S> ConnectionRegistry<S>
where
    S: ConnectionSource,
    S::Stream: 'static,
{
    /// Create a registry accepting from `source`. Every accepted connection
    /// gets a copy of `config`.
    pub fn new(source: S, config: Config) -> Self {
        Self {
            source,
            config,
            connections: HashMap::new(),
            admission: None,
        }
    }

    /// Install an admission check run after each successful handshake.
    ///
    /// Anything but `Ok(true)` rejects the connection. It is sent a close
    /// frame and dropped without waiting for the acknowledgment.
    #[must_use]
    pub fn with_admission(
        mut self,
        admission: impl FnMut(&mut Connection<S::Stream>) -> Result<bool> + 'static,
    ) -> Self {
        self.admission = Some(Box::new(admission));
        self
    }

    /// Configuration given to accepted connections.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The underlying connection source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Accept, upgrade and admit pending connections.
    ///
    /// Waits up to `wait` for the first one, then keeps draining whatever is
    /// pending without waiting. `Duration::ZERO` never waits. Returns the ids
    /// of the connections that were added.
    ///
    /// # Errors
    ///
    /// Only listener failures are returned. Failed handshakes and rejected
    /// connections are logged and skipped.
    pub fn poll_new_connections(&mut self, wait: Duration) -> Result<Vec<ConnectionId>> {
        let mut added = Vec::new();
        let mut wait = wait;

        while let Some(stream) = self.source.accept(wait)? {
            wait = Duration::ZERO;

            let mut connection = Connection::accepted(stream, self.config.clone());
            if let Err(e) = connection.handshake(SchedulingStrategy::Blocking) {
                tracing::debug!(conn = %connection.id(), error = %e, "dropping connection");
                continue;
            }

            let admitted = match self.admission.as_mut() {
                None => true,
                Some(check) => match check(&mut connection) {
                    Ok(admitted) => admitted,
                    Err(e) => {
                        tracing::debug!(conn = %connection.id(), error = %e, "admission check failed");
                        false
                    }
                },
            };
            if !admitted {
                tracing::debug!(conn = %connection.id(), "admission rejected");
                connection.discard();
                continue;
            }

            let id = connection.id().clone();
            tracing::debug!(conn = %id, peer = ?connection.peer_addr(), "connection admitted");
            self.connections.insert(id.clone(), connection);
            added.push(id);
        }

        Ok(added)
    }

    /// Unregister and terminate a connection. Returns `false` for unknown ids.
    pub fn remove_connection(&mut self, id: &ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some(mut connection) => {
                connection.terminate();
                true
            }
            None => false,
        }
    }

    /// Borrow a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<&Connection<S::Stream>> {
        self.connections.get(id)
    }

    /// Mutably borrow a connection.
    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection<S::Stream>> {
        self.connections.get_mut(id)
    }

    /// Ids of all registered connections.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Drop connections that are terminated or whose peer vanished.
    ///
    /// Returns the removed ids.
    pub fn prune_terminated(&mut self) -> Vec<ConnectionId> {
        let mut removed = Vec::new();
        self.connections.retain(|id, connection| {
            let keep = connection.is_open();
            if !keep {
                removed.push(id.clone());
            }
            keep
        });
        removed
    }

    /// Iterate over live connections, pruning dead ones first.
    pub fn connections(&mut self) -> impl Iterator<Item = &mut Connection<S::Stream>> {
        self.prune_terminated();
        self.connections.values_mut()
    }

    /// Send one message to every open connection.
    ///
    /// A connection whose send fails is terminated and removed. Returns how
    /// many connections received the message.
    pub fn broadcast(&mut self, payload: &[u8], opcode: OpCode) -> usize {
        let mut delivered = 0;
        for connection in self.connections.values_mut() {
            match connection.write_message(payload, opcode) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(conn = %connection.id(), error = %e, "broadcast send failed");
                    connection.terminate();
                }
            }
        }
        self.prune_terminated();
        delivered
    }

    /// Read one message from a connection, unregistering it if the read
    /// left it terminated.
    ///
    /// # Errors
    ///
    /// [`Error::Terminated`] for unknown ids, otherwise the errors of
    /// [`Connection::read_message`].
    pub fn read_from(&mut self, id: &ConnectionId, timeout: Duration) -> Result<Message> {
        let connection = self.connections.get_mut(id).ok_or(Error::Terminated)?;
        let result = connection.read_message(timeout);
        if connection.state() == ConnectionState::Terminated {
            self.connections.remove(id);
        }
        result
    }
}

impl<S: ConnectionSource> std::fmt::Debug for ConnectionRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .field("admission", &self.admission.is_some())
            .finish_non_exhaustive()
    }
}
