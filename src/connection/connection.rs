use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::codec::{self, WriteOptions};
use crate::config::{Config, ConnectParams};
use crate::connection::driver::{self, HeaderScan, SchedulingStrategy};
use crate::connection::{ConnectionId, ConnectionState, Role};
use crate::error::{Error, Result};
use crate::io::ByteChannel;
use crate::message::{CloseFrame, Message};
use crate::protocol::handshake::{BAD_REQUEST_RESPONSE, INTERNAL_ERROR_RESPONSE};
use crate::protocol::{ClientRequest, HandshakeRequest, HandshakeResponse, OpCode};
use crate::transport::{Transport, TransportFactory};

type TerminateCallback = Box<dyn FnOnce(&ConnectionId) -> Result<()>>;

/// A WebSocket connection over a non-blocking [`Transport`].
///
/// One type serves both ends: the [`Role`] decides which side of the opening
/// handshake it plays and which close status it sends. All waiting happens
/// on the calling thread in short bounded sleeps.
///
/// ## Lifecycle
///
/// A connection starts in [`ConnectionState::Handshaking`] and becomes
/// [`ConnectionState::Open`] after [`handshake`](Self::handshake) succeeds. A
/// local [`terminate`](Self::terminate), a close frame from the peer, or the
/// peer vanishing all end in [`ConnectionState::Terminated`], after which the
/// stream is released and every operation fails with [`Error::Terminated`].
///
/// ## Example
///
/// ```rust,no_run
/// use wsduplex::{Config, ConnectParams, Connection, SchedulingStrategy, TcpConnector};
/// use std::time::Duration;
///
/// let params = ConnectParams::from_url("ws://127.0.0.1:9001/chat")?;
/// let mut conn = Connection::open(&TcpConnector, &params, Config::client(), SchedulingStrategy::Blocking)?;
///
/// conn.send_text("hello")?;
/// for message in conn.get_messages(Duration::from_secs(1))? {
///     println!("received {message:?}");
/// }
/// conn.terminate();
/// # Ok::<(), wsduplex::Error>(())
/// ```
pub struct Connection<T: Transport> {
    id: ConnectionId,
    role: Role,
    state: ConnectionState,
    channel: Option<ByteChannel<T>>,
    config: Config,
    chunk_size: usize,
    request: Option<ClientRequest>,
    peer_addr: Option<SocketAddr>,
    last_write: Option<Instant>,
    last_receive: Option<Instant>,
    queue: VecDeque<Message>,
    on_terminate: Vec<TerminateCallback>,
}

impl<T: Transport> Connection<T> {
    /// Wrap a freshly opened client transport.
    ///
    /// The handshake deadline is taken from `params`. Call
    /// [`handshake`](Self::handshake) before exchanging messages, or use
    /// [`open`](Self::open) to do both.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if no handshake key could be generated.
    pub fn client(transport: T, params: &ConnectParams, mut config: Config) -> Result<Self> {
        let request = ClientRequest::new(params.path(), params.host(), params.port())?
            .with_headers(params.headers());
        config.timeouts.handshake = params.timeout();
        Ok(Self::with_role(transport, Role::Client, config, Some(request)))
    }

    /// Wrap a transport accepted by a server.
    pub fn accepted(transport: T, config: Config) -> Self {
        Self::with_role(transport, Role::ServerAccepted, config, None)
    }

    fn with_role(
        transport: T,
        role: Role,
        config: Config,
        request: Option<ClientRequest>,
    ) -> Self {
        let id = ConnectionId::new();
        let peer_addr = transport.peer_addr();
        tracing::debug!(conn = %id, %role, peer = ?peer_addr, "connection created");

        Self {
            id,
            role,
            state: ConnectionState::Handshaking,
            channel: Some(ByteChannel::new(transport, config.poll_interval)),
            chunk_size: config.chunk_size,
            config,
            request,
            peer_addr,
            last_write: None,
            last_receive: None,
            queue: VecDeque::new(),
            on_terminate: Vec::new(),
        }
    }

    /// Unique identifier of this connection.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Which end of the connection this is.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Configuration captured at construction.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Address of the peer, if the transport knows it.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// When the last frame was written.
    pub fn last_write_time(&self) -> Option<Instant> {
        self.last_write
    }

    /// When the last message was received.
    pub fn last_receive_time(&self) -> Option<Instant> {
        self.last_receive
    }

    /// Maximum payload bytes per outgoing frame.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Change the outgoing chunk size. Takes effect with the next message.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size.max(1);
    }

    /// Register a callback run once when the connection terminates.
    ///
    /// Errors returned by callbacks are logged and discarded.
    pub fn on_terminate(&mut self, callback: impl FnOnce(&ConnectionId) -> Result<()> + 'static) {
        self.on_terminate.push(Box::new(callback));
    }

    fn check_state(&self, allowed: fn(&ConnectionState) -> bool) -> Result<()> {
        match self.state {
            ConnectionState::Terminated => Err(Error::Terminated),
            state if allowed(&state) => Ok(()),
            state => Err(Error::NotOpen(state)),
        }
    }

    fn masks(&self) -> bool {
        self.config
            .mask_frames
            .unwrap_or_else(|| self.role.masks_by_default())
    }

    /// Send `payload` as a message with `opcode`, split into chunk-sized frames.
    ///
    /// # Errors
    ///
    /// [`Error::Terminated`] or [`Error::NotOpen`] outside the open state,
    /// [`Error::Write`] if a frame could not be sent.
    pub fn write_message(&mut self, payload: &[u8], opcode: OpCode) -> Result<()> {
        self.check_state(ConnectionState::can_send)?;
        self.send_frames(payload, opcode)
    }

    fn send_frames(&mut self, payload: &[u8], opcode: OpCode) -> Result<()> {
        let options = WriteOptions {
            chunk_size: self.chunk_size,
            mask: self.masks(),
            min_write_delay: self.config.min_write_delay,
            timeout: self.config.timeouts.write,
        };
        let channel = self.channel.as_mut().ok_or(Error::Terminated)?;
        codec::write_message(channel, payload, opcode, &options, &mut self.last_write)
    }

    /// Send a message.
    ///
    /// Use [`terminate`](Self::terminate) rather than a close message to end
    /// the connection.
    ///
    /// # Errors
    ///
    /// Same as [`write_message`](Self::write_message).
    pub fn send(&mut self, message: Message) -> Result<()> {
        let (opcode, payload) = message.into_parts();
        self.write_message(&payload, opcode)
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// Same as [`write_message`](Self::write_message).
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.write_message(text.as_bytes(), OpCode::Text)
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// Same as [`write_message`](Self::write_message).
    pub fn send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.write_message(data, OpCode::Binary)
    }

    /// Send a ping.
    ///
    /// # Errors
    ///
    /// Same as [`write_message`](Self::write_message). A payload over 125
    /// bytes fails with [`Error::Write`] wrapping [`Error::Protocol`].
    pub fn ping(&mut self, payload: &[u8]) -> Result<()> {
        self.write_message(payload, OpCode::Ping)
    }

    /// Read the next message, waiting up to `timeout` for all of it.
    ///
    /// Messages held back by [`get_message`](Self::get_message) come first.
    /// Control messages are returned too: a ping has already been answered
    /// with a pong, and a close has already been acknowledged, leaving the
    /// connection terminated.
    ///
    /// A timeout or protocol error in the middle of a frame leaves the stream
    /// unusable; terminate the connection after one (see
    /// [`Error::is_fatal_for_stream`]).
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`], [`Error::Protocol`], the limit errors,
    /// [`Error::InvalidUtf8`], [`Error::ConnectionClosed`] if the peer went
    /// away (the connection is then terminated), and state errors.
    pub fn read_message(&mut self, timeout: Duration) -> Result<Message> {
        if let Some(message) = self.queue.pop_front() {
            return Ok(message);
        }
        self.check_state(ConnectionState::can_receive)?;

        let channel = self.channel.as_mut().ok_or(Error::Terminated)?;
        let raw = match codec::read_message(channel, timeout, &self.config.limits) {
            Ok(raw) => raw,
            Err(Error::ConnectionClosed) => {
                tracing::debug!(conn = %self.id, "peer closed the stream");
                self.release();
                return Err(Error::ConnectionClosed);
            }
            Err(e) => return Err(e),
        };
        self.last_receive = Some(Instant::now());

        match raw.opcode {
            OpCode::Ping => {
                let payload = raw.control_payload().to_vec();
                if self.state.can_send() {
                    self.send_frames(&payload, OpCode::Pong)?;
                }
                Ok(Message::Ping(payload))
            }
            OpCode::Close => {
                let payload = raw.control_payload().to_vec();
                self.acknowledge_close(&payload);
                Ok(Message::Close(CloseFrame::parse(&payload)))
            }
            opcode => Message::from_parts(opcode, raw.payload),
        }
    }

    fn acknowledge_close(&mut self, payload: &[u8]) {
        if self.state == ConnectionState::Terminated {
            return;
        }
        let close = CloseFrame::parse(payload);
        tracing::debug!(
            conn = %self.id,
            code = ?close.as_ref().map(|frame| frame.code.as_u16()),
            "close received"
        );

        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closing;
            let ack = match &close {
                Some(frame) => {
                    CloseFrame::new(frame.code, format!("Close acknowledged: {}", frame.code))
                        .to_payload()
                }
                None => Vec::new(),
            };
            match self.send_frames(&ack, OpCode::Close) {
                Ok(()) => {}
                Err(e) if e.is_timeout() => {
                    tracing::warn!(conn = %self.id, error = %e, "close acknowledgment timed out");
                }
                Err(e) => {
                    tracing::debug!(conn = %self.id, error = %e, "close acknowledgment failed");
                }
            }
        }

        self.release();
    }

    /// Returns `true` if no message is queued and no byte is readable right now.
    ///
    /// A connection that is not open is always empty. A byte read by the
    /// probe is kept for the next read.
    ///
    /// # Errors
    ///
    /// [`Error::Io`] for transport failures.
    pub fn is_empty(&mut self) -> Result<bool> {
        if !self.queue.is_empty() {
            return Ok(false);
        }
        if !self.state.can_receive() {
            return Ok(true);
        }
        match self.channel.as_mut() {
            Some(channel) => channel.is_empty(),
            None => Ok(true),
        }
    }

    /// Collect every message that is available.
    ///
    /// Waits up to `wait` for the first one, then keeps reading while bytes
    /// are immediately available. Pings and pongs are handled and left out.
    /// A close message ends the collection.
    ///
    /// # Errors
    ///
    /// The first error from [`read_message`](Self::read_message). Messages
    /// collected before it stay queued unless the connection terminated.
    pub fn get_messages(&mut self, wait: Duration) -> Result<Vec<Message>> {
        let start = Instant::now();
        let mut messages: Vec<Message> = self.queue.drain(..).collect();

        while self.state.can_receive() {
            let empty = match self.is_empty() {
                Ok(empty) => empty,
                Err(e) => return Err(self.requeue(messages, e)),
            };

            if empty {
                let elapsed = start.elapsed();
                if !messages.is_empty() || elapsed >= wait {
                    break;
                }
                std::thread::sleep(self.config.poll_interval.min(wait - elapsed));
                continue;
            }

            match self.read_message(self.config.timeouts.read) {
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(message) => messages.push(message),
                Err(e) => return Err(self.requeue(messages, e)),
            }
        }

        Ok(messages)
    }

    fn requeue(&mut self, messages: Vec<Message>, error: Error) -> Error {
        if self.state != ConnectionState::Terminated {
            self.queue.extend(messages);
        }
        error
    }

    /// Return one message, waiting up to `wait`.
    ///
    /// Further messages that arrived together with it are queued for the next
    /// call.
    ///
    /// # Errors
    ///
    /// Same as [`get_messages`](Self::get_messages).
    pub fn get_message(&mut self, wait: Duration) -> Result<Option<Message>> {
        if let Some(message) = self.queue.pop_front() {
            return Ok(Some(message));
        }
        let mut messages = self.get_messages(wait)?.into_iter();
        let first = messages.next();
        self.queue.extend(messages);
        Ok(first)
    }

    /// Send `message`, then wait up to `wait` for the first message back.
    ///
    /// # Errors
    ///
    /// [`Error::Timeout`] if nothing arrived in time, otherwise the errors of
    /// [`send`](Self::send) and [`get_message`](Self::get_message).
    pub fn send_wait(&mut self, message: Message, wait: Duration) -> Result<Message> {
        self.send(message)?;
        self.get_message(wait)?.ok_or(Error::Timeout(wait))
    }

    /// Returns `true` while the connection is open and the peer is still there.
    ///
    /// A peer that closed the stream without a close frame terminates the
    /// connection silently.
    pub fn is_open(&mut self) -> bool {
        if self.state != ConnectionState::Open {
            return false;
        }
        let gone = self.channel.as_mut().is_none_or(ByteChannel::is_eof);
        if gone {
            tracing::debug!(conn = %self.id, "peer vanished");
            self.release();
            return false;
        }
        true
    }

    /// Close the connection, ignoring close-handshake failures.
    ///
    /// An open connection sends its close frame and waits up to the close
    /// timeout for the acknowledgment. Calling this again is a no-op.
    pub fn terminate(&mut self) {
        if let Err(e) = self.close_and_release(true) {
            tracing::debug!(conn = %self.id, error = %e, "close handshake incomplete");
        }
    }

    /// Close the connection and report close-handshake failures.
    ///
    /// The connection is terminated either way.
    ///
    /// # Errors
    ///
    /// [`Error::Write`] if the close frame could not be sent,
    /// [`Error::Timeout`] or [`Error::ConnectionClosed`] if no acknowledgment
    /// arrived.
    pub fn terminate_strict(&mut self) -> Result<()> {
        self.close_and_release(true)
    }

    /// Send the close frame if open, then release without waiting for the
    /// peer's acknowledgment.
    pub fn discard(&mut self) {
        if let Err(e) = self.close_and_release(false) {
            tracing::debug!(conn = %self.id, error = %e, "close frame not sent");
        }
    }

    fn close_and_release(&mut self, await_ack: bool) -> Result<()> {
        let mut outcome = Ok(());
        if self.state == ConnectionState::Open {
            self.state = ConnectionState::Closing;
            let close = self.role.local_close();
            tracing::debug!(conn = %self.id, code = close.code.as_u16(), "sending close");
            outcome = self.send_frames(&close.to_payload(), OpCode::Close);
            if await_ack && outcome.is_ok() {
                outcome = self.await_close_ack();
            }
        }
        self.release();
        outcome
    }

    /// Read until the peer's close frame, discarding anything else.
    fn await_close_ack(&mut self) -> Result<()> {
        let timeout = self.config.timeouts.close;
        let start = Instant::now();
        let channel = self.channel.as_mut().ok_or(Error::Terminated)?;

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            let raw = codec::read_message(channel, remaining, &self.config.limits)?;
            if raw.opcode == OpCode::Close {
                tracing::debug!(conn = %self.id, "close acknowledged by peer");
                return Ok(());
            }
        }
    }

    /// Drop the stream and every buffer, then notify callbacks. Idempotent.
    fn release(&mut self) {
        if self.state == ConnectionState::Terminated {
            return;
        }
        self.state = ConnectionState::Terminated;
        if let Some(channel) = self.channel.take() {
            channel.shutdown();
        }
        self.request = None;
        self.queue.clear();
        self.last_write = None;
        self.last_receive = None;
        tracing::debug!(conn = %self.id, "terminated");

        for callback in std::mem::take(&mut self.on_terminate) {
            if let Err(e) = callback(&self.id) {
                tracing::warn!(conn = %self.id, error = %e, "termination callback failed");
            }
        }
    }
}

impl<T: Transport + 'static> Connection<T> {
    /// Connect through `factory` and complete the client handshake.
    ///
    /// # Errors
    ///
    /// [`Error::Connect`] if the transport cannot be opened,
    /// [`Error::Handshake`] if the upgrade fails.
    pub fn open<F>(
        factory: &F,
        params: &ConnectParams,
        config: Config,
        strategy: SchedulingStrategy<'_>,
    ) -> Result<Self>
    where
        F: TransportFactory<Stream = T>,
    {
        let transport = factory.connect(params)?;
        let mut connection = Self::client(transport, params, config)?;
        connection.handshake(strategy)?;
        Ok(connection)
    }

    /// Run the opening handshake for this connection's role.
    ///
    /// A client sends the upgrade request and verifies the accept key. A
    /// server-accepted connection reads the request and answers `101`, or
    /// `400`/`500` on failure. Any failure terminates the connection.
    ///
    /// # Errors
    ///
    /// [`Error::Handshake`] for every failure, including timeouts, and
    /// [`Error::Terminated`] if the connection is already terminated.
    pub fn handshake(&mut self, strategy: SchedulingStrategy<'_>) -> Result<()> {
        match self.state {
            ConnectionState::Handshaking => {}
            ConnectionState::Terminated => return Err(Error::Terminated),
            state => {
                return Err(Error::Handshake(format!(
                    "Handshake already completed (state: {state})"
                )));
            }
        }

        match self.run_handshake(strategy) {
            Ok(()) => {
                self.state = ConnectionState::Open;
                self.request = None;
                tracing::debug!(conn = %self.id, role = %self.role, "handshake complete");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(conn = %self.id, error = %e, "handshake failed");
                self.release();
                Err(match e {
                    Error::Handshake(_) => e,
                    other => Error::Handshake(other.to_string()),
                })
            }
        }
    }

    fn run_handshake(&mut self, strategy: SchedulingStrategy<'_>) -> Result<()> {
        let write_timeout = self.config.timeouts.write;

        match self.role {
            Role::Client => {
                let request = self
                    .request
                    .as_ref()
                    .ok_or_else(|| Error::Handshake("No upgrade request prepared".into()))?;
                let key = request.key.clone();
                let mut buf = Vec::new();
                request.write(&mut buf)?;

                self.channel_mut()?.write_all(&buf, write_timeout)?;
                let headers = self.await_handshake_headers(strategy)?;
                HandshakeResponse::parse(&headers)?.verify(&key)
            }
            Role::ServerAccepted => {
                let request = match self
                    .await_handshake_headers(strategy)
                    .and_then(|headers| HandshakeRequest::parse(&headers))
                {
                    Ok(request) => request,
                    Err(e) => {
                        self.reply_status(BAD_REQUEST_RESPONSE);
                        return Err(e);
                    }
                };

                let mut buf = Vec::new();
                HandshakeResponse::from_request(&request).write(&mut buf);
                if let Err(e) = self.channel_mut()?.write_all(&buf, write_timeout) {
                    self.reply_status(INTERNAL_ERROR_RESPONSE);
                    return Err(e);
                }
                Ok(())
            }
        }
    }

    fn await_handshake_headers(&mut self, strategy: SchedulingStrategy<'_>) -> Result<Vec<u8>> {
        let channel = self.channel.take().ok_or(Error::Terminated)?;
        let scan = HeaderScan::new(self.config.timeouts.handshake, self.config.limits.clone());
        let (channel, headers) = driver::await_headers(
            channel,
            scan,
            strategy,
            self.config.poll_interval,
            self.config.handshake_backoff,
        );
        self.channel = channel;
        headers
    }

    fn channel_mut(&mut self) -> Result<&mut ByteChannel<T>> {
        self.channel.as_mut().ok_or(Error::Terminated)
    }

    fn reply_status(&mut self, status: &[u8]) {
        let timeout = self.config.timeouts.write;
        if let Some(channel) = self.channel.as_mut() {
            let _ = channel.write_all(status, timeout);
        }
    }
}

impl<T: Transport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("peer_addr", &self.peer_addr)
            .field("chunk_size", &self.chunk_size)
            .field("queued", &self.queue.len())
            .finish_non_exhaustive()
    }
}
