use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore,
    ServerConfig, ServerConnection, SignatureScheme, StreamOwned,
};

use super::{ConnectionSource, TcpSource, Transport, TransportFactory, connect_tcp, tcp_is_eof};
use crate::config::{ConnectParams, Scheme};
use crate::error::{Error, Result};

/// TLS session over a TCP socket, non-blocking once established.
#[derive(Debug)]
pub enum TlsStream {
    /// Client side of a session.
    Client(StreamOwned<ClientConnection, TcpStream>),
    /// Server side of a session.
    Server(StreamOwned<ServerConnection, TcpStream>),
}

/// A peer dropping TCP without close_notify reads as a plain end of stream.
fn eof_tolerant(result: io::Result<usize>) -> io::Result<usize> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
        other => other,
    }
}

fn flush_tolerant(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        other => other,
    }
}

macro_rules! with_stream {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            TlsStream::Client($s) => $body,
            TlsStream::Server($s) => $body,
        }
    };
}

impl Transport for TlsStream {
    fn read_available(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        with_stream!(self, s => eof_tolerant(s.read(buf)))
    }

    fn write_available(&mut self, buf: &[u8]) -> io::Result<usize> {
        with_stream!(self, s => s.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        with_stream!(self, s => flush_tolerant(s.flush()))
    }

    fn is_eof(&mut self) -> bool {
        with_stream!(self, s => match s.conn.process_new_packets() {
            Ok(state) => {
                state.plaintext_bytes_to_read() == 0
                    && (state.peer_has_closed() || tcp_is_eof(&s.sock))
            }
            Err(_) => true,
        })
    }

    fn shutdown(&mut self) {
        with_stream!(self, s => {
            s.conn.send_close_notify();
            let _ = s.conn.complete_io(&mut s.sock);
            let _ = s.sock.shutdown(Shutdown::Both);
        });
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        with_stream!(self, s => s.sock.peer_addr().ok())
    }
}

/// Drive a TLS handshake to completion on a temporarily blocking socket.
fn complete_handshake<C, D>(conn: &mut C, sock: &mut TcpStream, timeout: Duration) -> io::Result<()>
where
    C: std::ops::DerefMut<Target = rustls::ConnectionCommon<D>>,
    D: rustls::SideData,
{
    sock.set_nonblocking(false)?;
    sock.set_read_timeout(Some(timeout))?;
    sock.set_write_timeout(Some(timeout))?;

    let deadline = Instant::now() + timeout;
    while conn.is_handshaking() {
        if Instant::now() >= deadline {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"));
        }
        conn.complete_io(sock)?;
    }

    sock.set_read_timeout(None)?;
    sock.set_write_timeout(None)?;
    sock.set_nonblocking(true)
}

/// Verifier that relaxes the web PKI checks according to [`ConnectParams`].
#[derive(Debug)]
struct RelaxedVerifier {
    inner: Arc<WebPkiServerVerifier>,
    verify_peer: bool,
    verify_peer_name: bool,
    allow_self_signed: bool,
}

fn is_name_mismatch(err: &CertificateError) -> bool {
    matches!(
        err,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

impl ServerCertVerifier for RelaxedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if !self.verify_peer {
            return Ok(ServerCertVerified::assertion());
        }
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(rustls::Error::InvalidCertificate(ref err))
                if !self.verify_peer_name && is_name_mismatch(err) =>
            {
                Ok(ServerCertVerified::assertion())
            }
            Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
                if self.allow_self_signed && intermediates.is_empty() =>
            {
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Build a client configuration honouring the CA chain and verification flags in `params`.
///
/// # Errors
///
/// Returns [`Error::Connect`] if the CA chain cannot be loaded or used.
pub fn client_config(params: &ConnectParams) -> Result<Arc<ClientConfig>> {
    let mut roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    if let Some(path) = params.ca_chain() {
        for cert in load_certs_from_file(path)? {
            roots
                .add(cert)
                .map_err(|e| Error::Connect(format!("Invalid CA certificate: {e}")))?;
        }
    }

    let builder = ClientConfig::builder();
    let config = if params.verify_peer() && params.verify_peer_name() && !params.allow_self_signed()
    {
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::Connect(format!("TLS configuration error: {e}")))?;
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(RelaxedVerifier {
                inner,
                verify_peer: params.verify_peer(),
                verify_peer_name: params.verify_peer_name(),
                allow_self_signed: params.allow_self_signed(),
            }))
            .with_no_client_auth()
    };

    Ok(Arc::new(config))
}

/// Build a server configuration from a certificate chain and its private key.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the key does not match the certificate.
pub fn server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| Error::InvalidConfig(format!("TLS configuration error: {e}")))?;

    Ok(Arc::new(config))
}

/// TLS client transport factory (`wss://`).
#[derive(Debug, Clone, Default)]
pub struct RustlsConnector {
    config: Option<Arc<ClientConfig>>,
}

impl RustlsConnector {
    /// Build the TLS configuration from each call's [`ConnectParams`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed client configuration, ignoring the TLS fields of [`ConnectParams`].
    #[must_use]
    pub fn with_config(config: Arc<ClientConfig>) -> Self {
        Self {
            config: Some(config),
        }
    }
}

impl TransportFactory for RustlsConnector {
    type Stream = TlsStream;

    fn connect(&self, params: &ConnectParams) -> Result<TlsStream> {
        if params.scheme() != Scheme::Tls {
            return Err(Error::InvalidConfig(
                "RustlsConnector only opens TLS connections".into(),
            ));
        }

        let config = match &self.config {
            Some(config) => Arc::clone(config),
            None => client_config(params)?,
        };
        let server_name = ServerName::try_from(params.host().to_string())
            .map_err(|_| Error::Connect(format!("invalid DNS name: {}", params.host())))?;
        let mut conn = ClientConnection::new(config, server_name)
            .map_err(|e| Error::Connect(format!("TLS setup failed: {e}")))?;

        let mut sock = connect_tcp(params)?;
        complete_handshake(&mut conn, &mut sock, params.timeout())
            .map_err(|e| Error::Connect(format!("TLS handshake failed: {e}")))?;

        tracing::debug!(host = params.host(), port = params.port(), "tls established");
        Ok(TlsStream::Client(StreamOwned::new(conn, sock)))
    }
}

/// Listening socket that completes a TLS handshake on every accepted stream.
#[derive(Debug)]
pub struct RustlsSource {
    tcp: TcpSource,
    config: Arc<ServerConfig>,
    handshake_timeout: Duration,
}

impl RustlsSource {
    /// Wrap a TCP source with a server configuration.
    #[must_use]
    pub fn new(tcp: TcpSource, config: Arc<ServerConfig>) -> Self {
        Self {
            tcp,
            config,
            handshake_timeout: Duration::from_secs(5),
        }
    }

    /// Wrap a TCP source using PEM certificate chain and key files.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be loaded or they do not match.
    pub fn from_pem_files(tcp: TcpSource, cert_path: &Path, key_path: &Path) -> Result<Self> {
        let certs = load_certs_from_file(cert_path)?;
        let key = load_private_key_from_file(key_path)?;
        Ok(Self::new(tcp, server_config(certs, key)?))
    }

    /// Set the per-connection TLS handshake deadline.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Local address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.tcp.local_addr()
    }
}

impl ConnectionSource for RustlsSource {
    type Stream = TlsStream;

    fn accept(&mut self, wait: Duration) -> Result<Option<TlsStream>> {
        let start = Instant::now();
        loop {
            let remaining = wait.saturating_sub(start.elapsed());
            let Some(mut sock) = self.tcp.accept(remaining)? else {
                return Ok(None);
            };

            let peer = sock.peer_addr().ok();
            let mut conn = ServerConnection::new(Arc::clone(&self.config))
                .map_err(|e| Error::InvalidConfig(format!("TLS setup failed: {e}")))?;
            match complete_handshake(&mut conn, &mut sock, self.handshake_timeout) {
                Ok(()) => return Ok(Some(TlsStream::Server(StreamOwned::new(conn, sock)))),
                Err(e) => {
                    tracing::warn!(?peer, error = %e, "tls handshake failed, dropping connection");
                    if start.elapsed() >= wait {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

/// Load every certificate from a PEM file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read and
/// [`Error::InvalidConfig`] if it holds no certificate.
pub fn load_certs_from_file(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut reader).collect::<io::Result<Vec<_>>>()?;

    if certs.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read and
/// [`Error::InvalidConfig`] if it holds no key.
pub fn load_private_key_from_file(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    for item in rustls_pemfile::read_all(&mut reader) {
        match item? {
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }

    Err(Error::InvalidConfig(format!(
        "no private key found in {}",
        path.display()
    )))
}
