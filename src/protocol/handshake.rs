//! WebSocket opening handshake (RFC 6455 Section 4).
//!
//! Sans-io helpers: building and parsing the HTTP/1.1 upgrade request and
//! response. Reading the header block off the wire is the connection
//! driver's job; it hands the complete block (terminated by `\r\n\r\n`)
//! to the parsers here.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// End of an HTTP header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Sent when the upgrade request is unusable or arrives too slowly.
pub const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

/// Sent when the 101 response could not be written.
pub const INTERNAL_ERROR_RESPONSE: &[u8] = b"HTTP/1.1 500 Internal Error\r\n\r\n";

const USER_AGENT: &str = concat!("wsduplex/", env!("CARGO_PKG_VERSION"));

/// Parse HTTP headers from an iterator of lines into a case-insensitive HashMap.
///
/// Header names in `unique` must not appear twice.
fn parse_headers<'a, I>(lines: I, unique: &[&str]) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name_lower = name.trim().to_ascii_lowercase();
            if unique.contains(&name_lower.as_str()) && headers.contains_key(&name_lower) {
                return Err(Error::Handshake(format!("Duplicate header: {}", name.trim())));
            }
            headers.insert(name_lower, value.trim().to_string());
        }
    }

    Ok(headers)
}

fn validate_header_value(name: &str, value: &str) -> Result<()> {
    if name.contains(['\r', '\n', ':']) || value.contains(['\r', '\n']) {
        return Err(Error::Handshake(format!(
            "Header {name:?} contains forbidden characters"
        )));
    }
    Ok(())
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsduplex::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// Generate a fresh Sec-WebSocket-Key: base64 of 16 random bytes.
///
/// # Errors
///
/// Returns [`Error::Io`] if the operating system RNG is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce).map_err(|e| Error::Io(format!("key generation: {e}")))?;
    Ok(BASE64.encode(nonce))
}

/// Upgrade request sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    /// Request target, always starting with `/`.
    pub path: String,
    /// Value of the Host header (`host:port`).
    pub host: String,
    /// The Sec-WebSocket-Key sent to the server.
    pub key: String,
    /// Additional headers. A name matching a default header replaces its value.
    pub extra_headers: Vec<(String, String)>,
}

impl ClientRequest {
    /// Create a request with a freshly generated key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if no key could be generated.
    pub fn new(path: impl Into<String>, host: &str, port: u16) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            host: format!("{host}:{port}"),
            key: generate_key()?,
            extra_headers: Vec::new(),
        })
    }

    /// Add extra request headers.
    #[must_use]
    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.extra_headers.extend_from_slice(headers);
        self
    }

    /// The accept value a conforming server answers with.
    #[must_use]
    pub fn expected_accept(&self) -> String {
        compute_accept_key(&self.key)
    }

    /// Write the HTTP request to a buffer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if an extra header contains CR or LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        let mut headers: Vec<(&str, &str)> = vec![
            ("Host", self.host.as_str()),
            ("User-Agent", USER_AGENT),
            ("Connection", "Upgrade"),
            ("Upgrade", "websocket"),
            ("Sec-WebSocket-Key", self.key.as_str()),
            ("Sec-WebSocket-Version", "13"),
        ];

        for (name, value) in &self.extra_headers {
            validate_header_value(name, value)?;
            match headers
                .iter_mut()
                .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            {
                Some(slot) => slot.1 = value.as_str(),
                None => headers.push((name.as_str(), value.as_str())),
            }
        }

        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        for (name, value) in headers {
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// Parsed upgrade request received by a server.
///
/// Parsing is lenient: only a request line and a Sec-WebSocket-Key are
/// required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The request path (e.g., "/chat").
    pub path: String,
    /// The Host header value, if any.
    pub host: Option<String>,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
}

impl HandshakeRequest {
    /// Parse a WebSocket handshake request from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if the data is not UTF-8, the request line
    /// is missing, the key is missing or empty, or the key is duplicated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text =
            std::str::from_utf8(data).map_err(|_| Error::Handshake("Invalid UTF-8".into()))?;

        let mut lines = text.split('\n');

        let request_line = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::Handshake("Empty request".into()))?;
        let path = request_line
            .split_whitespace()
            .nth(1)
            .unwrap_or("/")
            .to_string();

        let headers = parse_headers(lines, &["sec-websocket-key", "host"])?;

        let key = headers
            .get("sec-websocket-key")
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::Handshake("Missing Header: Sec-WebSocket-Key".into()))?
            .clone();

        Ok(Self {
            path,
            host: headers.get("host").cloned(),
            key,
        })
    }
}

/// WebSocket handshake response from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
}

impl HandshakeResponse {
    /// Create a handshake response from a parsed request.
    #[must_use]
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
        }
    }

    /// Write the HTTP response to a buffer.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n", self.accept).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    /// Parse a WebSocket handshake response from raw HTTP data.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] if:
    /// - The data is not valid UTF-8.
    /// - The response is empty or the status line is missing.
    /// - The status code is not `101 Switching Protocols`.
    /// - Any required headers are missing: `Upgrade`, `Connection`, `Sec-WebSocket-Accept`.
    /// - The `Upgrade` header is not `websocket`.
    /// - The `Connection` header does not contain `upgrade`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text =
            std::str::from_utf8(data).map_err(|_| Error::Handshake("Invalid UTF-8".into()))?;

        let mut lines = text.split('\n');

        let status_line = lines
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .ok_or_else(|| Error::Handshake("Empty response".into()))?;

        let mut status = status_line.split_whitespace();
        let version = status.next().unwrap_or_default();
        let code = status.next().unwrap_or_default();
        if !version.starts_with("HTTP/1.") || code != "101" {
            return Err(Error::Handshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let headers = parse_headers(lines, &["sec-websocket-accept"])?;

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::Handshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::Handshake(format!("Invalid Upgrade header: {upgrade}")));
        }

        let connection = headers
            .get("connection")
            .ok_or_else(|| Error::Handshake("Missing Connection header in response".into()))?;
        if !connection.to_ascii_lowercase().contains("upgrade") {
            return Err(Error::Handshake(format!(
                "Invalid Connection header: {connection}"
            )));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::Handshake("Missing Sec-WebSocket-Accept header".into()))?
            .clone();

        Ok(Self { accept })
    }

    /// Check the accept value against the key the client sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handshake`] on mismatch.
    pub fn verify(&self, key: &str) -> Result<()> {
        if self.accept == compute_accept_key(key) {
            Ok(())
        } else {
            Err(Error::Handshake(
                "Server returned invalid upgrade response".into(),
            ))
        }
    }
}
