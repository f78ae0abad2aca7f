#![cfg(feature = "tls-rustls")]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rcgen::{CertifiedKey, generate_simple_self_signed};
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use tempfile::TempDir;
use wsduplex::transport::load_certs_from_file;
use wsduplex::{
    Config, ConnectParams, Connection, ConnectionRegistry, Error, Message, RustlsConnector,
    RustlsSource, SchedulingStrategy, Scheme, TcpSource,
};

const WAIT: Duration = Duration::from_secs(5);

struct TestCert {
    _dir: TempDir,
    cert_path: PathBuf,
    key_path: PathBuf,
    der: CertificateDer<'static>,
}

fn generate_test_cert() -> TestCert {
    let subject_alt_names = vec!["localhost".to_string()];
    let CertifiedKey { cert, key_pair } = generate_simple_self_signed(subject_alt_names).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

    TestCert {
        _dir: dir,
        cert_path,
        key_path,
        der: CertificateDer::from(cert.der().to_vec()),
    }
}

/// Serve one TLS connection, echoing data until the client closes.
/// Returns whether a client was accepted.
fn spawn_tls_echo(cert: &TestCert, accept_wait: Duration) -> (u16, JoinHandle<bool>) {
    let tcp = TcpSource::bind("127.0.0.1:0").unwrap();
    let source = RustlsSource::from_pem_files(tcp, &cert.cert_path, &cert.key_path)
        .unwrap()
        .with_handshake_timeout(Duration::from_secs(2));
    let port = source.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let mut server = ConnectionRegistry::new(source, Config::server());
        if server.poll_new_connections(accept_wait).unwrap().is_empty() {
            return false;
        }

        while !server.is_empty() {
            for conn in server.connections() {
                for message in conn.get_messages(Duration::from_millis(10)).unwrap_or_default() {
                    if message.is_data() {
                        let _ = conn.send(message);
                    }
                }
            }
            server.prune_terminated();
        }
        true
    });

    (port, handle)
}

fn tls_params(port: u16) -> ConnectParams {
    ConnectParams::new(Scheme::Tls, "localhost", port).unwrap()
}

fn open(
    connector: &RustlsConnector,
    params: &ConnectParams,
) -> wsduplex::Result<Connection<wsduplex::TlsStream>> {
    Connection::open(
        connector,
        params,
        Config::client().with_poll_interval(Duration::from_millis(1)),
        SchedulingStrategy::Blocking,
    )
}

#[test]
fn test_wss_echo_with_ca_chain() {
    let cert = generate_test_cert();
    let (port, server) = spawn_tls_echo(&cert, WAIT);

    let params = tls_params(port).with_ca_chain(&cert.cert_path);
    let mut client = open(&RustlsConnector::new(), &params).unwrap();

    let reply = client.send_wait(Message::text("over tls"), WAIT).unwrap();
    assert_eq!(reply, Message::text("over tls"));

    client.terminate_strict().unwrap();
    assert!(server.join().unwrap());
}

#[test]
fn test_wss_with_fixed_client_config() {
    let cert = generate_test_cert();
    let (port, server) = spawn_tls_echo(&cert, WAIT);

    let mut roots = RootCertStore::empty();
    roots.add(cert.der.clone()).unwrap();
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = RustlsConnector::with_config(Arc::new(config));

    let mut client = open(&connector, &tls_params(port)).unwrap();
    let payload = vec![7u8; 20_000];
    let reply = client
        .send_wait(Message::binary(payload.clone()), WAIT)
        .unwrap();
    assert_eq!(reply, Message::Binary(payload));

    client.terminate();
    assert!(server.join().unwrap());
}

#[test]
fn test_peer_name_check_disabled() {
    let cert = generate_test_cert();
    let (port, server) = spawn_tls_echo(&cert, WAIT);

    // The certificate only names "localhost".
    let params = ConnectParams::new(Scheme::Tls, "127.0.0.1", port)
        .unwrap()
        .with_ca_chain(&cert.cert_path)
        .with_verification(true, false, false);
    let mut client = open(&RustlsConnector::new(), &params).unwrap();
    assert!(client.is_open());

    client.terminate();
    assert!(server.join().unwrap());
}

#[test]
fn test_self_signed_allowed_without_ca_chain() {
    let cert = generate_test_cert();
    let (port, server) = spawn_tls_echo(&cert, WAIT);

    let params = tls_params(port).with_verification(true, true, true);
    let mut client = open(&RustlsConnector::new(), &params).unwrap();
    assert!(client.is_open());

    client.terminate();
    assert!(server.join().unwrap());
}

#[test]
fn test_verification_disabled() {
    let cert = generate_test_cert();
    let (port, server) = spawn_tls_echo(&cert, WAIT);

    let params = tls_params(port).with_verification(false, false, false);
    let mut client = open(&RustlsConnector::new(), &params).unwrap();
    assert!(client.is_open());

    client.terminate();
    assert!(server.join().unwrap());
}

#[test]
fn test_untrusted_certificate_is_refused() {
    let cert = generate_test_cert();
    let (port, server) = spawn_tls_echo(&cert, Duration::from_secs(2));

    let result = open(&RustlsConnector::new(), &tls_params(port));
    assert!(matches!(result, Err(Error::Connect(_))));

    assert!(!server.join().unwrap());
}

#[test]
fn test_connector_rejects_plain_scheme() {
    let params = ConnectParams::new(Scheme::Tcp, "localhost", 80).unwrap();
    let result = open(&RustlsConnector::new(), &params);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn test_load_certs_from_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.pem");
    std::fs::write(&path, "").unwrap();

    assert!(matches!(
        load_certs_from_file(&path),
        Err(Error::InvalidConfig(_))
    ));
}
