//! Socket setup for plain TCP and TLS.
//!
//! [`connect`] resolves the configured endpoint, tries each address under the
//! connect timeout and, for TLS, completes the handshake before handing back
//! a [`Stream`] whose reads are bounded by the command timeout.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use tracing::{debug, warn};

use crate::CONNECTION_TARGET;
use crate::config::ConnectionConfig;
use crate::error::ConnectionError;

/// A connected device socket.
pub(crate) enum Stream {
    Tcp(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            Self::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            Self::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            Self::Tls(stream) => stream.flush(),
        }
    }
}

impl Stream {
    /// Sends TLS `close_notify` where applicable, then shuts the socket down.
    pub(crate) fn shutdown(self) {
        let socket = match self {
            Self::Tcp(stream) => stream,
            Self::Tls(stream) => {
                let mut stream = *stream;
                stream.conn.send_close_notify();
                if let Err(error) = stream.conn.complete_io(&mut stream.sock) {
                    debug!(target: CONNECTION_TARGET, %error, "close_notify not delivered");
                }
                stream.sock
            }
        };
        match socket.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotConnected => {}
            Err(error) => debug!(target: CONNECTION_TARGET, %error, "socket shutdown failed"),
        }
    }
}

/// Opens a socket to the configured device.
pub(crate) fn connect(config: &ConnectionConfig) -> Result<Stream, ConnectionError> {
    let endpoint = config.endpoint();
    let addresses = resolve(&config.host, config.effective_port()).map_err(|source| {
        ConnectionError::Resolve {
            endpoint: endpoint.clone(),
            source,
        }
    })?;
    let socket = connect_any(&addresses, config.connect_timeout).map_err(|source| {
        ConnectionError::Connect {
            endpoint: endpoint.clone(),
            source,
        }
    })?;
    socket.set_nodelay(true)?;
    debug!(target: CONNECTION_TARGET, %endpoint, tls = config.tls, "connected");

    if !config.tls {
        socket.set_read_timeout(limit(config.command_timeout))?;
        return Ok(Stream::Tcp(socket));
    }
    let stream = handshake(config, socket, &endpoint)?;
    Ok(Stream::Tls(Box::new(stream)))
}

fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let addresses: Vec<_> = (host, port).to_socket_addrs()?.collect();
    if addresses.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no resolved addresses",
        ));
    }
    Ok(addresses)
}

fn connect_any(addresses: &[SocketAddr], timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for address in addresses {
        let attempt = match limit(timeout) {
            Some(timeout) => TcpStream::connect_timeout(address, timeout),
            None => TcpStream::connect(address),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                debug!(target: CONNECTION_TARGET, %address, %error, "connect attempt failed");
                last_error = Some(error);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable)))
}

/// Socket timeout for a configured duration. Zero means no limit.
fn limit(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

fn handshake(
    config: &ConnectionConfig,
    mut socket: TcpStream,
    endpoint: &str,
) -> Result<StreamOwned<ClientConnection, TcpStream>, ConnectionError> {
    let server_name = ServerName::try_from(config.host.clone()).map_err(|_| {
        ConnectionError::InvalidServerName {
            host: config.host.clone(),
        }
    })?;
    let tls_config = client_config(config.verify_certificates)?;
    let mut connection = ClientConnection::new(Arc::new(tls_config), server_name)
        .map_err(|source| ConnectionError::Tls { source })?;

    socket.set_read_timeout(limit(config.connect_timeout))?;
    socket.set_write_timeout(limit(config.connect_timeout))?;
    while connection.is_handshaking() {
        connection
            .complete_io(&mut socket)
            .map_err(|source| ConnectionError::TlsHandshake {
                endpoint: endpoint.to_owned(),
                source,
            })?;
    }
    socket.set_write_timeout(None)?;
    socket.set_read_timeout(limit(config.command_timeout))?;
    debug!(
        target: CONNECTION_TARGET,
        %endpoint,
        version = ?connection.protocol_version(),
        "TLS established"
    );
    Ok(StreamOwned::new(connection, socket))
}

fn client_config(verify_certificates: bool) -> Result<ClientConfig, ConnectionError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|source| ConnectionError::Tls { source })?;
    if verify_certificates {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        return Ok(builder.with_root_certificates(roots).with_no_client_auth());
    }
    warn!(target: CONNECTION_TARGET, "TLS certificate verification disabled");
    Ok(builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
        .with_no_client_auth())
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn resolves_loopback() {
        let addresses = resolve("127.0.0.1", 8728).expect("resolve");

        assert_eq!(addresses, vec![SocketAddr::from(([127, 0, 0, 1], 8728))]);
    }

    #[rstest]
    fn connect_reports_refused_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let config = ConnectionConfig::new("127.0.0.1").with_port(port);

        let error = connect(&config).err().expect("connect should fail");

        assert!(matches!(error, ConnectionError::Connect { ref endpoint, .. } if *endpoint == config.endpoint()));
    }

    #[rstest]
    #[case(Duration::ZERO, None)]
    #[case(Duration::from_secs(3), Some(Duration::from_secs(3)))]
    fn zero_timeouts_mean_no_limit(#[case] timeout: Duration, #[case] expected: Option<Duration>) {
        assert_eq!(limit(timeout), expected);
    }

    #[rstest]
    fn connects_with_zero_timeouts() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let mut config = ConnectionConfig::new("127.0.0.1").with_port(port);
        config.connect_timeout = Duration::ZERO;
        config.command_timeout = Duration::ZERO;

        let Ok(Stream::Tcp(socket)) = connect(&config) else {
            panic!("plain connect with zero timeouts should succeed");
        };

        assert_eq!(socket.read_timeout().expect("read timeout"), None);
    }

    #[rstest]
    fn builds_verifying_and_permissive_tls_configs() {
        assert!(client_config(true).is_ok());
        assert!(client_config(false).is_ok());
    }

    #[rstest]
    fn rejects_invalid_server_names() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let socket = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let mut config = ConnectionConfig::new("not a host name!").with_tls(true);
        config.connect_timeout = Duration::from_millis(200);

        let error = handshake(&config, socket, "test").err().expect("handshake should fail");

        assert!(matches!(error, ConnectionError::InvalidServerName { .. }));
    }
}
