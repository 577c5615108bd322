//! Raw socket client for pipelined smuggling exchanges.
//!
//! The exchange is a linear sequence on a single owned socket: write the
//! payload, read the first response, write the follow-up, read the second.
//! Ordering of the two responses is the signal, so nothing here multiplexes.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};

use crate::error::SmugglingError;

/// Maximum bytes read per response.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024;

/// Decomposed target of one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
}

impl ExchangeTarget {
    pub fn from_url(raw: &str) -> Result<Self, SmugglingError> {
        let url =
            url::Url::parse(raw).map_err(|e| SmugglingError::InvalidUrl(format!("{raw}: {e}")))?;
        let tls = match url.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            other => {
                return Err(SmugglingError::InvalidUrl(format!(
                    "unsupported scheme: {other}"
                )));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| SmugglingError::InvalidUrl(format!("{raw}: missing host")))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Self {
            host,
            port,
            path,
            tls,
        })
    }
}

/// Both responses of one pipelined exchange, in arrival order.
#[derive(Debug, Clone)]
pub struct RawExchange {
    pub first: Vec<u8>,
    pub second: Vec<u8>,
}

/// Accept-everything verifier: the target is hostile, certificate trust is
/// irrelevant here.
#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Raw exchange client. Opens a fresh socket per exchange; connections are
/// never shared.
pub struct RawClient {
    pub connection_timeout: Duration,
    /// Idle gap after which a response read is considered finished.
    pub read_idle_timeout: Duration,
}

impl RawClient {
    pub fn new(connection_timeout: Duration) -> Self {
        Self {
            connection_timeout,
            read_idle_timeout: Duration::from_secs(2),
        }
    }

    /// Run one pipelined exchange under a deadline of twice the connection
    /// timeout.
    pub async fn exchange(
        &self,
        target: &ExchangeTarget,
        payload: &[u8],
        follow_up: &[u8],
    ) -> Result<RawExchange, SmugglingError> {
        let deadline = self.connection_timeout * 2;
        tokio::time::timeout(deadline, self.exchange_inner(target, payload, follow_up))
            .await
            .map_err(|_| SmugglingError::Timeout(deadline))?
    }

    async fn exchange_inner(
        &self,
        target: &ExchangeTarget,
        payload: &[u8],
        follow_up: &[u8],
    ) -> Result<RawExchange, SmugglingError> {
        let stream = tokio::time::timeout(
            self.connection_timeout,
            TcpStream::connect((target.host.as_str(), target.port)),
        )
        .await
        .map_err(|_| SmugglingError::Timeout(self.connection_timeout))??;
        stream.set_nodelay(true)?;

        if target.tls {
            let config = ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerification))
                .with_no_client_auth();
            let connector = TlsConnector::from(Arc::new(config));
            let server_name = ServerName::try_from(target.host.clone())
                .map_err(|e| SmugglingError::Tls(e.to_string()))?;
            let mut tls = connector
                .connect(server_name, stream)
                .await
                .map_err(|e| SmugglingError::Tls(e.to_string()))?;
            self.run_exchange(&mut tls, payload, follow_up).await
        } else {
            let mut stream = stream;
            self.run_exchange(&mut stream, payload, follow_up).await
        }
    }

    async fn run_exchange<S>(
        &self,
        stream: &mut S,
        payload: &[u8],
        follow_up: &[u8],
    ) -> Result<RawExchange, SmugglingError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        // The payload goes out in one write.
        stream.write_all(payload).await?;
        stream.flush().await?;
        let first = self.read_response(stream).await?;

        stream.write_all(follow_up).await?;
        stream.flush().await?;
        // EOF on the second read is fine; whatever arrived is the evidence.
        let second = self.read_response(stream).await.unwrap_or_default();

        Ok(RawExchange { first, second })
    }

    /// Read one response: until it parses as complete, the idle gap expires,
    /// EOF, or the size cap.
    async fn read_response<S>(&self, stream: &mut S) -> Result<Vec<u8>, SmugglingError>
    where
        S: AsyncRead + Unpin,
    {
        let mut response = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = tokio::time::timeout(self.read_idle_timeout, stream.read(&mut chunk)).await;
            match read {
                Err(_) => break,
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    let take = n.min(MAX_RESPONSE_BYTES - response.len());
                    response.extend_from_slice(&chunk[..take]);
                    if response.len() >= MAX_RESPONSE_BYTES || response_complete(&response) {
                        break;
                    }
                }
                Ok(Err(e)) => {
                    if response.is_empty() {
                        return Err(SmugglingError::Io(e));
                    }
                    break;
                }
            }
        }
        Ok(response)
    }
}

/// Heuristic completeness check for a buffered response.
fn response_complete(buf: &[u8]) -> bool {
    let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&buf[..header_end]);
    let body = &buf[header_end + 4..];

    for line in head.lines().skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            if let Ok(expected) = value.trim().parse::<usize>() {
                return body.len() >= expected;
            }
        }
        if name.trim().eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return body.windows(5).any(|w| w == b"0\r\n\r\n");
        }
    }
    // No framing headers: only EOF or idle can end the body.
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_target_from_url() {
        let t = ExchangeTarget::from_url("https://example.com/app?x=1").unwrap();
        assert_eq!(t.host, "example.com");
        assert_eq!(t.port, 443);
        assert_eq!(t.path, "/app?x=1");
        assert!(t.tls);

        let t = ExchangeTarget::from_url("http://example.com:8080/").unwrap();
        assert_eq!(t.port, 8080);
        assert!(!t.tls);

        assert!(ExchangeTarget::from_url("ftp://example.com/").is_err());
        assert!(ExchangeTarget::from_url("nonsense").is_err());
    }

    #[test]
    fn test_response_complete_content_length() {
        assert!(response_complete(
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi"
        ));
        assert!(!response_complete(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhi"
        ));
        assert!(!response_complete(b"HTTP/1.1 200 OK\r\nContent-Le"));
    }

    #[test]
    fn test_response_complete_chunked() {
        assert!(response_complete(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n"
        ));
        assert!(!response_complete(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n"
        ));
    }

    #[tokio::test]
    async fn test_exchange_reads_two_responses_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            // First request.
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nfirst")
                .await
                .unwrap();
            // Follow-up.
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 6\r\n\r\nsecond")
                .await
                .unwrap();
        });

        let client = RawClient::new(Duration::from_secs(5));
        let target = ExchangeTarget {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            path: "/".to_string(),
            tls: false,
        };
        let exchange = client
            .exchange(&target, b"POST / HTTP/1.1\r\n\r\n", b"GET / HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        assert!(exchange.first.ends_with(b"first"));
        assert!(exchange.second.ends_with(b"second"));
    }

    #[tokio::test]
    async fn test_second_read_tolerates_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .await
                .unwrap();
            // Close without answering the follow-up.
        });

        let client = RawClient::new(Duration::from_secs(5));
        let target = ExchangeTarget {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            path: "/".to_string(),
            tls: false,
        };
        let exchange = client
            .exchange(&target, b"POST / HTTP/1.1\r\n\r\n", b"GET / HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        assert!(exchange.first.ends_with(b"ok"));
        assert!(exchange.second.is_empty());
    }
}
