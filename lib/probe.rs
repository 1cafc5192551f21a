//! Detects whether a registry host speaks TLS, and whether its certificate validates against
//! the standard web PKI, by attempting a real handshake rather than guessing from the scheme.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::RootCertStore;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The outcome of probing a host for TLS support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Whether the host accepted a TLS handshake at all.
    pub https_supported: bool,
    /// Whether the certificate presented during that handshake validates against the
    /// standard web trust store. Meaningless when `https_supported` is false.
    pub cert_valid: bool,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Probes `host:port` for TLS support, triaging the handshake outcome the way a registry
/// client must to decide whether to speak HTTPS, fall back to an unverified HTTPS connection,
/// or give up and speak plain HTTP.
///
/// - Clean handshake success -> `(true, true)`.
/// - Handshake fails specifically on certificate validation -> `(true, false)`: the host does
///   speak TLS, just not with a certificate we trust.
/// - Anything else (connection refused, timeout, the peer isn't speaking TLS at all) -> `(false, false)`.
pub async fn probe_endpoint(host: &str, port: u16) -> ProbeResult {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    let tcp = match timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        _ => {
            return ProbeResult {
                https_supported: false,
                cert_valid: false,
            }
        }
    };

    let server_name = match ServerName::try_from(host.to_string()) {
        Ok(name) => name,
        Err(_) => {
            return ProbeResult {
                https_supported: false,
                cert_valid: false,
            }
        }
    };

    let connector = TlsConnector::from(Arc::new(default_tls_config()));

    match timeout(CONNECT_TIMEOUT, connector.connect(server_name, tcp)).await {
        Ok(Ok(_)) => ProbeResult {
            https_supported: true,
            cert_valid: true,
        },
        Ok(Err(err)) if is_certificate_error(&err) => ProbeResult {
            https_supported: true,
            cert_valid: false,
        },
        _ => ProbeResult {
            https_supported: false,
            cert_valid: false,
        },
    }
}

fn default_tls_config() -> rustls::ClientConfig {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

fn is_certificate_error(err: &std::io::Error) -> bool {
    err.get_ref()
        .and_then(|e| e.downcast_ref::<rustls::Error>())
        .map(|e| matches!(e, rustls::Error::InvalidCertificate(_)))
        .unwrap_or(false)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_connection_refused() {
        // Port 0 binds to an ephemeral address; connecting to an address nothing is bound to
        // simulates a dead endpoint.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = probe_endpoint("127.0.0.1", addr.port()).await;
        assert_eq!(
            result,
            ProbeResult {
                https_supported: false,
                cert_valid: false
            }
        );
    }

    #[tokio::test]
    async fn test_probe_non_tls_peer_reports_unsupported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            if let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });

        let result = probe_endpoint("127.0.0.1", addr.port()).await;
        assert!(!result.https_supported);
        assert!(!result.cert_valid);
    }
}
