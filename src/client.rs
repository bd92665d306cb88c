//! Upstream upgrade orchestrator: the client role of the STARTTLS handshake.
//!
//! The proxy always speaks TLS to the real server. This leg trusts the peer
//! least, so the feature advertisement is read through the bounded scanner
//! under a strict deadline before any upgrade is attempted.

use std::net::SocketAddr;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::buffer::NegotiationBuffer;
use crate::error::{Error, Result};
use crate::protocol::{client_stream_open, STARTTLS_REQUEST};
use crate::scan::{contains_proceed, scan_for_starttls};

/// Upper bound on the proceed response read.
const PROCEED_RESPONSE_CAPACITY: usize = 1024;

/// Dials the upstream server and upgrades the connection to TLS via
/// STARTTLS.
///
/// Steps, in order: connect, write the client stream-open addressed to
/// `xmpp_host`, scan the features advertisement under `scan_timeout`, request
/// STARTTLS, require a proceed response, and run the TLS client handshake
/// with `xmpp_host` as SNI. Any failure is terminal for the session.
///
/// After the scan succeeds no deadline applies to the remaining steps.
pub async fn upgrade_upstream(
    addr: SocketAddr,
    xmpp_host: &str,
    connector: &TlsConnector,
    scan_timeout: Duration,
) -> Result<TlsStream<TcpStream>> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| Error::UpstreamDial(format!("failed to connect to {}: {}", addr, e)))?;

    stream
        .write_all(client_stream_open(xmpp_host).as_bytes())
        .await?;

    let mut buf = NegotiationBuffer::new();
    scan_for_starttls(&mut stream, &mut buf, scan_timeout).await?;
    tracing::debug!(host = %xmpp_host, "upstream advertises STARTTLS");

    stream.write_all(STARTTLS_REQUEST.as_bytes()).await?;

    let mut response = [0u8; PROCEED_RESPONSE_CAPACITY];
    let n = stream.read(&mut response).await?;
    if n == 0 || !contains_proceed(&response[..n]) {
        return Err(Error::StarttlsRejected(
            String::from_utf8_lossy(&response[..n]).into_owned(),
        ));
    }
    tracing::debug!(response = %String::from_utf8_lossy(&response[..n]), "upstream accepted STARTTLS");

    let server_name = ServerName::try_from(xmpp_host.to_string())
        .map_err(|e| Error::TlsHandshake(format!("invalid server name '{}': {}", xmpp_host, e)))?;

    connector
        .connect(server_name, stream)
        .await
        .map_err(|e| Error::TlsHandshake(format!("upstream handshake with {}: {}", xmpp_host, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{server_preamble, PROCEED};
    use crate::scan::ScanError;
    use crate::tls::build_upstream_config;
    use std::sync::Arc;
    use std::sync::Once;
    use tokio::net::TcpListener;

    static INIT: Once = Once::new();

    fn init_crypto() {
        INIT.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
    }

    fn test_connector() -> TlsConnector {
        init_crypto();
        TlsConnector::from(Arc::new(build_upstream_config(true).unwrap()))
    }

    #[tokio::test]
    async fn test_upgrade_fails_when_features_lack_starttls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let upstream = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"<stream:stream><stream:features></stream:features>")
                .await
                .unwrap();
            // Hold the socket open so the failure comes from the scan verdict,
            // not a close.
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let connector = test_connector();
        let result =
            upgrade_upstream(addr, "example.com", &connector, Duration::from_secs(2)).await;
        assert!(matches!(
            result,
            Err(Error::FeatureScan(ScanError::FeatureAbsent))
        ));
        upstream.abort();
    }

    #[tokio::test]
    async fn test_upgrade_fails_when_proceed_withheld() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let upstream = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(server_preamble("id1", "example.com").as_bytes())
                .await
                .unwrap();
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"<failure xmlns='urn:ietf:params:xml:ns:xmpp-tls'/>")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        });

        let connector = test_connector();
        let result =
            upgrade_upstream(addr, "example.com", &connector, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::StarttlsRejected(_))));
        upstream.abort();
    }

    #[tokio::test]
    async fn test_upgrade_times_out_on_silent_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let upstream = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let connector = test_connector();
        let result =
            upgrade_upstream(addr, "example.com", &connector, Duration::from_millis(100)).await;
        assert!(matches!(
            result,
            Err(Error::FeatureScan(ScanError::Timeout))
        ));
        upstream.abort();
    }

    #[test]
    fn test_proceed_response_capacity_fits_the_element() {
        assert!(PROCEED.len() < PROCEED_RESPONSE_CAPACITY);
    }
}
