//! TLS/certificate handling for xmppstrip.
//!
//! This module provides:
//! - Self-signed certificate generation (2048-bit RSA, 24-hour validity)
//! - Certificate and key loading from PEM files
//! - SHA-256 fingerprint computation
//! - rustls configuration builders for the two legs of a session

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Key size for generated certificates.
const RSA_KEY_BITS: usize = 2048;

/// Validity window for generated certificates.
const CERT_VALIDITY_HOURS: i64 = 24;

/// Organization attribute on generated certificates.
const CERT_ORGANIZATION: &str = "xmppstrip";

/// Country attribute on generated certificates.
const CERT_COUNTRY: &str = "US";

/// Error type for TLS operations.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

/// Result type for TLS operations.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Certificate chain and key with computed fingerprint.
///
/// Built once at startup and consumed into the server config; every session
/// shares the resulting config read-only.
pub struct CertKeyPair {
    /// Certificate chain in DER format.
    pub cert_der: Vec<Vec<u8>>,
    /// Private key in DER format.
    pub key: PrivateKeyDer<'static>,
    /// SHA-256 fingerprint of the leaf certificate (colon-separated hex).
    pub fingerprint: String,
}

impl std::fmt::Debug for CertKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertKeyPair")
            .field("cert_der", &format!("<{} certs>", self.cert_der.len()))
            .field("key", &"<private key>")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Generates a self-signed identity for the client-facing leg.
///
/// 2048-bit RSA key, SHA-256 signature, 24-hour validity, `CN` set to the
/// host the proxy impersonates.
pub fn generate_self_signed_identity(common_name: &str) -> TlsResult<CertKeyPair> {
    let mut rng = rand::rngs::OsRng;
    let rsa_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| TlsError::CertificateGeneration(e.to_string()))?;
    let key_der = rsa_key
        .to_pkcs8_der()
        .map_err(|e| TlsError::CertificateGeneration(e.to_string()))?;

    let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(
        &PrivatePkcs8KeyDer::from(key_der.as_bytes().to_vec()),
        &rcgen::PKCS_RSA_SHA256,
    )
    .map_err(|e| TlsError::CertificateGeneration(e.to_string()))?;

    let mut params = CertificateParams::new(vec![common_name.to_string()])
        .map_err(|e| TlsError::CertificateGeneration(e.to_string()))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, CERT_COUNTRY);
    dn.push(DnType::OrganizationName, CERT_ORGANIZATION);
    dn.push(DnType::CommonName, common_name);
    params.distinguished_name = dn;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::hours(CERT_VALIDITY_HOURS);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TlsError::CertificateGeneration(e.to_string()))?;

    let cert_der = cert.der().to_vec();
    let fingerprint = compute_fingerprint(&cert_der);

    Ok(CertKeyPair {
        cert_der: vec![cert_der],
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der.as_bytes().to_vec())),
        fingerprint,
    })
}

/// Loads a certificate and key from the specified PEM files.
pub fn load_cert_key(cert_path: &Path, key_path: &Path) -> TlsResult<CertKeyPair> {
    let cert_pem = fs::read_to_string(cert_path)?;
    let key_pem = fs::read_to_string(key_path)?;

    let cert_der = parse_cert_pem(&cert_pem)?;
    let key = parse_key_pem(&key_pem)?;

    let fingerprint = compute_fingerprint(&cert_der[0]);

    Ok(CertKeyPair {
        cert_der,
        key,
        fingerprint,
    })
}

/// Parses PEM-encoded certificates into DER format.
fn parse_cert_pem(pem: &str) -> TlsResult<Vec<Vec<u8>>> {
    let mut reader = BufReader::new(pem.as_bytes());
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;

    if certs.is_empty() {
        return Err(TlsError::InvalidCertificate(
            "no certificates found in PEM".to_string(),
        ));
    }

    Ok(certs.into_iter().map(|c| c.to_vec()).collect())
}

/// Parses a PEM-encoded private key, preserving its encoding.
fn parse_key_pem(pem: &str) -> TlsResult<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(pem.as_bytes());

    // Try to read any private key format
    loop {
        match rustls_pemfile::read_one(&mut reader)
            .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?
        {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs1(key));
            }
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => {
                return Ok(PrivateKeyDer::Pkcs8(key));
            }
            Some(rustls_pemfile::Item::Sec1Key(key)) => {
                return Ok(PrivateKeyDer::Sec1(key));
            }
            Some(_) => continue, // Skip other items (certificates, etc.)
            None => {
                return Err(TlsError::InvalidCertificate(
                    "no private key found in PEM".to_string(),
                ))
            }
        }
    }
}

/// Computes the SHA-256 fingerprint of a DER-encoded certificate.
///
/// Returns the fingerprint in colon-separated lowercase hex format.
pub fn compute_fingerprint(cert_der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    let hash = hasher.finalize();
    format_fingerprint(&hash.into())
}

/// Formats a fingerprint as colon-separated lowercase hex.
pub fn format_fingerprint(bytes: &[u8; 32]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Builds the server TLS configuration for the client-facing leg.
pub fn build_server_config(cert_key: CertKeyPair) -> TlsResult<ServerConfig> {
    let certs: Vec<CertificateDer<'static>> = cert_key
        .cert_der
        .into_iter()
        .map(CertificateDer::from)
        .collect();

    ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, cert_key.key)
        .map_err(|e| TlsError::TlsConfig(e.to_string()))
}

/// Builds the client TLS configuration for the upstream leg.
///
/// Uses the bundled webpki root store; with `insecure` the certificate check
/// is skipped entirely.
pub fn build_upstream_config(insecure: bool) -> TlsResult<ClientConfig> {
    if insecure {
        tracing::warn!(
            "upstream TLS certificate verification is disabled; use only against servers you control"
        );
        return Ok(ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(InsecureVerifier))
            .with_no_client_auth());
    }

    let mut store = RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    Ok(ClientConfig::builder()
        .with_root_certificates(store)
        .with_no_client_auth())
}

/// Certificate verifier that accepts any certificate (for development only).
#[derive(Debug)]
struct InsecureVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Once;
    use tempfile::tempdir;

    static INIT: Once = Once::new();

    /// Initialize the crypto provider for tests.
    fn init_crypto() {
        INIT.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });
    }

    /// Fast ECDSA test identity; the RSA path is exercised at runtime only.
    fn generate_test_identity() -> (String, String, CertKeyPair) {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let cert = CertificateParams::new(vec!["localhost".to_string()])
            .unwrap()
            .self_signed(&key_pair)
            .unwrap();

        let cert_der = cert.der().to_vec();
        let fingerprint = compute_fingerprint(&cert_der);
        let pair = CertKeyPair {
            cert_der: vec![cert_der],
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
            fingerprint,
        };
        (cert.pem(), key_pair.serialize_pem(), pair)
    }

    #[test]
    fn test_load_cert_key_round_trip() {
        let (cert_pem, key_pem, generated) = generate_test_identity();

        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("test.crt");
        let key_path = dir.path().join("test.key");
        fs::write(&cert_path, &cert_pem).unwrap();
        fs::write(&key_path, &key_pem).unwrap();

        let loaded = load_cert_key(&cert_path, &key_path).unwrap();
        assert_eq!(loaded.fingerprint, generated.fingerprint);
        assert_eq!(loaded.cert_der, generated.cert_der);
    }

    #[test]
    fn test_load_cert_key_missing_file() {
        let dir = tempdir().unwrap();
        let result = load_cert_key(&dir.path().join("nope.crt"), &dir.path().join("nope.key"));
        assert!(matches!(result, Err(TlsError::IoError(_))));
    }

    #[test]
    fn test_load_cert_key_rejects_empty_pem() {
        let dir = tempdir().unwrap();
        let cert_path = dir.path().join("empty.crt");
        let key_path = dir.path().join("empty.key");
        fs::write(&cert_path, "").unwrap();
        fs::write(&key_path, "").unwrap();

        let result = load_cert_key(&cert_path, &key_path);
        assert!(matches!(result, Err(TlsError::InvalidCertificate(_))));
    }

    #[test]
    fn test_compute_fingerprint_format_and_determinism() {
        let data = b"test certificate data";
        let fingerprint = compute_fingerprint(data);

        assert_eq!(fingerprint.len(), 95);
        assert_eq!(fingerprint.matches(':').count(), 31);
        assert_eq!(fingerprint, compute_fingerprint(data));
    }

    #[test]
    fn test_format_fingerprint() {
        let bytes = [0xabu8; 32];
        let result = format_fingerprint(&bytes);
        assert!(result.starts_with("ab:ab:"));
        assert_eq!(result.len(), 95);
    }

    #[test]
    fn test_build_server_config() {
        init_crypto();
        let (_, _, pair) = generate_test_identity();
        let config = build_server_config(pair);
        assert!(config.is_ok());
    }

    #[test]
    fn test_build_upstream_config_default() {
        init_crypto();
        assert!(build_upstream_config(false).is_ok());
    }

    #[test]
    fn test_build_upstream_config_insecure() {
        init_crypto();
        assert!(build_upstream_config(true).is_ok());
    }
}
