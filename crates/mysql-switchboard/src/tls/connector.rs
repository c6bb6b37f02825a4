//! Backend-side TLS, chosen per server by its `tls:` value.
//!
//! The upstream handshake sends an SSLRequest first and then hands the
//! socket to [`TlsConnector::connect`]. `true` checks the backend's
//! certificate against the webpki roots; `skip-verify` accepts whatever
//! certificate the backend presents.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ConfigBuilder, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::tls::{TlsError, TlsMode};

#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
}

impl TlsConnector {
    /// Connector for a backend, or `None` when its mode is
    /// [`TlsMode::Disabled`] and the session stays on plain TCP.
    pub fn for_mode(mode: TlsMode) -> Result<Option<Self>, TlsError> {
        let config = match mode {
            TlsMode::Disabled => return Ok(None),
            TlsMode::Verify => {
                let mut roots = RootCertStore::empty();
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder()?.with_root_certificates(roots).with_no_client_auth()
            }
            TlsMode::SkipVerify => builder()?
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyBackendCert))
                .with_no_client_auth(),
        };
        Ok(Some(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(config)),
        }))
    }

    /// Upgrade the backend socket after the SSLRequest.
    ///
    /// `host` is the backend's configured host; it goes out as SNI and, in
    /// verify mode, must match the certificate. IP addresses are accepted.
    pub async fn connect(&self, stream: TcpStream, host: &str) -> Result<TlsStream<TcpStream>, TlsError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TlsError::config(format!("backend host {:?} is not a valid TLS name", host)))?;

        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| TlsError::handshake(format!("backend {}: {}", host, e)))
    }
}

fn builder() -> Result<ConfigBuilder<ClientConfig, rustls::WantsVerifier>, TlsError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::config(format!("backend protocol versions: {}", e)))
}

/// Verifier behind `tls: skip-verify`
#[derive(Debug)]
struct AcceptAnyBackendCert;

impl ServerCertVerifier for AcceptAnyBackendCert {
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
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
