//! Client-side upgrade on the listener.
//!
//! When `listen.tls` is enabled the greeting advertises `CLIENT_SSL`, and a
//! client that answers with an SSLRequest has its socket handed to
//! [`TlsAcceptor::accept`] before the real handshake response is read.

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::tls::{load_certificates, load_private_key, TlsError, TlsServerConfig};

/// Terminates client TLS with the listener's certificate.
#[derive(Clone)]
pub struct TlsAcceptor {
    inner: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    /// Load the listener certificate chain and key.
    ///
    /// The listener calls this once at bind time; a bad `cert_path` or
    /// `key_path` keeps the proxy from starting.
    pub fn new(config: &TlsServerConfig) -> Result<Self, TlsError> {
        config.validate().map_err(TlsError::config)?;
        let (cert_path, key_path) = match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => (cert, key),
            (None, _) => return Err(TlsError::config("listen.tls.cert_path is required")),
            (_, None) => return Err(TlsError::config("listen.tls.key_path is required")),
        };

        let server_config = listener_config(cert_path, key_path)?;
        Ok(Self {
            inner: tokio_rustls::TlsAcceptor::from(Arc::new(server_config)),
        })
    }

    /// Finish the upgrade after the client's SSLRequest.
    pub async fn accept(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>, TlsError> {
        self.inner
            .accept(stream)
            .await
            .map_err(|e| TlsError::handshake(format!("client: {}", e)))
    }
}

fn listener_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, TlsError> {
    let certs = load_certificates(cert_path)?;
    if certs.is_empty() {
        return Err(TlsError::cert_load(cert_path, "no certificates found in file"));
    }
    let key = load_private_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::config(format!("listener protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::config(format!("listener certificate rejected: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn listen_tls(cert: Option<PathBuf>, key: Option<PathBuf>) -> TlsServerConfig {
        TlsServerConfig {
            enabled: true,
            cert_path: cert,
            key_path: key,
        }
    }

    #[test]
    fn test_missing_cert_path_fails_at_bind() {
        let config = listen_tls(None, Some(PathBuf::from("/key.pem")));
        let err = TlsAcceptor::new(&config).err().unwrap().to_string();
        assert!(err.contains("cert_path"), "{}", err);
    }

    #[test]
    fn test_unreadable_certificate() {
        let config = listen_tls(
            Some(PathBuf::from("/nonexistent/cert.pem")),
            Some(PathBuf::from("/nonexistent/key.pem")),
        );
        let err = TlsAcceptor::new(&config).err().unwrap().to_string();
        assert!(err.starts_with("listener certificate /nonexistent/cert.pem"), "{}", err);
    }

    #[test]
    fn test_certificate_file_without_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        std::fs::write(&cert, "").unwrap();

        let config = listen_tls(Some(cert), Some(dir.path().join("key.pem")));
        let err = TlsAcceptor::new(&config).err().unwrap().to_string();
        assert!(err.contains("no certificates found"), "{}", err);
    }
}
