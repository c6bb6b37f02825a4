//! Errors raised while setting up TLS on either side of the proxy.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    /// `listen.tls.cert_path` could not be loaded
    #[error("listener certificate {path}: {reason}")]
    CertificateLoad { path: PathBuf, reason: String },

    /// `listen.tls.key_path` could not be loaded
    #[error("listener private key {path}: {reason}")]
    PrivateKeyLoad { path: PathBuf, reason: String },

    /// The peer broke off the TLS handshake, client or backend side
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// `listen.tls` settings or a rustls config that could not be built
    #[error("TLS configuration error: {0}")]
    Config(String),

    /// Backend `tls:` value that names no [`TlsMode`](super::TlsMode)
    #[error("invalid tls value \"{0}\"")]
    InvalidMode(String),
}

impl TlsError {
    pub fn cert_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::CertificateLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn key_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TlsError::PrivateKeyLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn handshake(reason: impl Into<String>) -> Self {
        TlsError::Handshake(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        TlsError::Config(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_file_errors_name_the_path() {
        let err = TlsError::cert_load("/etc/switchboard/cert.pem", "file not found");
        assert_eq!(
            err.to_string(),
            "listener certificate /etc/switchboard/cert.pem: file not found"
        );

        let err = TlsError::key_load("/etc/switchboard/key.pem", "no private key found in file");
        assert!(err.to_string().starts_with("listener private key /etc/switchboard/key.pem"));
    }
}
