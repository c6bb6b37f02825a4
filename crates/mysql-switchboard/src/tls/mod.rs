//! TLS/SSL support
//!
//! - **Server-side TLS**: clients may upgrade with an SSLRequest when the
//!   listener has a certificate configured.
//! - **Client-side TLS**: each backend's `tls:` value selects plain TCP,
//!   verified TLS, or TLS without certificate checks.
//!
//! ```text
//! ┌──────────┐        TLS        ┌───────────┐        TLS        ┌──────────┐
//! │  Client  │ ───────────────── │   Proxy   │ ───────────────── │ Backend  │
//! │ (MySQL)  │   (server-side)   │           │   (client-side)   │  Server  │
//! └──────────┘                   └───────────┘                   └──────────┘
//! ```

mod acceptor;
mod config;
mod connector;
mod error;

pub use acceptor::TlsAcceptor;
pub use config::{TlsMode, TlsServerConfig};
pub use connector::TlsConnector;
pub use error::TlsError;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load certificates (including chains) from a PEM file
pub(crate) fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))
}

/// Load a private key (RSA, PKCS8 or EC) from a PEM file
pub(crate) fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::key_load(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::key_load(path, e.to_string()))?
        .ok_or_else(|| TlsError::key_load(path, "no private key found in file"))
}
