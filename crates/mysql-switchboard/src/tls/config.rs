//! TLS configuration types
//!
//! - `TlsServerConfig` for accepting TLS connections from clients
//! - `TlsMode` for the per-backend `tls:` setting used when dialing upstream

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::TlsError;

/// Server-side TLS configuration (proxy accepting client connections)
///
/// When enabled, the greeting advertises `CLIENT_SSL` and clients may upgrade
/// with an SSLRequest. Clients that do not ask for TLS still connect in
/// plain text.
///
/// # Example YAML
/// ```yaml
/// listen:
///   port: 4000
///   tls:
///     enabled: true
///     cert_path: "/path/to/server.crt"
///     key_path: "/path/to/server.key"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TlsServerConfig {
    /// Enable TLS for client connections
    #[serde(default)]
    pub enabled: bool,

    /// Path to server certificate in PEM format
    pub cert_path: Option<PathBuf>,

    /// Path to server private key in PEM format
    pub key_path: Option<PathBuf>,
}

impl TlsServerConfig {
    /// Validate the server TLS configuration
    ///
    /// Returns an error if TLS is enabled but required paths are missing.
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled {
            if self.cert_path.is_none() {
                return Err("TLS enabled but cert_path not specified".to_string());
            }
            if self.key_path.is_none() {
                return Err("TLS enabled but key_path not specified".to_string());
            }
        }
        Ok(())
    }
}

/// How the proxy secures its connection to one backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Plain TCP
    #[default]
    Disabled,
    /// TLS with certificate and hostname verification against webpki roots
    Verify,
    /// TLS that accepts any certificate
    SkipVerify,
}

impl TlsMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, TlsMode::Disabled)
    }
}

impl FromStr for TlsMode {
    type Err = TlsError;

    /// Parse the loosely typed `tls:` value of a backend.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "0" | "off" | "disable" | "disabled" => Ok(TlsMode::Disabled),
            "true" | "1" | "on" | "enable" | "enabled" => Ok(TlsMode::Verify),
            "skip-verify" | "insecure" => Ok(TlsMode::SkipVerify),
            _ => Err(TlsError::InvalidMode(value.to_string())),
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsMode::Disabled => write!(f, "disabled"),
            TlsMode::Verify => write!(f, "verify"),
            TlsMode::SkipVerify => write!(f, "skip-verify"),
        }
    }
}
