//! Configuration types

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::fmt;

use crate::tls::TlsServerConfig;

/// Root configuration structure
///
/// # Example
///
/// ```yaml
/// listen:
///   port: 4000
///
/// fallback:
///   username: root
///   password: "123456"
///
/// servers:
///   - name: primary
///     host: 10.0.0.5
///     port: 3306
///     user: app
///     password: "${APP_DB_PASSWORD}"
///     database: appdb
///     charset: utf8mb4
///     timeout: 5s
///     readTimeout: 30s
///     tls: skip-verify
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub listen: ListenConfig,

    /// Credentials that authenticate into the local stub
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Backend servers, matched in order
    #[serde(default)]
    pub servers: Vec<BackendConfig>,
}

impl Config {
    /// Validate the configuration
    ///
    /// Per-backend options (timeouts, TLS mode, collation) are not checked
    /// here; they are reported when a connection to that backend is opened.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen.port == 0 {
            return Err("listen.port must be non-zero".to_string());
        }
        self.listen.tls.validate()?;
        if self.fallback.username.is_empty() {
            return Err("fallback.username must not be empty".to_string());
        }
        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ListenConfig {
    /// Address to listen on
    #[serde(default = "default_listen_address")]
    pub address: String,
    /// Port to listen on
    #[serde(default = "default_listen_port")]
    pub port: u16,
    /// Maximum number of concurrent connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Time allowed for a client to finish the handshake, in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Prepared statements one client may hold open at a time
    #[serde(default = "default_max_prepared_statements")]
    pub max_prepared_statements: usize,
    /// TLS configuration for accepting client connections
    #[serde(default)]
    pub tls: TlsServerConfig,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            port: default_listen_port(),
            max_connections: default_max_connections(),
            handshake_timeout_secs: default_handshake_timeout(),
            max_prepared_statements: default_max_prepared_statements(),
            tls: TlsServerConfig::default(),
        }
    }
}

/// Username and password accepted when no backend matches
#[derive(Clone, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_user", deserialize_with = "scalar_string")]
    pub username: String,
    #[serde(
        default = "default_fallback_password",
        deserialize_with = "scalar_string"
    )]
    pub password: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            username: default_fallback_user(),
            password: default_fallback_password(),
        }
    }
}

impl fmt::Debug for FallbackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One upstream server.
///
/// Field names follow the DSN-style keys operators already use, so
/// `readTimeout` and `writeTimeout` are camelCase. Durations use the
/// `1h30m` / `2.5s` format. Scalars are accepted whatever their YAML type,
/// so `password: 123456` and `tls: true` both work.
#[derive(Clone, Default, Deserialize)]
pub struct BackendConfig {
    #[serde(default, deserialize_with = "scalar_string")]
    pub name: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, deserialize_with = "scalar_string")]
    pub user: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub password: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub database: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub charset: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub collation: String,
    /// Connect timeout
    #[serde(default, deserialize_with = "scalar_string")]
    pub timeout: String,
    #[serde(default, rename = "readTimeout", deserialize_with = "scalar_string")]
    pub read_timeout: String,
    #[serde(default, rename = "writeTimeout", deserialize_with = "scalar_string")]
    pub write_timeout: String,
    /// Time zone for the server's DATETIME values; accepted and ignored
    #[serde(default, deserialize_with = "scalar_string")]
    pub loc: String,
    /// `""`/`false`/`off`, `true`/`on`, or `skip-verify`/`insecure`
    #[serde(default, deserialize_with = "scalar_string")]
    pub tls: String,
}

impl BackendConfig {
    /// Name used in logs: the configured name, or `host:port`.
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            format!("{}:{}", self.host, self.port)
        } else {
            self.name.clone()
        }
    }
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .field("timeout", &self.timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    4000
}

fn default_max_connections() -> usize {
    1000
}

fn default_handshake_timeout() -> u64 {
    30
}

/// MySQL's default `max_prepared_stmt_count`
fn default_max_prepared_statements() -> usize {
    16382
}

fn default_fallback_user() -> String {
    "root".to_string()
}

fn default_fallback_password() -> String {
    "123456".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Deserialize any YAML scalar as its string form; null becomes empty.
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Null => Ok(String::new()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::String(s) => Ok(s),
        other => Err(D::Error::custom(format!(
            "expected a scalar value, found {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_scalars_of_any_type() {
        let yaml = r#"
host: db1
port: 3306
user: app
password: 123456
tls: true
timeout: 0
"#;
        let backend: BackendConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(backend.password, "123456");
        assert_eq!(backend.tls, "true");
        assert_eq!(backend.timeout, "0");
        assert_eq!(backend.database, "");
    }

    #[test]
    fn test_backend_camel_case_timeouts() {
        let yaml = "readTimeout: 30s\nwriteTimeout: 1m\n";
        let backend: BackendConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(backend.read_timeout, "30s");
        assert_eq!(backend.write_timeout, "1m");
    }

    #[test]
    fn test_backend_rejects_nested_value() {
        let yaml = "password: [a, b]\n";
        assert!(serde_yaml::from_str::<BackendConfig>(yaml).is_err());
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let backend = BackendConfig {
            user: "app".into(),
            password: "hunter2".into(),
            ..BackendConfig::default()
        };
        let rendered = format!("{:?}", backend);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("app"));

        let fallback = FallbackConfig::default();
        assert!(!format!("{:?}", fallback).contains("123456"));
    }

    #[test]
    fn test_label() {
        let mut backend = BackendConfig {
            host: "10.0.0.5".into(),
            port: 3306,
            ..BackendConfig::default()
        };
        assert_eq!(backend.label(), "10.0.0.5:3306");
        backend.name = "primary".into();
        assert_eq!(backend.label(), "primary");
    }

    #[test]
    fn test_validate_zero_port() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.listen.port = 0;
        assert!(config.validate().is_err());
    }
}
