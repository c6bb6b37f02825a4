//! Per-backend connection options parsed from a [`BackendConfig`].

use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::{ProxyError, Result};
use crate::protocol::mysql::UTF8MB4_GENERAL_CI;
use crate::tls::TlsMode;

/// Host used when a backend leaves `host` empty
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Port used when a backend leaves `port` at zero
pub const DEFAULT_PORT: u16 = 3306;
/// Connect timeout used when a backend leaves `timeout` empty
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Charset used for `SET NAMES` when only a collation is configured and the
/// collation is not in the table below
const DEFAULT_CHARSET: &str = "utf8mb4";

/// Known collations: name, id sent in the handshake, character set.
const COLLATIONS: &[(&str, u8, &str)] = &[
    ("big5_chinese_ci", 1, "big5"),
    ("latin1_swedish_ci", 8, "latin1"),
    ("ascii_general_ci", 11, "ascii"),
    ("gbk_chinese_ci", 28, "gbk"),
    ("utf8_general_ci", 33, "utf8"),
    ("utf8mb3_general_ci", 33, "utf8mb3"),
    ("utf8mb4_general_ci", 45, "utf8mb4"),
    ("utf8mb4_bin", 46, "utf8mb4"),
    ("latin1_bin", 47, "latin1"),
    ("binary", 63, "binary"),
    ("ascii_bin", 65, "ascii"),
    ("utf8_bin", 83, "utf8"),
    ("utf8mb3_bin", 83, "utf8mb3"),
    ("gbk_bin", 87, "gbk"),
    ("utf8_unicode_ci", 192, "utf8"),
    ("utf8mb3_unicode_ci", 192, "utf8mb3"),
    ("utf8mb4_unicode_ci", 224, "utf8mb4"),
    ("utf8mb4_unicode_520_ci", 246, "utf8mb4"),
    ("utf8mb4_0900_ai_ci", 255, "utf8mb4"),
];

/// Resolved connection options for one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub tls: TlsMode,
    /// Character set id sent in the handshake response
    pub collation_id: u8,
    /// Statement run right after login, if any
    pub set_names: Option<String>,
}

impl BackendOptions {
    /// Resolve and validate the options of a backend.
    ///
    /// Errors name the offending field so operators can find the bad value.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let connect_timeout = match config.timeout.as_str() {
            "" => DEFAULT_CONNECT_TIMEOUT,
            value => parse_duration(value).map_err(|e| {
                ProxyError::Config(format!("invalid timeout {:?}: {}", value, e))
            })?,
        };
        let read_timeout = optional_duration("readTimeout", &config.read_timeout)?;
        let write_timeout = optional_duration("writeTimeout", &config.write_timeout)?;

        let tls: TlsMode = config.tls.parse()?;

        let collation = match config.collation.as_str() {
            "" => None,
            name => Some(lookup_collation(name).ok_or_else(|| {
                ProxyError::Config(format!("invalid collation {:?}", name))
            })?),
        };

        let set_names = if !config.charset.is_empty() || collation.is_some() {
            let charset = if !config.charset.is_empty() {
                config.charset.as_str()
            } else {
                collation.map(|(_, charset)| charset).unwrap_or(DEFAULT_CHARSET)
            };
            Some(if config.collation.is_empty() {
                format!("SET NAMES {}", charset)
            } else {
                format!("SET NAMES {} COLLATE {}", charset, config.collation)
            })
        } else {
            None
        };

        Ok(Self {
            host: if config.host.is_empty() {
                DEFAULT_HOST.to_string()
            } else {
                config.host.clone()
            },
            port: if config.port == 0 {
                DEFAULT_PORT
            } else {
                config.port
            },
            user: config.user.clone(),
            password: config.password.clone(),
            database: Some(config.database.clone()).filter(|db| !db.is_empty()),
            connect_timeout,
            read_timeout,
            write_timeout,
            tls,
            collation_id: collation.map(|(id, _)| id).unwrap_or(UTF8MB4_GENERAL_CI),
            set_names,
        })
    }

    /// `host:port` with IPv6 hosts bracketed
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn optional_duration(field: &str, value: &str) -> Result<Option<Duration>> {
    if value.is_empty() {
        return Ok(None);
    }
    parse_duration(value)
        .map(Some)
        .map_err(|e| ProxyError::Config(format!("invalid {} {:?}: {}", field, value, e)))
}

fn lookup_collation(name: &str) -> Option<(u8, &'static str)> {
    COLLATIONS
        .iter()
        .find(|(known, _, _)| known.eq_ignore_ascii_case(name))
        .map(|(_, id, charset)| (*id, *charset))
}

/// Parse a duration such as `300ms`, `1.5s` or `1h30m`.
///
/// A duration is a sequence of decimal numbers, each with an optional
/// fraction and a unit: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare
/// `0` is allowed. Negative durations are rejected.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s.starts_with('-') {
        return Err("negative duration".to_string());
    }
    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest.is_empty() {
        return Err("missing value".to_string());
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_len];
        if number.is_empty() || number == "." {
            return Err(format!("invalid duration {:?}", input));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration {:?}", input))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "" => return Err(format!("missing unit in duration {:?}", input)),
            other => return Err(format!("unknown unit {:?} in duration {:?}", other, input)),
        };
        rest = &rest[unit_len..];
        total_nanos += value * scale;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("invalid duration {:?}", input));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}
