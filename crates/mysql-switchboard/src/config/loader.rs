//! Configuration loader

use super::Config;
use crate::error::{ProxyError, Result};
use std::path::Path;

/// Load configuration from a YAML file
///
/// Also applies SWITCHBOARD_* env var overrides after loading.
pub fn load_config(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ProxyError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    load_config_from_str(&contents)
}

/// Load configuration from a YAML string (useful for testing)
///
/// An empty document yields the default configuration.
pub fn load_config_from_str(yaml: &str) -> Result<Config> {
    let mut config: Config = if yaml.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(yaml)?
    };
    resolve_config_env_vars(&mut config);
    apply_env_overrides(&mut config);
    config.validate().map_err(ProxyError::Config)?;
    Ok(config)
}

/// Apply SWITCHBOARD_* environment variable overrides to a config.
///
/// Supported env vars:
/// - `SWITCHBOARD_LISTEN_ADDRESS` - Override listen address
/// - `SWITCHBOARD_LISTEN_PORT` - Override listen port
/// - `SWITCHBOARD_MAX_CONNECTIONS` - Override max connections
/// - `SWITCHBOARD_LOG_LEVEL` - Override log level
/// - `SWITCHBOARD_FALLBACK_USER` - Override fallback username
/// - `SWITCHBOARD_FALLBACK_PASSWORD` - Override fallback password
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("SWITCHBOARD_LISTEN_ADDRESS") {
        debug!("Overriding listen address from SWITCHBOARD_LISTEN_ADDRESS");
        config.listen.address = val;
    }
    if let Ok(val) = std::env::var("SWITCHBOARD_LISTEN_PORT") {
        match val.parse::<u16>() {
            Ok(port) => {
                debug!("Overriding listen port from SWITCHBOARD_LISTEN_PORT");
                config.listen.port = port;
            }
            Err(_) => warn!("Ignoring SWITCHBOARD_LISTEN_PORT={:?}: not a port", val),
        }
    }
    if let Ok(val) = std::env::var("SWITCHBOARD_MAX_CONNECTIONS") {
        if let Ok(max) = val.parse::<usize>() {
            debug!("Overriding max_connections from SWITCHBOARD_MAX_CONNECTIONS");
            config.listen.max_connections = max;
        }
    }
    if let Ok(val) = std::env::var("SWITCHBOARD_LOG_LEVEL") {
        debug!("Overriding log level from SWITCHBOARD_LOG_LEVEL");
        config.logging.level = val;
    }
    if let Ok(val) = std::env::var("SWITCHBOARD_FALLBACK_USER") {
        debug!("Overriding fallback username from SWITCHBOARD_FALLBACK_USER");
        config.fallback.username = val;
    }
    if let Ok(val) = std::env::var("SWITCHBOARD_FALLBACK_PASSWORD") {
        debug!("Overriding fallback password from SWITCHBOARD_FALLBACK_PASSWORD");
        config.fallback.password = val;
    }
}

/// Resolve environment variables in a string value
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - curly brace syntax
/// - `$VAR_NAME` - simple syntax (whole value must be the variable reference)
///
/// If the environment variable is not set, the original value is preserved.
fn resolve_env_var(value: &str) -> String {
    let var_name = if let Some(inner) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        inner
    } else if let Some(inner) = value.strip_prefix('$') {
        if inner.is_empty() || inner.contains(' ') {
            return value.to_string();
        }
        inner
    } else {
        return value.to_string();
    };

    match std::env::var(var_name) {
        Ok(env_value) => {
            debug!("Resolved env var {} from config", var_name);
            env_value
        }
        Err(_) => {
            debug!("Env var {} not set, keeping original value", var_name);
            value.to_string()
        }
    }
}

/// Resolve environment variables in all config fields that support it
fn resolve_config_env_vars(config: &mut Config) {
    for server in &mut config.servers {
        server.host = resolve_env_var(&server.host);
        server.user = resolve_env_var(&server.user);
        server.password = resolve_env_var(&server.password);
        server.database = resolve_env_var(&server.database);
    }
    config.fallback.username = resolve_env_var(&config.fallback.username);
    config.fallback.password = resolve_env_var(&config.fallback.password);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_config_servers_in_order() {
        let yaml = r#"
servers:
  - name: first
    host: 10.0.0.5
    port: 3306
    user: app
    password: secret
    database: appdb
  - name: second
    host: 10.0.0.6
    user: app
    password: secret
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].name, "first");
        assert_eq!(config.servers[0].database, "appdb");
        assert_eq!(config.servers[1].name, "second");
        assert_eq!(config.servers[1].port, 0);
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config_from_str("servers: []\n").unwrap();
        assert_eq!(config.listen.address, "0.0.0.0");
        assert_eq!(config.listen.port, 4000);
        assert_eq!(config.listen.max_connections, 1000);
        assert_eq!(config.fallback.username, "root");
        assert_eq!(config.fallback.password, "123456");
        assert_eq!(config.logging.level, "info");
        assert!(!config.listen.tls.enabled);
    }

    #[test]
    fn test_load_config_empty_document() {
        let config = load_config_from_str("").unwrap();
        assert!(config.servers.is_empty());
    }

    #[test]
    fn test_load_config_malformed_is_error() {
        let err = load_config_from_str("servers: {name: [").unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));

        let err = load_config_from_str("servers:\n  - port: not-a-port\n").unwrap_err();
        assert!(matches!(err, ProxyError::Config(_)));
    }

    #[test]
    fn test_load_config_tls_without_cert_is_error() {
        let yaml = "listen:\n  tls:\n    enabled: true\n";
        let err = load_config_from_str(yaml).unwrap_err();
        assert!(err.to_string().contains("cert_path"));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "listen:\n  port: 4406\nservers:\n  - host: db\n    user: u\n    password: p"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listen.port, 4406);
        assert_eq!(config.servers[0].host, "db");
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/nonexistent/switchboard.yaml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/switchboard.yaml"));
    }

    #[test]
    fn test_resolve_env_var_curly_brace_syntax() {
        std::env::set_var("SWB_TEST_DB_PASSWORD", "env_secret_123");
        assert_eq!(resolve_env_var("${SWB_TEST_DB_PASSWORD}"), "env_secret_123");
        std::env::remove_var("SWB_TEST_DB_PASSWORD");
    }

    #[test]
    fn test_resolve_env_var_simple_syntax() {
        std::env::set_var("SWB_TEST_DB_USER", "env_user");
        assert_eq!(resolve_env_var("$SWB_TEST_DB_USER"), "env_user");
        std::env::remove_var("SWB_TEST_DB_USER");
    }

    #[test]
    fn test_resolve_env_var_not_set() {
        std::env::remove_var("SWB_NONEXISTENT_VAR_12345");
        assert_eq!(
            resolve_env_var("${SWB_NONEXISTENT_VAR_12345}"),
            "${SWB_NONEXISTENT_VAR_12345}"
        );
        assert_eq!(
            resolve_env_var("$SWB_NONEXISTENT_VAR_12345"),
            "$SWB_NONEXISTENT_VAR_12345"
        );
    }

    #[test]
    fn test_resolve_env_var_plain_value() {
        assert_eq!(resolve_env_var("plain_password"), "plain_password");
        assert_eq!(resolve_env_var("$"), "$");
        assert_eq!(resolve_env_var("$not a var"), "$not a var");
    }

    #[test]
    fn test_load_config_with_env_vars() {
        std::env::set_var("SWB_TEST_BACKEND_PASS", "secret_from_env");

        let yaml = r#"
servers:
  - host: localhost
    user: app
    password: "${SWB_TEST_BACKEND_PASS}"
"#;
        let config = load_config_from_str(yaml).unwrap();
        assert_eq!(config.servers[0].password, "secret_from_env");

        std::env::remove_var("SWB_TEST_BACKEND_PASS");
    }
}
