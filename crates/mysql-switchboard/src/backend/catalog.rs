//! The configured backend list and the rules for picking one.

use std::net::SocketAddr;

use super::options::BackendOptions;
use super::upstream::UpstreamConnection;
use crate::config::BackendConfig;
use crate::error::Result;

/// Ordered, immutable list of backends.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    servers: Vec<BackendConfig>,
}

impl Catalog {
    pub fn new(servers: Vec<BackendConfig>) -> Self {
        Self { servers }
    }

    pub fn servers(&self) -> &[BackendConfig] {
        &self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Find the backend for a login.
    ///
    /// User and password must match exactly. A backend whose host or port
    /// disagrees with `local_addr` is only used when no backend agrees; among
    /// those, the first configured wins. Empty hosts and zero ports agree
    /// with everything.
    pub fn find(
        &self,
        local_addr: Option<SocketAddr>,
        user: &str,
        password: &str,
    ) -> Option<&BackendConfig> {
        let host = local_addr.map(|addr| addr.ip().to_string()).unwrap_or_default();
        let port = local_addr.map(|addr| addr.port()).unwrap_or_default();

        let mut soft = None;
        for server in &self.servers {
            if server.user != user || server.password != password {
                continue;
            }
            let host_differs = !server.host.is_empty()
                && !host.is_empty()
                && !server.host.eq_ignore_ascii_case(&host);
            let port_differs = server.port != 0 && port != 0 && server.port != port;
            if host_differs || port_differs {
                soft.get_or_insert(server);
                continue;
            }
            trace!("Backend {} matches {}@{}:{}", server.label(), user, host, port);
            return Some(server);
        }

        if let Some(server) = soft {
            trace!(
                "No backend bound to {}:{}, using {} for {}",
                host,
                port,
                server.label(),
                user
            );
        }
        soft
    }

    /// Open a logged-in connection to `server`.
    pub async fn connect(&self, server: &BackendConfig) -> Result<UpstreamConnection> {
        let options = BackendOptions::from_config(server)?;
        UpstreamConnection::connect(&options).await
    }

    /// Problems with per-backend options, one message per backend.
    ///
    /// These do not stop startup; the same errors are returned when a
    /// session first connects to the backend.
    pub fn check(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter_map(|server| {
                BackendOptions::from_config(server)
                    .err()
                    .map(|e| format!("backend {}: {}", server.label(), e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(name: &str, host: &str, port: u16, user: &str, password: &str) -> BackendConfig {
        BackendConfig {
            name: name.into(),
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            ..BackendConfig::default()
        }
    }

    fn addr(s: &str) -> Option<SocketAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_strict_match() {
        let catalog = Catalog::new(vec![backend("a", "10.0.0.5", 3306, "app", "secret")]);
        let found = catalog.find(addr("10.0.0.5:3306"), "app", "secret").unwrap();
        assert_eq!(found.name, "a");
    }

    #[test]
    fn test_wrong_password_is_not_found() {
        let catalog = Catalog::new(vec![backend("a", "10.0.0.5", 3306, "app", "secret")]);
        assert!(catalog.find(addr("10.0.0.5:3306"), "app", "nope").is_none());
        assert!(catalog.find(addr("10.0.0.5:3306"), "root", "123456").is_none());
    }

    #[test]
    fn test_address_match_preferred_over_order() {
        let catalog = Catalog::new(vec![
            backend("first", "10.0.0.1", 3306, "svc", "pw"),
            backend("second", "10.0.0.2", 3306, "svc", "pw"),
        ]);
        let found = catalog.find(addr("10.0.0.2:3306"), "svc", "pw").unwrap();
        assert_eq!(found.name, "second");
    }

    #[test]
    fn test_soft_match_returns_first_candidate() {
        let catalog = Catalog::new(vec![
            backend("first", "10.0.0.1", 3306, "svc", "pw"),
            backend("second", "10.0.0.2", 3306, "svc", "pw"),
        ]);
        let found = catalog.find(addr("192.168.1.1:4000"), "svc", "pw").unwrap();
        assert_eq!(found.name, "first");
    }

    #[test]
    fn test_port_mismatch_is_soft() {
        let catalog = Catalog::new(vec![
            backend("other-port", "10.0.0.5", 3307, "svc", "pw"),
            backend("same-port", "10.0.0.5", 3306, "svc", "pw"),
        ]);
        let found = catalog.find(addr("10.0.0.5:3306"), "svc", "pw").unwrap();
        assert_eq!(found.name, "same-port");
    }

    #[test]
    fn test_empty_host_and_zero_port_match_anything() {
        let catalog = Catalog::new(vec![
            backend("pinned", "10.0.0.9", 3306, "svc", "pw"),
            backend("open", "", 0, "svc", "pw"),
        ]);
        let found = catalog.find(addr("10.0.0.5:4000"), "svc", "pw").unwrap();
        assert_eq!(found.name, "open");

        let found = catalog.find(None, "svc", "pw").unwrap();
        assert_eq!(found.name, "pinned");
    }

    #[test]
    fn test_host_comparison_ignores_case() {
        let catalog = Catalog::new(vec![
            backend("v6", "FE80::1", 0, "svc", "pw"),
            backend("other", "10.0.0.1", 0, "svc", "pw"),
        ]);
        let found = catalog.find(addr("[fe80::1]:4000"), "svc", "pw").unwrap();
        assert_eq!(found.name, "v6");
    }

    #[test]
    fn test_check_reports_bad_options() {
        let mut bad = backend("bad", "db", 3306, "app", "pw");
        bad.timeout = "forever".into();
        let catalog = Catalog::new(vec![backend("good", "db", 3306, "app", "pw"), bad]);

        let warnings = catalog.check();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("backend bad:"), "{}", warnings[0]);
    }
}
