//! Picks the backend for a session once its password has been verified.

use std::sync::Arc;

use async_trait::async_trait;

use super::CredentialSet;
use crate::backend::Catalog;
use crate::config::BackendConfig;
use crate::error::{ProxyError, Result};
use crate::server::{AuthHandler, Credential, SessionInfo};

/// Receives the outcome of backend selection for one session.
#[async_trait]
pub trait BackendSelector: Send + Sync {
    /// Proxy the session to `server`. Fails if the connection cannot be
    /// opened.
    async fn set_upstream(&self, server: &BackendConfig) -> Result<()>;

    /// Serve the session from the local stub.
    async fn set_fallback(&self);
}

/// [`AuthHandler`] for one client connection.
///
/// Nothing is selected until the engine has verified the password, so an
/// unauthenticated client never causes an upstream connection.
pub struct AuthDecisionHandler {
    catalog: Arc<Catalog>,
    credentials: Arc<CredentialSet>,
    selector: Arc<dyn BackendSelector>,
}

impl AuthDecisionHandler {
    pub fn new(
        catalog: Arc<Catalog>,
        credentials: Arc<CredentialSet>,
        selector: Arc<dyn BackendSelector>,
    ) -> Self {
        Self {
            catalog,
            credentials,
            selector,
        }
    }
}

#[async_trait]
impl AuthHandler for AuthDecisionHandler {
    fn get_credential(&self, username: &str) -> Option<Credential> {
        self.credentials.get(username).cloned()
    }

    async fn on_auth_success(&self, session: &SessionInfo) -> Result<()> {
        match self
            .catalog
            .find(session.local_addr, &session.user, &session.password)
        {
            Some(server) => {
                info!(
                    "Auth matched upstream user={} host={} port={}",
                    server.user, server.host, server.port
                );
                self.selector
                    .set_upstream(server)
                    .await
                    .map_err(|e| ProxyError::Auth(format!("connect upstream: {}", e)))
            }
            None => {
                info!("Auth fell back to local handler user={}", session.user);
                self.selector.set_fallback().await;
                Ok(())
            }
        }
    }

    fn on_auth_failure(&self, session: &SessionInfo, cause: &str) {
        warn!(
            "Auth failed for user={} from={}: {}",
            session.user,
            session.peer_host(),
            cause
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, PartialEq)]
    enum Call {
        Upstream(String),
        Fallback,
    }

    #[derive(Default)]
    struct RecordingSelector {
        calls: Mutex<Vec<Call>>,
        fail: bool,
    }

    #[async_trait]
    impl BackendSelector for RecordingSelector {
        async fn set_upstream(&self, server: &BackendConfig) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Upstream(server.name.clone()));
            if self.fail {
                return Err(ProxyError::Connection("connection refused".into()));
            }
            Ok(())
        }

        async fn set_fallback(&self) {
            self.calls.lock().unwrap().push(Call::Fallback);
        }
    }

    fn handler(selector: Arc<RecordingSelector>) -> AuthDecisionHandler {
        let catalog = Arc::new(Catalog::new(vec![BackendConfig {
            name: "primary".into(),
            host: "10.0.0.5".into(),
            port: 3306,
            user: "app".into(),
            password: "secret".into(),
            ..BackendConfig::default()
        }]));
        let credentials = Arc::new(CredentialSet::build(&catalog, "root", "123456"));
        AuthDecisionHandler::new(catalog, credentials, selector)
    }

    fn session(user: &str, password: &str) -> SessionInfo {
        SessionInfo {
            user: user.into(),
            password: password.into(),
            local_addr: Some("10.0.0.5:3306".parse().unwrap()),
            peer_addr: Some("10.9.9.9:50000".parse().unwrap()),
        }
    }

    #[tokio::test]
    async fn test_matching_backend_selects_upstream() {
        let selector = Arc::new(RecordingSelector::default());
        let handler = handler(selector.clone());

        handler.on_auth_success(&session("app", "secret")).await.unwrap();
        assert_eq!(
            *selector.calls.lock().unwrap(),
            vec![Call::Upstream("primary".into())]
        );
    }

    #[tokio::test]
    async fn test_fallback_pair_selects_fallback() {
        let selector = Arc::new(RecordingSelector::default());
        let handler = handler(selector.clone());

        handler.on_auth_success(&session("root", "123456")).await.unwrap();
        assert_eq!(*selector.calls.lock().unwrap(), vec![Call::Fallback]);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_auth_error() {
        let selector = Arc::new(RecordingSelector {
            fail: true,
            ..RecordingSelector::default()
        });
        let handler = handler(selector.clone());

        let err = handler
            .on_auth_success(&session("app", "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Auth(_)));
        assert!(err.to_string().contains("connect upstream"), "{}", err);
    }

    #[test]
    fn test_failure_and_lookup_touch_no_selector() {
        let selector = Arc::new(RecordingSelector::default());
        let handler = handler(selector.clone());

        assert!(handler.get_credential("app").is_some());
        assert!(handler.get_credential("root").is_some());
        assert!(handler.get_credential("mallory").is_none());
        handler.on_auth_failure(&session("mallory", ""), "unknown user");
        assert!(selector.calls.lock().unwrap().is_empty());
    }
}
