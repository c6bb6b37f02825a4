//! Passwords the proxy accepts, per user.
//!
//! Every backend contributes its user and password; the fallback pair is
//! added on top. A user may therefore have several accepted passwords, one
//! per distinct backend password.

use std::collections::{BTreeSet, HashMap};

use crate::backend::Catalog;
use crate::protocol::mysql::NATIVE_PASSWORD_PLUGIN;
use crate::server::Credential;

/// Accepted passwords keyed by username. Read-only once built.
///
/// # Example
///
/// ```
/// use mysql_switchboard::auth::CredentialSet;
/// use mysql_switchboard::backend::Catalog;
/// use mysql_switchboard::config::BackendConfig;
///
/// let catalog = Catalog::new(vec![BackendConfig {
///     user: "app".into(),
///     password: "secret".into(),
///     ..BackendConfig::default()
/// }]);
/// let creds = CredentialSet::build(&catalog, "root", "123456");
///
/// assert_eq!(creds.get("app").unwrap().passwords, vec!["secret"]);
/// assert!(creds.get("nobody").is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CredentialSet {
    users: HashMap<String, Credential>,
}

impl CredentialSet {
    /// Collect the credentials of every backend plus the fallback pair.
    ///
    /// Entries with an empty username are skipped.
    pub fn build(catalog: &Catalog, fallback_user: &str, fallback_password: &str) -> Self {
        let mut passwords: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        let pairs = catalog
            .servers()
            .iter()
            .map(|server| (server.user.as_str(), server.password.as_str()))
            .chain(std::iter::once((fallback_user, fallback_password)));
        for (user, password) in pairs {
            if user.is_empty() {
                continue;
            }
            passwords.entry(user).or_default().insert(password);
        }

        let users = passwords
            .into_iter()
            .map(|(user, set)| {
                let credential = Credential {
                    auth_plugin: NATIVE_PASSWORD_PLUGIN.to_string(),
                    passwords: set.into_iter().map(str::to_string).collect(),
                };
                (user.to_string(), credential)
            })
            .collect();
        Self { users }
    }

    pub fn get(&self, user: &str) -> Option<&Credential> {
        self.users.get(user)
    }

    /// Number of distinct users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
