//! Authentication: which passwords the proxy accepts, and what a successful
//! login selects.
//!
//! - [`CredentialSet`] - accepted passwords per user, built from the catalog
//!   plus the fallback pair
//! - [`AuthDecisionHandler`] - the engine's [`AuthHandler`](crate::server::AuthHandler);
//!   after a verified login it matches a backend and tells the session
//!   through [`BackendSelector`]

mod credentials;
pub mod decision;

pub use credentials::CredentialSet;
pub use decision::{AuthDecisionHandler, BackendSelector};
