//! mysql-switchboard - MySQL proxy that picks its upstream from the login
//!
//! A client authenticates against the proxy with any user/password pair
//! listed in the backend catalog, or with the fallback pair:
//! - If the pair matches a backend, the session becomes a relay to that
//!   server for its whole lifetime ([`session::Mode::Proxy`])
//! - Otherwise the session is answered by a small local stub
//!   ([`session::Mode::Fallback`])
//!
//! The decision is made exactly once, after the password has been verified.

#[macro_use]
mod logging;

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tls;

pub use auth::{AuthDecisionHandler, CredentialSet};
pub use backend::Catalog;
pub use config::Config;
pub use error::{ProxyError, Result};
pub use server::{Listener, NetworkStream};
pub use session::SessionRouter;
pub use tls::{TlsAcceptor, TlsConnector, TlsError, TlsMode, TlsServerConfig};
