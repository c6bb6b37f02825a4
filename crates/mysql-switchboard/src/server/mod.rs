//! Server side of the proxy
//!
//! This module contains:
//! - TCP listener and per-connection setup
//! - Protocol engine (handshake, command decoding)
//! - Handler traits the engine dispatches to
//! - Network stream abstraction (TCP/TLS)

pub mod engine;
mod handler;
pub mod listener;
pub mod stream;

pub use engine::{serve, ServeOptions};
pub use handler::{AuthHandler, CommandHandler, Credential, PreparedStatement, QueryResponse, SessionInfo};
pub use listener::{Listener, ListenerStats};
pub use stream::NetworkStream;
