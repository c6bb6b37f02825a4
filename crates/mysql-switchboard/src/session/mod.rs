//! Session state: which responder a client connection talks to.
//!
//! - [`SessionRouter`] - per-connection mode and routing
//! - [`LocalResponder`] - stub used when no backend matched
//! - [`Responder`] - what both the stub and an upstream connection provide
//! - [`StatementHandle`] - prepared statement ids tagged by their owner

pub mod local;
mod responder;
pub mod router;
mod statement;

pub use local::LocalResponder;
pub use responder::Responder;
pub use router::{Mode, RouterState, SessionRouter};
pub use statement::StatementHandle;
