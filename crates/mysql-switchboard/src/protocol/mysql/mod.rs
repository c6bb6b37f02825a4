//! MySQL protocol implementation
//!
//! This module contains:
//! - Packet structures
//! - Packet parser (read/write)
//! - Authentication scrambles
//! - Locally built result sets

pub mod auth;
pub mod packets;
pub mod parser;
pub mod resultset;

pub use auth::*;
pub use packets::*;
pub use parser::*;
pub use resultset::ResultSet;
