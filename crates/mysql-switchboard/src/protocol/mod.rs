//! Wire protocol support.
//!
//! Only the MySQL client/server protocol is spoken; see [`mysql`].

pub mod mysql;
