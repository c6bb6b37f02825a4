//! Handler traits the protocol engine drives.
//!
//! The engine owns the wire: it frames packets, verifies scrambles and
//! numbers statements. Everything that decides *what* a command returns sits
//! behind [`CommandHandler`], and everything that decides *who* may log in
//! sits behind [`AuthHandler`].

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::mysql::{build_ok_packet, OkPacket, ResultSet};
use crate::session::StatementHandle;

/// Result of a query or statement execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResponse {
    /// Command completed without rows
    Ok(OkPacket),
    /// Rows built by the proxy
    ResultSet(ResultSet),
    /// Response payloads received from an upstream server, in order
    Relayed(Vec<Vec<u8>>),
}

impl QueryResponse {
    /// Plain OK with default status flags
    pub fn ok() -> Self {
        QueryResponse::Ok(OkPacket::default())
    }

    /// Payloads to send back to the client, without framing.
    pub fn into_packets(self, capabilities: u32) -> Vec<Vec<u8>> {
        match self {
            QueryResponse::Ok(ok) => vec![build_ok_packet(&ok, capabilities)],
            QueryResponse::ResultSet(rs) => rs.to_packets(),
            QueryResponse::Relayed(packets) => packets,
        }
    }
}

/// A prepared statement as returned by a handler.
///
/// Parameter and column definitions are raw ColumnDefinition41 payloads,
/// without the EOF packets that terminate each block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub handle: StatementHandle,
    pub params: u16,
    pub columns: u16,
    pub param_defs: Vec<Vec<u8>>,
    pub column_defs: Vec<Vec<u8>>,
}

/// Accepted passwords for one user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Plugin the client must answer with
    pub auth_plugin: String,
    /// Sorted, without duplicates
    pub passwords: Vec<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("auth_plugin", &self.auth_plugin)
            .field("passwords", &format_args!("<{} redacted>", self.passwords.len()))
            .finish()
    }
}

/// Who is logging in, and from where.
#[derive(Clone, Default)]
pub struct SessionInfo {
    pub user: String,
    /// Password the client proved knowledge of; empty until verified
    pub password: String,
    /// Proxy address the client connected to
    pub local_addr: Option<SocketAddr>,
    pub peer_addr: Option<SocketAddr>,
}

impl fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInfo")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

impl SessionInfo {
    /// Host part used in access-denied messages
    pub fn peer_host(&self) -> String {
        self.peer_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "localhost".to_string())
    }
}

/// Per-connection command dispatch.
///
/// Commands of one connection arrive strictly in order, but the handler may
/// also be reached from the authentication callback, so methods take `&self`.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// COM_INIT_DB, or the database named in the handshake response
    async fn use_db(&self, database: &str) -> Result<()>;

    /// COM_QUERY
    async fn handle_query(&self, sql: &str) -> Result<QueryResponse>;

    /// COM_FIELD_LIST; returns the column definition payloads
    async fn handle_field_list(&self, table: &str, wildcard: &str) -> Result<Vec<Vec<u8>>>;

    /// COM_STMT_PREPARE
    async fn handle_stmt_prepare(&self, sql: &str) -> Result<PreparedStatement>;

    /// COM_STMT_EXECUTE. `params` is the request body after the statement
    /// id: flags, iteration count, null bitmap, types and values.
    async fn handle_stmt_execute(
        &self,
        handle: &StatementHandle,
        sql: &str,
        params: &[u8],
    ) -> Result<QueryResponse>;

    /// COM_STMT_CLOSE; the client expects no response
    async fn handle_stmt_close(&self, handle: &StatementHandle) -> Result<()>;

    /// Any command the engine does not handle itself
    async fn handle_other_command(&self, command: u8, payload: &[u8]) -> Result<()>;
}

/// Credential lookup and login callbacks.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Passwords accepted for `username`, if the user is known
    fn get_credential(&self, username: &str) -> Option<Credential>;

    /// Called once after the client's password has been verified.
    ///
    /// An error rejects the login even though the password was correct.
    async fn on_auth_success(&self, session: &SessionInfo) -> Result<()>;

    /// Called when a login is rejected
    fn on_auth_failure(&self, session: &SessionInfo, cause: &str);
}
