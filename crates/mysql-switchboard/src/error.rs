//! Error types for mysql-switchboard

use thiserror::Error;

use crate::protocol::mysql::packets::{
    ErrPacket, ER_ACCESS_DENIED_ERROR, ER_UNKNOWN_ERROR, ER_UNKNOWN_STMT_HANDLER,
};
use crate::tls::TlsError;

/// Main error type for the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol parsing error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// ERR packet returned by an upstream server
    #[error("ERROR {code} ({state}): {message}")]
    Server {
        code: u16,
        state: String,
        message: String,
    },

    /// Command byte the session does not route
    #[error("command {command} is not supported now")]
    UnsupportedCommand { command: u8, payload: Vec<u8> },

    /// Request the local responder refuses
    #[error("{0}")]
    Unsupported(String),

    /// Prepared statement handle used against the wrong responder
    #[error("invalid statement context: {0}")]
    StatementMismatch(String),

    /// Statement id the client never prepared
    #[error("Unknown prepared statement handler ({0}) given to mysqld_stmt_execute")]
    UnknownStatement(u32),
}

/// Result type alias for ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        ProxyError::Config(err.to_string())
    }
}

impl ProxyError {
    /// Wrap an ERR packet received from an upstream server.
    pub fn from_server(err: &ErrPacket) -> Self {
        ProxyError::Server {
            code: err.error_code,
            state: String::from_utf8_lossy(&err.sql_state).to_string(),
            message: err.error_message.clone(),
        }
    }

    /// Map this error onto the ERR packet sent to the client.
    ///
    /// Upstream errors keep their code and SQL state so clients see what the
    /// real server said. Everything else is reported as `ER_UNKNOWN_ERROR`.
    pub fn to_err_packet(&self) -> ErrPacket {
        match self {
            ProxyError::Server {
                code,
                state,
                message,
            } => ErrPacket::with_state(*code, state, message.clone()),
            ProxyError::UnknownStatement(_) => {
                ErrPacket::new(ER_UNKNOWN_STMT_HANDLER, self.to_string())
            }
            ProxyError::Auth(message) => {
                ErrPacket::with_state(ER_ACCESS_DENIED_ERROR, "28000", message.clone())
            }
            _ => ErrPacket::new(ER_UNKNOWN_ERROR, self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_keeps_code_and_state() {
        let err = ProxyError::Server {
            code: 1146,
            state: "42S02".into(),
            message: "Table 'app.nope' doesn't exist".into(),
        };
        let packet = err.to_err_packet();
        assert_eq!(packet.error_code, 1146);
        assert_eq!(&packet.sql_state, b"42S02");
        assert_eq!(packet.error_message, "Table 'app.nope' doesn't exist");
    }

    #[test]
    fn test_unsupported_command_message() {
        let err = ProxyError::UnsupportedCommand {
            command: 0x09,
            payload: Vec::new(),
        };
        let packet = err.to_err_packet();
        assert_eq!(packet.error_code, ER_UNKNOWN_ERROR);
        assert_eq!(packet.error_message, "command 9 is not supported now");
    }

    #[test]
    fn test_unknown_statement_code() {
        let packet = ProxyError::UnknownStatement(7).to_err_packet();
        assert_eq!(packet.error_code, ER_UNKNOWN_STMT_HANDLER);
        assert!(packet.error_message.contains("(7)"));
    }

    #[test]
    fn test_unsupported_is_plain_message() {
        let packet = ProxyError::Unsupported("not supported now".into()).to_err_packet();
        assert_eq!(packet.error_code, ER_UNKNOWN_ERROR);
        assert_eq!(packet.error_message, "not supported now");
    }
}
