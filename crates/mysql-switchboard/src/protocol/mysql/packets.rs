//! MySQL packet structures
//!
//! This module defines the wire protocol structures exchanged with clients
//! and with upstream servers.
//! Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_packets.html>

/// MySQL packet header (4 bytes)
#[derive(Debug, Clone)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence ID (1 byte)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Maximum payload size of a single frame (2^24 - 1)
    pub const MAX_PAYLOAD_LENGTH: u32 = 0xFF_FF_FF;

    /// Create a new packet header
    pub fn new(payload_length: u32, sequence_id: u8) -> Self {
        Self {
            payload_length,
            sequence_id,
        }
    }

    /// Sequence id the peer must use for the next packet in this exchange
    pub fn next_sequence(&self) -> u8 {
        self.sequence_id.wrapping_add(1)
    }
}

/// MySQL Handshake V10 packet (server -> client)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_v10.html>
#[derive(Debug, Clone)]
pub struct HandshakeV10 {
    /// Protocol version (always 10)
    pub protocol_version: u8,
    /// Server version string (null-terminated)
    pub server_version: String,
    /// Connection ID
    pub connection_id: u32,
    /// First 8 bytes of auth plugin data (scramble)
    pub auth_plugin_data_part_1: [u8; 8],
    /// Capability flags (lower 2 bytes)
    pub capability_flags_lower: u16,
    /// Character set
    pub character_set: u8,
    /// Status flags
    pub status_flags: u16,
    /// Capability flags (upper 2 bytes)
    pub capability_flags_upper: u16,
    /// Length of auth plugin data (if CLIENT_PLUGIN_AUTH)
    pub auth_plugin_data_length: u8,
    /// Rest of auth plugin data (if CLIENT_SECURE_CONNECTION)
    pub auth_plugin_data_part_2: Vec<u8>,
    /// Auth plugin name (if CLIENT_PLUGIN_AUTH)
    pub auth_plugin_name: String,
}

impl Default for HandshakeV10 {
    fn default() -> Self {
        Self {
            protocol_version: 10,
            server_version: SERVER_VERSION.to_string(),
            connection_id: 1,
            auth_plugin_data_part_1: [0u8; 8],
            capability_flags_lower: 0,
            character_set: UTF8_GENERAL_CI,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            capability_flags_upper: 0,
            auth_plugin_data_length: 21,
            auth_plugin_data_part_2: vec![0u8; 12],
            auth_plugin_name: NATIVE_PASSWORD_PLUGIN.to_string(),
        }
    }
}

impl HandshakeV10 {
    /// Build a greeting carrying the given 20-byte scramble.
    pub fn with_scramble(connection_id: u32, scramble: &[u8; 20], capabilities: u32) -> Self {
        let mut part_1 = [0u8; 8];
        part_1.copy_from_slice(&scramble[..8]);
        let mut handshake = Self {
            connection_id,
            auth_plugin_data_part_1: part_1,
            auth_plugin_data_part_2: scramble[8..].to_vec(),
            ..Self::default()
        };
        handshake.set_capability_flags(capabilities);
        handshake
    }

    /// Get the full 20-byte scramble (auth_plugin_data_part_1 + auth_plugin_data_part_2)
    pub fn get_scramble(&self) -> Vec<u8> {
        let mut scramble = Vec::with_capacity(20);
        scramble.extend_from_slice(&self.auth_plugin_data_part_1);
        let part2_len = std::cmp::min(12, self.auth_plugin_data_part_2.len());
        scramble.extend_from_slice(&self.auth_plugin_data_part_2[..part2_len]);
        scramble
    }

    /// Get combined capability flags (32-bit)
    pub fn capability_flags(&self) -> u32 {
        (self.capability_flags_upper as u32) << 16 | self.capability_flags_lower as u32
    }

    /// Set capability flags from 32-bit value
    pub fn set_capability_flags(&mut self, flags: u32) {
        self.capability_flags_lower = (flags & 0xFFFF) as u16;
        self.capability_flags_upper = ((flags >> 16) & 0xFFFF) as u16;
    }
}

/// MySQL Handshake Response 41 packet (client -> server)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_connection_phase_packets_protocol_handshake_response.html>
#[derive(Debug, Clone)]
pub struct HandshakeResponse41 {
    /// Capability flags (4 bytes)
    pub capability_flags: u32,
    /// Max packet size
    pub max_packet_size: u32,
    /// Character set
    pub character_set: u8,
    /// Username (null-terminated)
    pub username: String,
    /// Auth response
    pub auth_response: Vec<u8>,
    /// Database name (if CLIENT_CONNECT_WITH_DB)
    pub database: Option<String>,
    /// Auth plugin name (if CLIENT_PLUGIN_AUTH)
    pub auth_plugin_name: Option<String>,
}

impl Default for HandshakeResponse41 {
    fn default() -> Self {
        Self {
            capability_flags: 0,
            max_packet_size: PacketHeader::MAX_PAYLOAD_LENGTH,
            character_set: UTF8_GENERAL_CI,
            username: String::new(),
            auth_response: Vec::new(),
            database: None,
            auth_plugin_name: None,
        }
    }
}

/// MySQL OK Packet (server -> client)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_ok_packet.html>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    /// Header (0x00 or 0xFE)
    pub header: u8,
    /// Affected rows (length-encoded int)
    pub affected_rows: u64,
    /// Last insert ID (length-encoded int)
    pub last_insert_id: u64,
    /// Status flags (if CLIENT_PROTOCOL_41)
    pub status_flags: u16,
    /// Warnings (if CLIENT_PROTOCOL_41)
    pub warnings: u16,
    /// Human readable info
    pub info: String,
}

impl Default for OkPacket {
    fn default() -> Self {
        Self {
            header: 0x00,
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            info: String::new(),
        }
    }
}

/// MySQL ERR Packet (server -> client)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_basic_err_packet.html>
#[derive(Debug, Clone)]
pub struct ErrPacket {
    /// Header (0xFF)
    pub header: u8,
    /// Error code
    pub error_code: u16,
    /// SQL state marker (if CLIENT_PROTOCOL_41)
    pub sql_state_marker: char,
    /// SQL state (5 characters, if CLIENT_PROTOCOL_41)
    pub sql_state: [u8; 5],
    /// Error message
    pub error_message: String,
}

impl Default for ErrPacket {
    fn default() -> Self {
        Self {
            header: 0xFF,
            error_code: 0,
            sql_state_marker: '#',
            sql_state: *b"HY000",
            error_message: String::new(),
        }
    }
}

impl ErrPacket {
    /// Create a new error packet with the given code and message
    pub fn new(error_code: u16, error_message: impl Into<String>) -> Self {
        Self {
            error_code,
            error_message: error_message.into(),
            ..Self::default()
        }
    }

    /// Create an error packet with an explicit SQL state.
    ///
    /// States that are not exactly five bytes fall back to `HY000`.
    pub fn with_state(error_code: u16, sql_state: &str, error_message: impl Into<String>) -> Self {
        let mut packet = Self::new(error_code, error_message);
        if let Ok(state) = <[u8; 5]>::try_from(sql_state.as_bytes()) {
            packet.sql_state = state;
        }
        packet
    }

    /// Access denied error (1045)
    pub fn access_denied(user: &str, host: &str, using_password: bool) -> Self {
        Self::with_state(
            ER_ACCESS_DENIED_ERROR,
            "28000",
            format!(
                "Access denied for user '{}'@'{}' (using password: {})",
                user,
                host,
                if using_password { "YES" } else { "NO" }
            ),
        )
    }
}

/// Column definition (Protocol::ColumnDefinition41)
/// Reference: <https://dev.mysql.com/doc/dev/mysql-server/latest/page_protocol_com_query_response_text_resultset_column_definition.html>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub character_set: u16,
    pub column_length: u32,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDefinition {
    /// Column with the given name and type and no table metadata.
    pub fn new(name: impl Into<String>, column_type: u8) -> Self {
        let name = name.into();
        let (character_set, column_length, flags) = match column_type {
            MYSQL_TYPE_LONGLONG => (BINARY_CHARSET, 20, NUM_FLAG | BINARY_FLAG),
            MYSQL_TYPE_DATETIME => (BINARY_CHARSET, 19, BINARY_FLAG),
            _ => (UTF8MB4_GENERAL_CI as u16, 1024, 0),
        };
        Self {
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            org_name: name.clone(),
            name,
            character_set,
            column_length,
            column_type,
            flags,
            decimals: 0,
        }
    }

    /// Set the table (and original table) the column belongs to.
    pub fn in_table(mut self, schema: &str, table: &str) -> Self {
        self.schema = schema.to_string();
        self.table = table.to_string();
        self.org_table = table.to_string();
        self
    }
}

/// COM_STMT_PREPARE OK response header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warnings: u16,
}

// ============================================================================
// Capability Flags
// Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/group__group__cs__capabilities__flags.html
// ============================================================================

/// Client can handle long passwords
pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
/// Found instead of affected rows
pub const CLIENT_FOUND_ROWS: u32 = 0x0000_0002;
/// Get all column flags
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
/// Can specify db on connect
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
/// New 4.1 protocol
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
/// Switch to SSL after handshake
pub const CLIENT_SSL: u32 = 0x0000_0800;
/// Client knows about transactions
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
/// New 4.1 authentication
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
/// Enable/disable multi-stmt support
pub const CLIENT_MULTI_STATEMENTS: u32 = 0x0001_0000;
/// Enable/disable multi-results
pub const CLIENT_MULTI_RESULTS: u32 = 0x0002_0000;
/// Multi-results in PS-protocol
pub const CLIENT_PS_MULTI_RESULTS: u32 = 0x0004_0000;
/// Client supports plugin authentication
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
/// Client supports connection attributes
pub const CLIENT_CONNECT_ATTRS: u32 = 0x0010_0000;
/// Length of auth response can be > 255
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;
/// Client no longer needs EOF packet
pub const CLIENT_DEPRECATE_EOF: u32 = 0x0100_0000;

/// Capabilities the proxy advertises to its clients.
///
/// `CLIENT_DEPRECATE_EOF` is left out on purpose: upstream result sets are
/// relayed verbatim, so both sides must agree on EOF framing.
pub const DEFAULT_SERVER_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_FOUND_ROWS
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_STATEMENTS
    | CLIENT_MULTI_RESULTS
    | CLIENT_PS_MULTI_RESULTS
    | CLIENT_PLUGIN_AUTH
    | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
    | CLIENT_CONNECT_ATTRS;

/// Capabilities the proxy requests when it logs in to an upstream server
pub const DEFAULT_CLIENT_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_FOUND_ROWS
    | CLIENT_LONG_FLAG
    | CLIENT_PROTOCOL_41
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_STATEMENTS
    | CLIENT_MULTI_RESULTS
    | CLIENT_PS_MULTI_RESULTS
    | CLIENT_PLUGIN_AUTH
    | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;

// ============================================================================
// Status Flags
// ============================================================================

/// Server status: in transaction
pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
/// Server status: auto-commit enabled
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
/// Server status: more results available
pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
/// Server status: a read-only cursor was opened by COM_STMT_EXECUTE
pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;

// ============================================================================
// MySQL Command Types
// Reference: https://dev.mysql.com/doc/dev/mysql-server/latest/my__command_8h.html
// ============================================================================

/// Quit connection (COM_QUIT)
pub const COM_QUIT: u8 = 0x01;
/// Switch database (COM_INIT_DB)
pub const COM_INIT_DB: u8 = 0x02;
/// Execute SQL query (COM_QUERY)
pub const COM_QUERY: u8 = 0x03;
/// Get field list (COM_FIELD_LIST) - deprecated but still used
pub const COM_FIELD_LIST: u8 = 0x04;
/// Ping server (COM_PING)
pub const COM_PING: u8 = 0x0e;
/// Prepare statement (COM_STMT_PREPARE)
pub const COM_STMT_PREPARE: u8 = 0x16;
/// Execute prepared statement (COM_STMT_EXECUTE)
pub const COM_STMT_EXECUTE: u8 = 0x17;
/// Close prepared statement (COM_STMT_CLOSE)
pub const COM_STMT_CLOSE: u8 = 0x19;
/// Set connection option (COM_SET_OPTION)
pub const COM_SET_OPTION: u8 = 0x1b;

// ============================================================================
// Column types and flags
// ============================================================================

pub const MYSQL_TYPE_LONG: u8 = 0x03;
pub const MYSQL_TYPE_LONGLONG: u8 = 0x08;
pub const MYSQL_TYPE_DATETIME: u8 = 0x0c;
pub const MYSQL_TYPE_VARCHAR: u8 = 0x0f;
pub const MYSQL_TYPE_VAR_STRING: u8 = 0xfd;

pub const NOT_NULL_FLAG: u16 = 0x0001;
pub const BINARY_FLAG: u16 = 0x0080;
pub const NUM_FLAG: u16 = 0x8000;

// ============================================================================
// Character sets, plugins and error codes
// ============================================================================

/// utf8_general_ci
pub const UTF8_GENERAL_CI: u8 = 0x21;
/// utf8mb4_general_ci
pub const UTF8MB4_GENERAL_CI: u8 = 45;
/// binary
pub const BINARY_CHARSET: u16 = 63;

/// Version string in the greeting sent to clients
pub const SERVER_VERSION: &str = "8.0.11-switchboard";

pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";
pub const CACHING_SHA2_PLUGIN: &str = "caching_sha2_password";

/// Marker byte for AuthSwitchRequest / old EOF-style packets
pub const AUTH_SWITCH_HEADER: u8 = 0xFE;
/// Marker byte for AuthMoreData
pub const AUTH_MORE_DATA_HEADER: u8 = 0x01;

pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
pub const ER_UNKNOWN_ERROR: u16 = 1105;
pub const ER_UNKNOWN_STMT_HANDLER: u16 = 1243;
pub const ER_MAX_PREPARED_STMT_COUNT_REACHED: u16 = 1461;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_constants_values() {
        assert_eq!(COM_QUIT, 0x01);
        assert_eq!(COM_INIT_DB, 0x02);
        assert_eq!(COM_QUERY, 0x03);
        assert_eq!(COM_FIELD_LIST, 0x04);
        assert_eq!(COM_PING, 0x0e);
        assert_eq!(COM_STMT_PREPARE, 0x16);
        assert_eq!(COM_STMT_EXECUTE, 0x17);
        assert_eq!(COM_STMT_CLOSE, 0x19);
        assert_eq!(COM_SET_OPTION, 0x1b);
    }

    #[test]
    fn test_handshake_with_scramble_splits_parts() {
        let scramble: [u8; 20] = std::array::from_fn(|i| i as u8 + 1);
        let handshake = HandshakeV10::with_scramble(7, &scramble, DEFAULT_SERVER_CAPABILITIES);
        assert_eq!(handshake.get_scramble(), scramble.to_vec());
        assert_eq!(handshake.capability_flags(), DEFAULT_SERVER_CAPABILITIES);
        assert_eq!(handshake.connection_id, 7);
    }

    #[test]
    fn test_server_capabilities_keep_eof_packets() {
        assert_eq!(DEFAULT_SERVER_CAPABILITIES & CLIENT_DEPRECATE_EOF, 0);
        assert_eq!(DEFAULT_CLIENT_CAPABILITIES & CLIENT_DEPRECATE_EOF, 0);
    }

    #[test]
    fn test_access_denied_message() {
        let err = ErrPacket::access_denied("app", "10.0.0.9", true);
        assert_eq!(err.error_code, 1045);
        assert_eq!(&err.sql_state, b"28000");
        assert_eq!(
            err.error_message,
            "Access denied for user 'app'@'10.0.0.9' (using password: YES)"
        );
        let err = ErrPacket::access_denied("app", "10.0.0.9", false);
        assert!(err.error_message.ends_with("(using password: NO)"));
    }

    #[test]
    fn test_with_state_rejects_bad_length() {
        let err = ErrPacket::with_state(1146, "42S0", "x");
        assert_eq!(&err.sql_state, b"HY000");
    }

    #[test]
    fn test_column_definition_defaults() {
        let col = ColumnDefinition::new("userid", MYSQL_TYPE_LONGLONG);
        assert_eq!(col.character_set, BINARY_CHARSET);
        assert_ne!(col.flags & NUM_FLAG, 0);
        let col = ColumnDefinition::new("username", MYSQL_TYPE_VAR_STRING).in_table("", "users");
        assert_eq!(col.org_name, "username");
        assert_eq!(col.table, "users");
    }
}
