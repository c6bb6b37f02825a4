//! Client side of the MySQL protocol: one logged-in connection to an
//! upstream server.
//!
//! Responses are read completely before they are handed back, so an ERR
//! packet in the middle of a result set becomes an error instead of a
//! truncated result.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use zeroize::Zeroize;

use super::options::BackendOptions;
use crate::error::{ProxyError, Result};
use crate::protocol::mysql::*;
use crate::server::stream::NetworkStream;
use crate::server::{PreparedStatement, QueryResponse};
use crate::session::{Responder, StatementHandle};
use crate::tls::TlsConnector;

/// Fast auth success indicator in an AuthMoreData packet
const CACHING_SHA2_FAST_AUTH_SUCCESS: u8 = 0x03;

/// Full auth required indicator in an AuthMoreData packet
const CACHING_SHA2_FULL_AUTH_REQUIRED: u8 = 0x04;

/// LOCAL INFILE request header
const LOCAL_INFILE_HEADER: u8 = 0xFB;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A logged-in connection to an upstream server.
///
/// Owned by exactly one session. The socket closes when the value is
/// dropped; [`close`](Self::close) also says goodbye with COM_QUIT.
pub struct UpstreamConnection {
    id: u64,
    stream: NetworkStream,
    server_version: String,
    capabilities: u32,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    closed: bool,
}

impl std::fmt::Debug for UpstreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnection")
            .field("id", &self.id)
            .field("server_version", &self.server_version)
            .field("encrypted", &self.stream.is_encrypted())
            .field("closed", &self.closed)
            .finish()
    }
}

impl UpstreamConnection {
    /// Connect, log in and apply the configured character set.
    pub async fn connect(options: &BackendOptions) -> Result<Self> {
        let addr = options.address();
        debug!("Connecting to upstream at {}", addr);

        let tcp = timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::Timeout(format!("connecting to {}", addr)))?
            .map_err(|e| ProxyError::Connection(format!("failed to connect to {}: {}", addr, e)))?;
        let _ = tcp.set_nodelay(true);

        let login = timeout(options.connect_timeout, Self::login(tcp, options))
            .await
            .map_err(|_| ProxyError::Timeout(format!("handshake with {}", addr)))?;
        let mut conn = login?;

        if let Some(statement) = options.set_names.clone() {
            if let Err(e) = conn.execute(&statement).await {
                warn!(
                    "Closing upstream connection {} after `{}` failed: {}",
                    conn.id, statement, e
                );
                conn.close().await;
                return Err(e);
            }
        }

        debug!(
            connection_id = conn.id,
            server_version = %conn.server_version,
            encrypted = conn.stream.is_encrypted(),
            "Connected to upstream at {}",
            addr
        );
        Ok(conn)
    }

    async fn login(tcp: TcpStream, options: &BackendOptions) -> Result<Self> {
        let mut stream = NetworkStream::tcp(tcp);

        let (header, payload) = read_packet(&mut stream).await?;
        let handshake = parse_handshake_v10(&payload)?;
        let server_caps = handshake.capability_flags();
        let scramble = handshake.get_scramble();
        debug!(
            "Upstream handshake: version={}, plugin={}, caps=0x{:08X}",
            handshake.server_version, handshake.auth_plugin_name, server_caps
        );

        let mut caps = DEFAULT_CLIENT_CAPABILITIES & (server_caps | CLIENT_PLUGIN_AUTH);
        caps |= CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION;
        if options.database.is_some() {
            caps |= CLIENT_CONNECT_WITH_DB;
        }

        let mut seq = header.next_sequence();
        if let Some(connector) = TlsConnector::for_mode(options.tls)? {
            if server_caps & CLIENT_SSL == 0 {
                return Err(ProxyError::Connection(format!(
                    "{} does not support TLS",
                    options.address()
                )));
            }
            caps |= CLIENT_SSL;
            seq = write_packet(
                &mut stream,
                seq,
                &build_ssl_request(caps, options.collation_id),
            )
            .await?;
            let tcp = stream.into_tcp().map_err(|_| {
                ProxyError::Connection("upstream stream already encrypted".to_string())
            })?;
            let tls = connector.connect(tcp, &options.host).await?;
            stream = NetworkStream::ClientTls(Box::new(tls));
            debug!("Upstream TLS established: {:?}", stream.tls_version());
        }

        let plugin = if handshake.auth_plugin_name.is_empty() {
            NATIVE_PASSWORD_PLUGIN.to_string()
        } else {
            handshake.auth_plugin_name.clone()
        };

        let response = HandshakeResponse41 {
            capability_flags: caps,
            max_packet_size: PacketHeader::MAX_PAYLOAD_LENGTH,
            character_set: options.collation_id,
            username: options.user.clone(),
            auth_response: compute_auth_for_plugin(&plugin, &options.password, &scramble),
            database: options.database.clone(),
            auth_plugin_name: Some(plugin),
        };
        write_packet(&mut stream, seq, &build_handshake_response41(&response)).await?;

        let mut conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            stream,
            server_version: handshake.server_version,
            capabilities: caps,
            read_timeout: options.read_timeout,
            write_timeout: options.write_timeout,
            closed: false,
        };
        conn.finish_auth(&options.password).await?;
        Ok(conn)
    }

    /// Handle the server's answers to the handshake response until OK.
    async fn finish_auth(&mut self, password: &str) -> Result<()> {
        loop {
            let (header, payload) = read_packet(&mut self.stream).await?;
            let seq = header.next_sequence();
            let first = payload.first().copied().unwrap_or_default();

            if is_err_packet(&payload) {
                let err = parse_err_packet(&payload, CLIENT_PROTOCOL_41)?;
                warn!(
                    "Upstream rejected credentials: {} - {}",
                    err.error_code, err.error_message
                );
                return Err(ProxyError::from_server(&err));
            }

            // 0xFE here is always an AuthSwitchRequest, never an EOF
            if first == AUTH_SWITCH_HEADER && payload.len() > 1 {
                let (plugin, used) = read_null_terminated_string(&payload[1..])?;
                let mut data = &payload[1 + used..];
                if data.last() == Some(&0) {
                    data = &data[..data.len() - 1];
                }
                debug!("Upstream auth switch to {}, data_len={}", plugin, data.len());
                let answer = compute_auth_for_plugin(&plugin, password, data);
                write_packet(&mut self.stream, seq, &answer).await?;
                continue;
            }

            if first == 0x00 {
                debug!("Upstream auth OK");
                return Ok(());
            }

            if first == AUTH_MORE_DATA_HEADER && payload.len() > 1 {
                match payload[1] {
                    CACHING_SHA2_FAST_AUTH_SUCCESS => {
                        debug!("caching_sha2_password fast auth success");
                        continue;
                    }
                    CACHING_SHA2_FULL_AUTH_REQUIRED => {
                        if !self.stream.is_encrypted() {
                            return Err(ProxyError::Auth(
                                "caching_sha2_password full authentication requires tls"
                                    .to_string(),
                            ));
                        }
                        debug!("caching_sha2_password full auth requested");
                        let mut cleartext = password.as_bytes().to_vec();
                        cleartext.push(0x00);
                        let written = write_packet(&mut self.stream, seq, &cleartext).await;
                        cleartext.zeroize();
                        written?;
                        continue;
                    }
                    _ => {}
                }
            }

            return Err(ProxyError::Protocol(format!(
                "unexpected packet during upstream auth: 0x{:02X}",
                first
            )));
        }
    }

    /// Process-unique id of this connection
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Version string from the upstream greeting
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// COM_QUERY
    pub async fn execute(&mut self, sql: &str) -> Result<QueryResponse> {
        let result = self.command_response(COM_QUERY, sql.as_bytes()).await;
        self.settle(result).await
    }

    /// COM_INIT_DB
    pub async fn use_db(&mut self, database: &str) -> Result<()> {
        let result = self.init_db(database).await;
        self.settle(result).await
    }

    /// COM_FIELD_LIST; returns the column definitions without the final EOF
    pub async fn field_list(&mut self, table: &str, wildcard: &str) -> Result<Vec<Vec<u8>>> {
        let result = self.list_fields(table, wildcard).await;
        self.settle(result).await
    }

    /// COM_STMT_PREPARE
    pub async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        let result = self.prepare_statement(sql).await;
        self.settle(result).await
    }

    /// COM_STMT_EXECUTE with the client's parameter block forwarded as is
    pub async fn execute_statement(
        &mut self,
        handle: &StatementHandle,
        params: &[u8],
    ) -> Result<QueryResponse> {
        let statement_id = self.own_statement(handle)?;
        let mut body = Vec::with_capacity(params.len() + 4);
        body.extend_from_slice(&statement_id.to_le_bytes());
        body.extend_from_slice(params);
        let result = self.command_response(COM_STMT_EXECUTE, &body).await;
        self.settle(result).await
    }

    /// COM_STMT_CLOSE; the server sends no response
    pub async fn close_statement(&mut self, handle: &StatementHandle) -> Result<()> {
        let statement_id = self.own_statement(handle)?;
        let result = self
            .send_command(COM_STMT_CLOSE, &statement_id.to_le_bytes())
            .await;
        self.settle(result).await
    }

    /// Send COM_QUIT and shut the socket down. Errors are logged, not
    /// returned; calling this again does nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let quit = build_command(COM_QUIT, &[]);
        let limit = self.write_timeout;
        let write = write_packet(&mut self.stream, 0, &quit);
        if let Err(e) = with_deadline(limit, "writing to upstream", write).await {
            debug!("COM_QUIT to upstream connection {} failed: {}", self.id, e);
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of upstream connection {} failed: {}", self.id, e);
        }
        debug!("Closed upstream connection {}", self.id);
    }

    async fn command_response(&mut self, command: u8, body: &[u8]) -> Result<QueryResponse> {
        self.send_command(command, body).await?;
        Ok(QueryResponse::Relayed(self.read_response().await?))
    }

    async fn init_db(&mut self, database: &str) -> Result<()> {
        self.send_command(COM_INIT_DB, database.as_bytes()).await?;
        let payload = self.read_payload().await?;
        self.expect_ok(&payload)
    }

    async fn list_fields(&mut self, table: &str, wildcard: &str) -> Result<Vec<Vec<u8>>> {
        let mut body = Vec::with_capacity(table.len() + wildcard.len() + 1);
        body.extend_from_slice(table.as_bytes());
        body.push(0);
        body.extend_from_slice(wildcard.as_bytes());
        self.send_command(COM_FIELD_LIST, &body).await?;

        let mut columns = Vec::new();
        loop {
            let payload = self.read_payload().await?;
            self.check_err(&payload)?;
            if is_eof_packet(&payload) {
                return Ok(columns);
            }
            columns.push(payload);
        }
    }

    async fn prepare_statement(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.send_command(COM_STMT_PREPARE, sql.as_bytes()).await?;
        let payload = self.read_payload().await?;
        self.check_err(&payload)?;
        let ok = parse_stmt_prepare_ok(&payload)?;

        let param_defs = self.read_definitions(ok.num_params).await?;
        let column_defs = self.read_definitions(ok.num_columns).await?;

        Ok(PreparedStatement {
            handle: StatementHandle::Upstream {
                connection_id: self.id,
                statement_id: ok.statement_id,
            },
            params: ok.num_params,
            columns: ok.num_columns,
            param_defs,
            column_defs,
        })
    }

    /// Close the connection when a command failed anywhere but in a
    /// complete ERR response.
    ///
    /// After a timeout or a malformed packet, unread parts of the response
    /// may still be in flight and would be taken as the answer to the next
    /// command. Later commands fail with [`ProxyError::Connection`].
    async fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !matches!(e, ProxyError::Server { .. }) && !self.closed {
                warn!(
                    "Upstream connection {} out of sync after error, closing: {}",
                    self.id, e
                );
                self.close().await;
            }
        }
        result
    }

    fn own_statement(&self, handle: &StatementHandle) -> Result<u32> {
        match *handle {
            StatementHandle::Upstream {
                connection_id,
                statement_id,
            } if connection_id == self.id => Ok(statement_id),
            other => Err(ProxyError::StatementMismatch(format!(
                "{} does not belong to upstream connection {}",
                other, self.id
            ))),
        }
    }

    async fn send_command(&mut self, command: u8, body: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ProxyError::Connection(format!(
                "upstream connection {} is closed",
                self.id
            )));
        }
        let payload = build_command(command, body);
        let write = write_packet(&mut self.stream, 0, &payload);
        with_deadline(self.write_timeout, "writing to upstream", write).await?;
        Ok(())
    }

    async fn read_payload(&mut self) -> Result<Vec<u8>> {
        let read = read_packet(&mut self.stream);
        let (_, payload) = with_deadline(self.read_timeout, "reading from upstream", read).await?;
        Ok(payload)
    }

    fn check_err(&self, payload: &[u8]) -> Result<()> {
        if is_err_packet(payload) {
            let err = parse_err_packet(payload, self.capabilities)?;
            return Err(ProxyError::from_server(&err));
        }
        Ok(())
    }

    fn expect_ok(&self, payload: &[u8]) -> Result<()> {
        self.check_err(payload)?;
        if payload.first() == Some(&0x00) {
            Ok(())
        } else {
            Err(ProxyError::Protocol(format!(
                "expected OK from upstream, got 0x{:02X}",
                payload.first().copied().unwrap_or_default()
            )))
        }
    }

    /// Read `count` definitions and the EOF after them; no EOF follows an
    /// empty block.
    async fn read_definitions(&mut self, count: u16) -> Result<Vec<Vec<u8>>> {
        let mut defs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let payload = self.read_payload().await?;
            self.check_err(&payload)?;
            defs.push(payload);
        }
        if count > 0 {
            let eof = self.read_payload().await?;
            if !is_eof_packet(&eof) {
                return Err(ProxyError::Protocol(
                    "missing EOF after statement definitions".to_string(),
                ));
            }
        }
        Ok(defs)
    }

    /// Read a complete query response, following multi-result sets.
    async fn read_response(&mut self) -> Result<Vec<Vec<u8>>> {
        let mut packets = Vec::new();
        loop {
            let first = self.read_payload().await?;
            self.check_err(&first)?;

            match first.first().copied() {
                Some(0x00) => {
                    let ok = parse_ok_packet(&first, self.capabilities)?;
                    packets.push(first);
                    if ok.status_flags & SERVER_MORE_RESULTS_EXISTS == 0 {
                        return Ok(packets);
                    }
                }
                Some(LOCAL_INFILE_HEADER) => {
                    return Err(ProxyError::Unsupported(
                        "LOAD DATA LOCAL INFILE is not supported".to_string(),
                    ));
                }
                _ => {
                    let (columns, _) = read_length_encoded_int(&first)?;
                    packets.push(first);
                    for _ in 0..columns {
                        let def = self.read_payload().await?;
                        self.check_err(&def)?;
                        packets.push(def);
                    }

                    let eof = self.read_payload().await?;
                    let status = eof_status_flags(&eof).ok_or_else(|| {
                        ProxyError::Protocol("missing EOF after column definitions".to_string())
                    })?;
                    packets.push(eof);
                    // Rows of an open cursor are fetched later
                    if status & SERVER_STATUS_CURSOR_EXISTS != 0 {
                        return Ok(packets);
                    }

                    let status = loop {
                        let row = self.read_payload().await?;
                        self.check_err(&row)?;
                        if let Some(status) = eof_status_flags(&row) {
                            packets.push(row);
                            break status;
                        }
                        packets.push(row);
                    };
                    if status & SERVER_MORE_RESULTS_EXISTS == 0 {
                        return Ok(packets);
                    }
                }
            }
        }
    }
}

async fn with_deadline<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) if !limit.is_zero() => timeout(limit, fut)
            .await
            .map_err(|_| ProxyError::Timeout(format!("{} after {:?}", what, limit)))?,
        _ => fut.await,
    }
}

#[async_trait]
impl Responder for UpstreamConnection {
    async fn use_db(&mut self, database: &str) -> Result<()> {
        UpstreamConnection::use_db(self, database).await
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResponse> {
        self.execute(sql).await
    }

    async fn field_list(&mut self, table: &str, wildcard: &str) -> Result<Vec<Vec<u8>>> {
        UpstreamConnection::field_list(self, table, wildcard).await
    }

    async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        UpstreamConnection::prepare(self, sql).await
    }

    async fn execute(
        &mut self,
        handle: &StatementHandle,
        _sql: &str,
        params: &[u8],
    ) -> Result<QueryResponse> {
        self.execute_statement(handle, params).await
    }

    async fn close_statement(&mut self, handle: &StatementHandle) -> Result<()> {
        UpstreamConnection::close_statement(self, handle).await
    }
}
