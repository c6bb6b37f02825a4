//! Server side of the MySQL protocol for one client connection.
//!
//! [`serve`] greets the client, verifies its password against the
//! [`AuthHandler`], then decodes commands and dispatches them to the
//! [`CommandHandler`] until the client quits or the connection drops.
//!
//! Prepared statements are renumbered: the client only ever sees ids
//! assigned here, which map to the handler's [`StatementHandle`]s.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::handler::{AuthHandler, CommandHandler, QueryResponse, SessionInfo};
use super::stream::NetworkStream;
use crate::error::{ProxyError, Result};
use crate::protocol::mysql::*;
use crate::session::StatementHandle;
use crate::tls::TlsAcceptor;

/// Per-listener settings shared by every connection.
#[derive(Clone)]
pub struct ServeOptions {
    /// Present when clients may upgrade to TLS
    pub tls_acceptor: Option<TlsAcceptor>,
    /// Time allowed between accept and the client's handshake response
    pub handshake_timeout: Duration,
    /// Open prepared statements allowed per client
    pub max_prepared_statements: usize,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            tls_acceptor: None,
            handshake_timeout: Duration::from_secs(30),
            max_prepared_statements: 16382,
        }
    }
}

/// A statement prepared through this connection
struct ClientStatement {
    handle: StatementHandle,
    sql: String,
}

/// What the client sent in its handshake response
struct ClientLogin {
    response: HandshakeResponse41,
    /// Answer to the scramble, after any auth switch
    auth_response: Vec<u8>,
    /// Sequence id for the server's next packet
    sequence_id: u8,
}

struct ClientConnection {
    stream: NetworkStream,
    capabilities: u32,
    scramble: [u8; 20],
    statements: HashMap<u32, ClientStatement>,
    next_statement_id: u32,
    max_statements: usize,
}

/// Run one client connection to completion.
///
/// Returns `Ok` when the client quits or disconnects between commands.
/// Rejected logins are reported to the client and returned as
/// [`ProxyError::Auth`].
pub async fn serve(
    tcp: TcpStream,
    options: &ServeOptions,
    auth: &dyn AuthHandler,
    handler: &dyn CommandHandler,
) -> Result<()> {
    let mut session = SessionInfo {
        local_addr: tcp.local_addr().ok(),
        peer_addr: tcp.peer_addr().ok(),
        ..SessionInfo::default()
    };

    let (mut conn, login) = timeout(options.handshake_timeout, open(tcp, options))
        .await
        .map_err(|_| ProxyError::Timeout("waiting for client handshake".to_string()))??;
    session.user = login.response.username.clone();

    let database = login.response.database.as_deref().filter(|db| !db.is_empty());
    if let Some(database) = database {
        if let Err(e) = handler.use_db(database).await {
            conn.send_error(login.sequence_id, &e).await?;
            return Err(e);
        }
    }

    conn.authenticate(auth, &mut session, &login).await?;
    info!(
        "Client authenticated as '{}' (local={:?})",
        session.user, session.local_addr
    );

    conn.command_loop(handler).await
}

/// Greet the client and read its handshake response, upgrading to TLS
/// and switching it to `mysql_native_password` on the way if needed.
async fn open(tcp: TcpStream, options: &ServeOptions) -> Result<(ClientConnection, ClientLogin)> {
    let scramble = generate_scramble();
    let mut capabilities = DEFAULT_SERVER_CAPABILITIES;
    if options.tls_acceptor.is_some() {
        capabilities |= CLIENT_SSL;
    }
    let mut stream = NetworkStream::tcp(tcp);
    let greeting = HandshakeV10::with_scramble(rand::random(), &scramble, capabilities);
    write_packet(&mut stream, 0, &build_handshake_v10(&greeting)).await?;

    let (mut header, mut payload) = read_packet(&mut stream).await?;
    if is_ssl_request(&payload) {
        let acceptor = options.tls_acceptor.as_ref().ok_or_else(|| {
            ProxyError::Protocol("client requested TLS, which is not configured".to_string())
        })?;
        let tcp = stream
            .into_tcp()
            .map_err(|_| ProxyError::Protocol("TLS requested twice".to_string()))?;
        stream = NetworkStream::ServerTls(Box::new(acceptor.accept(tcp).await?));
        debug!("Client TLS established: {:?}", stream.tls_version());
        (header, payload) = read_packet(&mut stream).await?;
    }

    let response = parse_handshake_response41(&payload)?;
    let mut conn = ClientConnection {
        stream,
        capabilities: capabilities & response.capability_flags,
        scramble,
        statements: HashMap::new(),
        next_statement_id: 1,
        max_statements: options.max_prepared_statements,
    };
    let mut sequence_id = header.next_sequence();
    let mut auth_response = response.auth_response.clone();

    let client_plugin = response
        .auth_plugin_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or(NATIVE_PASSWORD_PLUGIN);
    if client_plugin != NATIVE_PASSWORD_PLUGIN {
        debug!(
            "Switching client from {} to {}",
            client_plugin, NATIVE_PASSWORD_PLUGIN
        );
        let switch = build_auth_switch_request(NATIVE_PASSWORD_PLUGIN, &conn.scramble);
        write_packet(&mut conn.stream, sequence_id, &switch).await?;
        let (switch_header, answer) = read_packet(&mut conn.stream).await?;
        sequence_id = switch_header.next_sequence();
        auth_response = answer;
    }

    Ok((
        conn,
        ClientLogin {
            response,
            auth_response,
            sequence_id,
        },
    ))
}

impl ClientConnection {
    async fn authenticate(
        &mut self,
        auth: &dyn AuthHandler,
        session: &mut SessionInfo,
        login: &ClientLogin,
    ) -> Result<()> {
        let credential = auth.get_credential(&session.user);
        let matched = credential.as_ref().and_then(|credential| {
            find_matching_password(&login.auth_response, &self.scramble, &credential.passwords)
        });

        let Some(password) = matched else {
            let cause = if credential.is_none() {
                "unknown user"
            } else {
                "password mismatch"
            };
            auth.on_auth_failure(session, cause);
            let err = ErrPacket::access_denied(
                &session.user,
                &session.peer_host(),
                !login.auth_response.is_empty(),
            );
            write_packet(
                &mut self.stream,
                login.sequence_id,
                &build_err_packet(&err, self.capabilities),
            )
            .await?;
            return Err(ProxyError::Auth(format!(
                "{} for user '{}'",
                cause, session.user
            )));
        };
        session.password = password.to_string();

        if let Err(e) = auth.on_auth_success(session).await {
            warn!("Rejecting '{}' after verified login: {}", session.user, e);
            self.send_error(login.sequence_id, &e).await?;
            return Err(e);
        }

        let ok = build_ok_packet(&OkPacket::default(), self.capabilities);
        write_packet(&mut self.stream, login.sequence_id, &ok).await?;
        Ok(())
    }

    async fn command_loop(&mut self, handler: &dyn CommandHandler) -> Result<()> {
        loop {
            let payload = match read_packet(&mut self.stream).await {
                Ok((_, payload)) => payload,
                Err(ProxyError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    debug!("Client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let Some((&command, body)) = payload.split_first() else {
                let err = ProxyError::Protocol("empty command packet".to_string());
                self.send_error(1, &err).await?;
                continue;
            };
            trace!("Command 0x{:02X}, {} bytes", command, body.len());

            let result = match command {
                COM_QUIT => {
                    debug!("Client sent COM_QUIT");
                    return Ok(());
                }
                COM_PING => Ok(QueryResponse::ok()),
                COM_INIT_DB => {
                    let database = String::from_utf8_lossy(body);
                    handler.use_db(&database).await.map(|_| QueryResponse::ok())
                }
                COM_QUERY => {
                    let sql = String::from_utf8_lossy(body);
                    handler.handle_query(&sql).await
                }
                COM_FIELD_LIST => self.field_list(handler, body).await,
                COM_STMT_PREPARE => self.prepare(handler, body).await,
                COM_STMT_EXECUTE => self.execute(handler, body).await,
                COM_STMT_CLOSE => {
                    self.close_statement(handler, body).await;
                    continue;
                }
                _ => handler
                    .handle_other_command(command, body)
                    .await
                    .map(|_| QueryResponse::ok()),
            };

            match result {
                Ok(response) => {
                    let packets = response.into_packets(self.capabilities);
                    write_packets(&mut self.stream, 1, &packets).await?;
                }
                Err(e) => self.send_error(1, &e).await?,
            }
        }
    }

    async fn field_list(
        &mut self,
        handler: &dyn CommandHandler,
        body: &[u8],
    ) -> Result<QueryResponse> {
        let (table, wildcard) = match body.iter().position(|&b| b == 0) {
            Some(end) => (&body[..end], &body[end + 1..]),
            None => (body, &[][..]),
        };
        let table = String::from_utf8_lossy(table);
        let wildcard = String::from_utf8_lossy(wildcard);

        let mut packets = handler.handle_field_list(&table, &wildcard).await?;
        packets.push(build_eof_packet(0, SERVER_STATUS_AUTOCOMMIT));
        Ok(QueryResponse::Relayed(packets))
    }

    async fn prepare(&mut self, handler: &dyn CommandHandler, body: &[u8]) -> Result<QueryResponse> {
        if self.statements.len() >= self.max_statements {
            return Err(ProxyError::Server {
                code: ER_MAX_PREPARED_STMT_COUNT_REACHED,
                state: "42000".to_string(),
                message: format!(
                    "Can't create more than max_prepared_stmt_count statements (current value: {})",
                    self.max_statements
                ),
            });
        }

        let sql = String::from_utf8_lossy(body).to_string();
        let stmt = handler.handle_stmt_prepare(&sql).await?;

        // Ids wrap; skip any still held by an open statement
        let mut statement_id = self.next_statement_id;
        while self.statements.contains_key(&statement_id) {
            statement_id = statement_id.wrapping_add(1).max(1);
        }
        self.next_statement_id = statement_id.wrapping_add(1).max(1);
        self.statements.insert(
            statement_id,
            ClientStatement {
                handle: stmt.handle,
                sql,
            },
        );
        debug!("Prepared statement {} as {}", statement_id, stmt.handle);

        let mut packets = vec![build_stmt_prepare_ok(&StmtPrepareOk {
            statement_id,
            num_columns: stmt.columns,
            num_params: stmt.params,
            warnings: 0,
        })];
        if stmt.params > 0 {
            packets.extend(stmt.param_defs);
            packets.push(build_eof_packet(0, SERVER_STATUS_AUTOCOMMIT));
        }
        if stmt.columns > 0 {
            packets.extend(stmt.column_defs);
            packets.push(build_eof_packet(0, SERVER_STATUS_AUTOCOMMIT));
        }
        Ok(QueryResponse::Relayed(packets))
    }

    async fn execute(&mut self, handler: &dyn CommandHandler, body: &[u8]) -> Result<QueryResponse> {
        let statement_id = read_u32_le(body)?;
        let stmt = self
            .statements
            .get(&statement_id)
            .ok_or(ProxyError::UnknownStatement(statement_id))?;
        handler
            .handle_stmt_execute(&stmt.handle, &stmt.sql, &body[4..])
            .await
    }

    /// COM_STMT_CLOSE has no response, so failures are only logged.
    async fn close_statement(&mut self, handler: &dyn CommandHandler, body: &[u8]) {
        let statement_id = match read_u32_le(body) {
            Ok(id) => id,
            Err(e) => {
                debug!("Malformed COM_STMT_CLOSE: {}", e);
                return;
            }
        };
        match self.statements.remove(&statement_id) {
            Some(stmt) => {
                if let Err(e) = handler.handle_stmt_close(&stmt.handle).await {
                    warn!("Closing statement {} failed: {}", statement_id, e);
                }
            }
            None => debug!("COM_STMT_CLOSE for unknown statement {}", statement_id),
        }
    }

    async fn send_error(&mut self, sequence_id: u8, err: &ProxyError) -> Result<()> {
        debug!("Sending error to client: {}", err);
        let packet = build_err_packet(&err.to_err_packet(), self.capabilities);
        write_packet(&mut self.stream, sequence_id, &packet).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use crate::backend::{BackendOptions, UpstreamConnection};
    use crate::server::{Credential, PreparedStatement};
    use crate::tls::TlsMode;

    /// Accepts `app` with either password and records every callback
    #[derive(Default)]
    struct TestHandler {
        events: Mutex<Vec<String>>,
        reject_after_login: bool,
    }

    impl TestHandler {
        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AuthHandler for TestHandler {
        fn get_credential(&self, username: &str) -> Option<Credential> {
            (username == "app").then(|| Credential {
                auth_plugin: NATIVE_PASSWORD_PLUGIN.to_string(),
                passwords: vec!["other".to_string(), "secret".to_string()],
            })
        }

        async fn on_auth_success(&self, session: &SessionInfo) -> Result<()> {
            self.record(format!("success {} {}", session.user, session.password));
            if self.reject_after_login {
                return Err(ProxyError::Auth("connect upstream: refused".to_string()));
            }
            Ok(())
        }

        fn on_auth_failure(&self, session: &SessionInfo, cause: &str) {
            self.record(format!("failure {} {}", session.user, cause));
        }
    }

    #[async_trait]
    impl CommandHandler for TestHandler {
        async fn use_db(&self, database: &str) -> Result<()> {
            self.record(format!("use {}", database));
            Ok(())
        }

        async fn handle_query(&self, sql: &str) -> Result<QueryResponse> {
            if sql == "fail" {
                return Err(ProxyError::Unsupported("not supported now".to_string()));
            }
            let mut rs = ResultSet::new(vec![ColumnDefinition::new("sql", MYSQL_TYPE_VAR_STRING)]);
            rs.push_row(vec![Some(sql.to_string())]);
            Ok(QueryResponse::ResultSet(rs))
        }

        async fn handle_field_list(&self, table: &str, wildcard: &str) -> Result<Vec<Vec<u8>>> {
            self.record(format!("fields {} {}", table, wildcard));
            let column = ColumnDefinition::new("id", MYSQL_TYPE_LONGLONG).in_table("app", table);
            Ok(vec![build_column_definition(&column)])
        }

        async fn handle_stmt_prepare(&self, sql: &str) -> Result<PreparedStatement> {
            self.record(format!("prepare {}", sql));
            let param = ColumnDefinition::new("?", MYSQL_TYPE_VAR_STRING);
            Ok(PreparedStatement {
                handle: StatementHandle::Local { statement_id: 77 },
                params: 1,
                columns: 0,
                param_defs: vec![build_column_definition(&param)],
                column_defs: Vec::new(),
            })
        }

        async fn handle_stmt_execute(
            &self,
            handle: &StatementHandle,
            sql: &str,
            params: &[u8],
        ) -> Result<QueryResponse> {
            self.record(format!("execute {} {} {:?}", handle, sql, params));
            Ok(QueryResponse::ok())
        }

        async fn handle_stmt_close(&self, handle: &StatementHandle) -> Result<()> {
            self.record(format!("close {}", handle));
            Ok(())
        }

        async fn handle_other_command(&self, command: u8, _payload: &[u8]) -> Result<()> {
            Err(ProxyError::UnsupportedCommand {
                command,
                payload: Vec::new(),
            })
        }
    }

    async fn start(handler: Arc<TestHandler>) -> (SocketAddr, JoinHandle<Result<()>>) {
        start_with(handler, ServeOptions::default()).await
    }

    async fn start_with(
        handler: Arc<TestHandler>,
        options: ServeOptions,
    ) -> (SocketAddr, JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            serve(tcp, &options, handler.as_ref(), handler.as_ref()).await
        });
        (addr, task)
    }

    fn client(addr: SocketAddr, password: &str) -> BackendOptions {
        BackendOptions {
            host: addr.ip().to_string(),
            port: addr.port(),
            user: "app".into(),
            password: password.into(),
            database: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: None,
            tls: TlsMode::Disabled,
            collation_id: UTF8MB4_GENERAL_CI,
            set_names: None,
        }
    }

    fn text_rows(response: QueryResponse, columns: usize) -> Vec<Vec<Option<String>>> {
        let QueryResponse::Relayed(packets) = response else {
            panic!("expected relayed packets");
        };
        packets[columns + 2..packets.len() - 1]
            .iter()
            .map(|row| parse_text_row(row, columns).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_login_with_any_accepted_password() {
        let handler = Arc::new(TestHandler::default());
        let (addr, task) = start(handler.clone()).await;

        let mut conn = UpstreamConnection::connect(&client(addr, "secret")).await.unwrap();
        assert_eq!(conn.server_version(), SERVER_VERSION);

        let response = conn.execute("select 1").await.unwrap();
        assert_eq!(text_rows(response, 1), vec![vec![Some("select 1".to_string())]]);

        conn.close().await;
        task.await.unwrap().unwrap();
        assert_eq!(handler.events(), vec!["success app secret"]);
    }

    #[tokio::test]
    async fn test_wrong_password_is_denied() {
        let handler = Arc::new(TestHandler::default());
        let (addr, task) = start(handler.clone()).await;

        let err = UpstreamConnection::connect(&client(addr, "guess")).await.unwrap_err();
        match err {
            ProxyError::Server { code, message, .. } => {
                assert_eq!(code, ER_ACCESS_DENIED_ERROR);
                assert!(message.contains("'app'@'127.0.0.1'"), "{}", message);
                assert!(message.ends_with("(using password: YES)"), "{}", message);
            }
            other => panic!("expected access denied, got {:?}", other),
        }

        assert!(matches!(task.await.unwrap(), Err(ProxyError::Auth(_))));
        assert_eq!(handler.events(), vec!["failure app password mismatch"]);
    }

    #[tokio::test]
    async fn test_rejection_after_verified_login() {
        let handler = Arc::new(TestHandler {
            reject_after_login: true,
            ..TestHandler::default()
        });
        let (addr, task) = start(handler.clone()).await;

        let err = UpstreamConnection::connect(&client(addr, "other")).await.unwrap_err();
        match err {
            ProxyError::Server { code, message, .. } => {
                assert_eq!(code, ER_ACCESS_DENIED_ERROR);
                assert_eq!(message, "connect upstream: refused");
            }
            other => panic!("expected access denied, got {:?}", other),
        }
        assert!(task.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_handshake_database_selected_before_login_completes() {
        let handler = Arc::new(TestHandler::default());
        let (addr, task) = start(handler.clone()).await;

        let mut options = client(addr, "secret");
        options.database = Some("inventory".into());
        let mut conn = UpstreamConnection::connect(&options).await.unwrap();
        conn.close().await;
        task.await.unwrap().unwrap();

        assert_eq!(handler.events(), vec!["use inventory", "success app secret"]);
    }

    #[tokio::test]
    async fn test_statements_are_renumbered() {
        let handler = Arc::new(TestHandler::default());
        let (addr, task) = start(handler.clone()).await;
        let mut conn = UpstreamConnection::connect(&client(addr, "secret")).await.unwrap();

        let stmt = conn.prepare("select ?").await.unwrap();
        assert_eq!(stmt.handle.statement_id(), 1);
        assert_eq!(stmt.params, 1);
        assert_eq!(stmt.param_defs.len(), 1);

        let response = conn.execute_statement(&stmt.handle, &[0, 1, 0, 0, 0]).await.unwrap();
        assert!(matches!(response, QueryResponse::Relayed(_)));
        conn.close_statement(&stmt.handle).await.unwrap();

        // Still responsive after COM_STMT_CLOSE, which has no reply
        conn.use_db("sales").await.unwrap();
        conn.close().await;
        task.await.unwrap().unwrap();

        let events = handler.events();
        assert_eq!(events[1], "prepare select ?");
        assert_eq!(events[2], "execute local statement 77 select ? [0, 1, 0, 0, 0]");
        assert_eq!(events[3], "close local statement 77");
        assert_eq!(events[4], "use sales");
    }

    #[tokio::test]
    async fn test_errors_keep_connection_open() {
        let handler = Arc::new(TestHandler::default());
        let (addr, task) = start(handler.clone()).await;
        let mut conn = UpstreamConnection::connect(&client(addr, "secret")).await.unwrap();

        let err = conn.execute("fail").await.unwrap_err();
        match err {
            ProxyError::Server { code, message, .. } => {
                assert_eq!(code, ER_UNKNOWN_ERROR);
                assert_eq!(message, "not supported now");
            }
            other => panic!("expected an ERR packet, got {:?}", other),
        }

        let columns = conn.field_list("users", "%").await.unwrap();
        assert_eq!(parse_column_definition(&columns[0]).unwrap().table, "users");

        let response = conn.execute("select 2").await.unwrap();
        assert_eq!(text_rows(response, 1), vec![vec![Some("select 2".to_string())]]);

        conn.close().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_prepared_statement_limit() {
        let handler = Arc::new(TestHandler::default());
        let options = ServeOptions {
            max_prepared_statements: 2,
            ..ServeOptions::default()
        };
        let (addr, task) = start_with(handler.clone(), options).await;
        let mut conn = UpstreamConnection::connect(&client(addr, "secret")).await.unwrap();

        let first = conn.prepare("select 1").await.unwrap();
        conn.prepare("select 2").await.unwrap();
        match conn.prepare("select 3").await.unwrap_err() {
            ProxyError::Server { code, state, .. } => {
                assert_eq!(code, ER_MAX_PREPARED_STMT_COUNT_REACHED);
                assert_eq!(state, "42000");
            }
            other => panic!("expected an ERR packet, got {:?}", other),
        }

        // Closing one frees a slot
        conn.close_statement(&first.handle).await.unwrap();
        let third = conn.prepare("select 4").await.unwrap();
        assert_eq!(third.handle.statement_id(), 3);

        conn.close().await;
        task.await.unwrap().unwrap();

        let prepared: Vec<_> = handler
            .events()
            .into_iter()
            .filter(|e| e.starts_with("prepare"))
            .collect();
        assert_eq!(prepared, vec!["prepare select 1", "prepare select 2", "prepare select 4"]);
    }
}
