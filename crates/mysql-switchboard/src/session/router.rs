//! Per-connection command routing.
//!
//! A session starts undecided. Once the login is verified the auth handler
//! moves it to proxy mode, holding an upstream connection, or to fallback
//! mode, served by the [`LocalResponder`]. The decision is made once.
//!
//! All state sits behind one async mutex, and the upstream connect runs
//! while holding it. A command racing the auth callback therefore sees
//! either the old mode or the new one, never a half-built upstream.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{LocalResponder, Responder, StatementHandle};
use crate::auth::BackendSelector;
use crate::backend::{Catalog, UpstreamConnection};
use crate::config::BackendConfig;
use crate::error::{ProxyError, Result};
use crate::protocol::mysql::COM_SET_OPTION;
use crate::server::{CommandHandler, PreparedStatement, QueryResponse};

/// Which responder serves the session.
#[derive(Debug)]
pub enum Mode {
    Undecided,
    Proxy {
        backend: BackendConfig,
        upstream: UpstreamConnection,
    },
    Fallback,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Undecided => "undecided",
            Mode::Proxy { .. } => "proxy",
            Mode::Fallback => "fallback",
        }
    }
}

/// Mutable state of one session.
#[derive(Debug)]
pub struct RouterState {
    pub mode: Mode,
    /// Last database the client selected, replayed when the mode is decided
    pub pending_database: Option<String>,
    pub local: LocalResponder,
}

impl RouterState {
    fn new() -> Self {
        Self {
            mode: Mode::Undecided,
            pending_database: None,
            local: LocalResponder::new(),
        }
    }

    /// The responder for the current mode, with its log tag.
    ///
    /// Undecided sessions are served locally.
    fn active(&mut self) -> (&'static str, &mut dyn Responder) {
        match &mut self.mode {
            Mode::Proxy { upstream, .. } => ("proxy", upstream as &mut dyn Responder),
            Mode::Undecided | Mode::Fallback => ("local", &mut self.local as &mut dyn Responder),
        }
    }

    fn is_proxy(&self) -> bool {
        matches!(self.mode, Mode::Proxy { .. })
    }

    /// Reject handles created by the other kind of responder.
    fn check_handle(&self, handle: &StatementHandle) -> Result<()> {
        match (self.is_proxy(), handle) {
            (true, StatementHandle::Local { .. }) | (false, StatementHandle::Upstream { .. }) => {
                Err(ProxyError::StatementMismatch(format!(
                    "{} used in {} mode",
                    handle,
                    self.mode.name()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// The [`CommandHandler`] and [`BackendSelector`] of one client connection.
pub struct SessionRouter {
    catalog: Arc<Catalog>,
    state: Mutex<RouterState>,
}

impl SessionRouter {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            state: Mutex::new(RouterState::new()),
        }
    }

    /// Name of the current mode: `undecided`, `proxy` or `fallback`
    pub async fn mode_name(&self) -> &'static str {
        self.state.lock().await.mode.name()
    }

    /// Id of the upstream connection, in proxy mode
    pub async fn upstream_id(&self) -> Option<u64> {
        match &self.state.lock().await.mode {
            Mode::Proxy { upstream, .. } => Some(upstream.id()),
            _ => None,
        }
    }

    /// Current database of the local responder
    pub async fn local_database(&self) -> Option<String> {
        self.state.lock().await.local.current_db().map(str::to_string)
    }

    /// Release the upstream connection, if any.
    ///
    /// Safe to call in any mode and more than once.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if let Mode::Proxy { upstream, .. } = &mut state.mode {
            if !upstream.is_closed() {
                debug!("[proxy] Closing upstream connection {}", upstream.id());
                upstream.close().await;
            }
        }
    }
}

#[async_trait]
impl BackendSelector for SessionRouter {
    async fn set_upstream(&self, server: &BackendConfig) -> Result<()> {
        let mut state = self.state.lock().await;
        if !matches!(state.mode, Mode::Undecided) {
            debug!(
                "Ignoring upstream {} for a session already in {} mode",
                server.label(),
                state.mode.name()
            );
            return Ok(());
        }

        let mut upstream = self.catalog.connect(server).await?;
        if let Some(database) = state.pending_database.clone() {
            if database != server.database {
                if let Err(e) = upstream.use_db(&database).await {
                    warn!(
                        "Replaying database {} on {} failed: {}",
                        database,
                        server.label(),
                        e
                    );
                    upstream.close().await;
                    return Err(e);
                }
            }
        }

        info!(
            "Proxy connected upstream {}:{} user={} db={}",
            server.host, server.port, server.user, server.database
        );
        state.mode = Mode::Proxy {
            backend: server.clone(),
            upstream,
        };
        Ok(())
    }

    async fn set_fallback(&self) {
        let mut state = self.state.lock().await;
        if !matches!(state.mode, Mode::Undecided) {
            debug!(
                "Ignoring fallback for a session already in {} mode",
                state.mode.name()
            );
            return;
        }
        state.mode = Mode::Fallback;
        if let Some(database) = state.pending_database.clone() {
            if let Err(e) = state.local.use_db(&database).await {
                warn!("[local] Replaying database {} failed: {}", database, e);
            }
        }
    }
}

#[async_trait]
impl CommandHandler for SessionRouter {
    async fn use_db(&self, database: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.pending_database = Some(database.to_string());
        if matches!(state.mode, Mode::Undecided) {
            debug!("[local] UseDB {} (pending)", database);
            return Ok(());
        }
        let (tag, responder) = state.active();
        debug!("[{}] UseDB {}", tag, database);
        responder.use_db(database).await
    }

    async fn handle_query(&self, sql: &str) -> Result<QueryResponse> {
        let mut state = self.state.lock().await;
        let (tag, responder) = state.active();
        debug!("[{}] Query: {}", tag, sql);
        let result = responder.query(sql).await;
        log_result(tag, "Query", &result);
        result
    }

    async fn handle_field_list(&self, table: &str, wildcard: &str) -> Result<Vec<Vec<u8>>> {
        let mut state = self.state.lock().await;
        let (tag, responder) = state.active();
        debug!("[{}] FieldList table={} wildcard={}", tag, table, wildcard);
        let result = responder.field_list(table, wildcard).await;
        match &result {
            Ok(fields) => debug!("[{}] FieldList result fields={}", tag, fields.len()),
            Err(e) => debug!("[{}] FieldList error: {}", tag, e),
        }
        result
    }

    async fn handle_stmt_prepare(&self, sql: &str) -> Result<PreparedStatement> {
        let mut state = self.state.lock().await;
        let (tag, responder) = state.active();
        debug!("[{}] StmtPrepare: {}", tag, sql);
        let result = responder.prepare(sql).await;
        match &result {
            Ok(stmt) => debug!(
                "[{}] StmtPrepare ok params={} columns={}",
                tag, stmt.params, stmt.columns
            ),
            Err(e) => debug!("[{}] StmtPrepare error: {}", tag, e),
        }
        result
    }

    async fn handle_stmt_execute(
        &self,
        handle: &StatementHandle,
        sql: &str,
        params: &[u8],
    ) -> Result<QueryResponse> {
        let mut state = self.state.lock().await;
        state.check_handle(handle)?;
        let (tag, responder) = state.active();
        debug!("[{}] StmtExecute: {} ({})", tag, sql, handle);
        let result = responder.execute(handle, sql, params).await;
        log_result(tag, "StmtExecute", &result);
        result
    }

    async fn handle_stmt_close(&self, handle: &StatementHandle) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_handle(handle)?;
        let (tag, responder) = state.active();
        debug!("[{}] StmtClose {}", tag, handle);
        responder.close_statement(handle).await
    }

    async fn handle_other_command(&self, command: u8, payload: &[u8]) -> Result<()> {
        debug!("[other] cmd={:#04x} data_len={}", command, payload.len());
        if command == COM_SET_OPTION {
            return Ok(());
        }
        Err(ProxyError::UnsupportedCommand {
            command,
            payload: payload.to_vec(),
        })
    }
}

fn log_result(tag: &str, what: &str, result: &Result<QueryResponse>) {
    match result {
        Ok(QueryResponse::Ok(ok)) => debug!(
            "[{}] {} result: affected={} insertId={} status={}",
            tag, what, ok.affected_rows, ok.last_insert_id, ok.status_flags
        ),
        Ok(QueryResponse::ResultSet(rs)) => debug!(
            "[{}] {} result: resultset rows={} cols={}",
            tag,
            what,
            rs.rows.len(),
            rs.columns.len()
        ),
        Ok(QueryResponse::Relayed(packets)) => {
            debug!("[{}] {} result: packets={}", tag, what, packets.len())
        }
        Err(e) => debug!("[{}] {} error: {}", tag, what, e),
    }
}
