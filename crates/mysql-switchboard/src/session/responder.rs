use async_trait::async_trait;

use crate::error::Result;
use crate::server::{PreparedStatement, QueryResponse};

use super::StatementHandle;

/// What the router forwards a command to: an upstream connection or the
/// local stub.
///
/// Unlike [`CommandHandler`](crate::server::CommandHandler), a responder is
/// owned by one session and borrowed mutably under the router's lock.
#[async_trait]
pub trait Responder: Send {
    async fn use_db(&mut self, database: &str) -> Result<()>;

    async fn query(&mut self, sql: &str) -> Result<QueryResponse>;

    async fn field_list(&mut self, table: &str, wildcard: &str) -> Result<Vec<Vec<u8>>>;

    async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement>;

    async fn execute(
        &mut self,
        handle: &StatementHandle,
        sql: &str,
        params: &[u8],
    ) -> Result<QueryResponse>;

    async fn close_statement(&mut self, handle: &StatementHandle) -> Result<()>;
}
