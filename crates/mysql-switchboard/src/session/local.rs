//! Stub responder for sessions that matched no backend.
//!
//! It answers just enough for interactive clients to connect and poke
//! around: the version query, the database list, the current database, and
//! a fixed `users` table.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use super::{Responder, StatementHandle};
use crate::error::{ProxyError, Result};
use crate::protocol::mysql::{
    ColumnDefinition, ResultSet, BINARY_FLAG, MYSQL_TYPE_DATETIME, MYSQL_TYPE_LONGLONG,
    MYSQL_TYPE_VAR_STRING, NOT_NULL_FLAG,
};
use crate::server::{PreparedStatement, QueryResponse};

const VERSION_QUERY: &str = "select concat(@@version, ' ', @@version_comment)";
const VERSION_COLUMN: &str = "concat(@@version, ' ', @@version_comment)";
const REPORTED_VERSION: &str = "8.0.11";
const SAMPLE_DATABASE: &str = "userdb";
const SAMPLE_USERS: i64 = 10;

const NOT_SUPPORTED: &str = "not supported now";

/// Answers a fixed set of queries and tracks the current database.
#[derive(Debug, Clone, Default)]
pub struct LocalResponder {
    current_db: Option<String>,
}

impl LocalResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database selected by the last `use_db` or `USE` query
    pub fn current_db(&self) -> Option<&str> {
        self.current_db.as_deref()
    }

    fn answer(&mut self, sql: &str) -> Result<QueryResponse> {
        let query = normalize_query(sql);

        if query.eq_ignore_ascii_case("SET NAMES 'utf8mb4'") {
            return Ok(QueryResponse::ok());
        }
        if query.eq_ignore_ascii_case(VERSION_QUERY) {
            return Ok(single_value(VERSION_COLUMN, Some(REPORTED_VERSION)));
        }
        if query.eq_ignore_ascii_case("show databases") {
            return Ok(single_value("Database", Some(SAMPLE_DATABASE)));
        }
        if query.eq_ignore_ascii_case("select database()")
            || query.eq_ignore_ascii_case("select schema()")
        {
            return Ok(single_value("DATABASE()", self.current_db()));
        }
        if let Some(rest) = strip_prefix_ignore_case(query, "use ") {
            let name = rest.trim().trim_matches(|c| c == '`' || c == '"' || c == '\'');
            if !name.is_empty() {
                self.current_db = Some(name.to_string());
            }
            return Ok(QueryResponse::ok());
        }
        if query.eq_ignore_ascii_case("select * from users") {
            return Ok(QueryResponse::ResultSet(sample_users()));
        }

        Err(ProxyError::Unsupported(NOT_SUPPORTED.to_string()))
    }
}

/// Trim whitespace and any trailing `;` terminators.
fn normalize_query(sql: &str) -> &str {
    let mut query = sql.trim();
    while let Some(rest) = query.strip_suffix(';') {
        query = rest.trim();
    }
    query
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        s.get(prefix.len()..)
    } else {
        None
    }
}

fn single_value(column: &str, value: Option<&str>) -> QueryResponse {
    let mut rs = ResultSet::new(vec![ColumnDefinition::new(column, MYSQL_TYPE_VAR_STRING)]);
    rs.push_row(vec![value.map(str::to_string)]);
    QueryResponse::ResultSet(rs)
}

fn sample_users() -> ResultSet {
    let id_column = |name: &str| {
        let mut column = ColumnDefinition::new(name, MYSQL_TYPE_LONGLONG);
        column.flags = BINARY_FLAG | NOT_NULL_FLAG;
        column
    };
    let mut rs = ResultSet::new(vec![
        id_column("userid"),
        ColumnDefinition::new("username", MYSQL_TYPE_VAR_STRING),
        id_column("age"),
        ColumnDefinition::new("gender", MYSQL_TYPE_VAR_STRING),
        ColumnDefinition::new("create_date", MYSQL_TYPE_DATETIME),
    ]);

    let base = Utc.with_ymd_and_hms(2025, 12, 1, 9, 0, 0).single();
    for i in 1..=SAMPLE_USERS {
        let gender = if i % 2 == 0 { "F" } else { "M" };
        let created = base.map(|base| {
            (base + Duration::days(i))
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        });
        rs.push_row(vec![
            Some(i.to_string()),
            Some(format!("user{:02}", i)),
            Some((20 + i).to_string()),
            Some(gender.to_string()),
            created,
        ]);
    }
    rs
}

#[async_trait]
impl Responder for LocalResponder {
    async fn use_db(&mut self, database: &str) -> Result<()> {
        self.current_db = Some(database.to_string());
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<QueryResponse> {
        self.answer(sql)
    }

    async fn field_list(&mut self, _table: &str, _wildcard: &str) -> Result<Vec<Vec<u8>>> {
        Err(ProxyError::Unsupported(NOT_SUPPORTED.to_string()))
    }

    async fn prepare(&mut self, _sql: &str) -> Result<PreparedStatement> {
        Err(ProxyError::Unsupported(NOT_SUPPORTED.to_string()))
    }

    async fn execute(
        &mut self,
        _handle: &StatementHandle,
        _sql: &str,
        _params: &[u8],
    ) -> Result<QueryResponse> {
        Err(ProxyError::Unsupported(NOT_SUPPORTED.to_string()))
    }

    async fn close_statement(&mut self, handle: &StatementHandle) -> Result<()> {
        match handle {
            StatementHandle::Local { .. } => Ok(()),
            other => Err(ProxyError::StatementMismatch(format!(
                "{} passed to the local responder",
                other
            ))),
        }
    }
}
