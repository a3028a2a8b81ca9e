//! Statement execution on a single MySQL connection.
//!
//! - Reads stream at most `row_limit + 1` rows; the extra row only signals truncation
//! - Mutations run inside `BEGIN … COMMIT`
//! - Every statement is bounded by the query timeout
//!
//! Callers own the connection and decide what to do with it when an error
//! invalidates it; see [`ConnectionGateway`](super::ConnectionGateway).

use crate::db::types::RowToJson;
use crate::error::{GatewayError, GatewayResult};
use crate::logging::Redactor;
use crate::models::{QueryParam, QueryResult, Statement, StatementKind};
use crate::secure_log;
use futures_util::StreamExt;
use sqlx::mysql::{MySqlArguments, MySqlConnection, MySqlRow};
use sqlx::{Connection, Executor};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Run a statement and convert its outcome into a [`QueryResult`].
pub async fn run(
    conn: &mut MySqlConnection,
    statement: &Statement,
    query_timeout: Duration,
    redactor: &Redactor,
) -> GatewayResult<QueryResult> {
    let start = Instant::now();
    secure_log!(
        debug,
        "Executing statement",
        kind = format!("{:?}", statement.kind),
        params = statement.params.len(),
        limit = statement.row_limit,
        timeout_secs = query_timeout.as_secs()
    );

    match statement.kind {
        StatementKind::Read => {
            let rows = fetch_rows(conn, statement, query_timeout, redactor).await?;
            Ok(process_rows(rows, statement.row_limit, start))
        }
        StatementKind::Mutating => {
            let (rows_affected, last_insert_id) =
                execute_committed(conn, statement, query_timeout, redactor).await?;
            let elapsed = start.elapsed().as_millis() as u64;
            secure_log!(
                debug,
                "Transaction committed",
                rows_affected = rows_affected,
                elapsed_ms = elapsed
            );
            Ok(QueryResult::write_result(rows_affected, last_insert_id, elapsed))
        }
    }
}

async fn fetch_rows(
    conn: &mut MySqlConnection,
    statement: &Statement,
    query_timeout: Duration,
    redactor: &Redactor,
) -> GatewayResult<Vec<MySqlRow>> {
    let fetch_limit = statement.row_limit as usize + 1;
    // Without params, send raw SQL so statements that cannot be prepared still work
    let rows_future = async {
        if statement.params.is_empty() {
            (&mut *conn)
                .fetch(statement.sql.as_str())
                .take(fetch_limit)
                .collect::<Vec<_>>()
                .await
        } else {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_param(query, param);
            }
            query
                .fetch(&mut *conn)
                .take(fetch_limit)
                .collect::<Vec<_>>()
                .await
        }
    };

    match timeout(query_timeout, rows_future).await {
        Ok(results) => results
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::from_statement(e, |s| redactor.scrub(s))),
        Err(_) => Err(timeout_error("query execution", query_timeout)),
    }
}

async fn execute_committed(
    conn: &mut MySqlConnection,
    statement: &Statement,
    query_timeout: Duration,
    redactor: &Redactor,
) -> GatewayResult<(u64, u64)> {
    let map_err = |e: sqlx::Error| GatewayError::from_statement(e, |s| redactor.scrub(s));

    let work = async {
        let mut tx = conn.begin().await.map_err(map_err)?;
        let result = if statement.params.is_empty() {
            (&mut *tx).execute(statement.sql.as_str()).await
        } else {
            let mut query = sqlx::query(&statement.sql);
            for param in &statement.params {
                query = bind_param(query, param);
            }
            query.execute(&mut *tx).await
        }
        .map_err(map_err)?;
        tx.commit().await.map_err(map_err)?;
        Ok::<_, GatewayError>((result.rows_affected(), result.last_insert_id()))
    };

    match timeout(query_timeout, work).await {
        Ok(outcome) => outcome,
        Err(_) => Err(timeout_error("statement execution", query_timeout)),
    }
}

/// Convert fetched rows into a result, trimming the sentinel row.
fn process_rows(rows: Vec<MySqlRow>, row_limit: u32, start: Instant) -> QueryResult {
    let execution_time_ms = start.elapsed().as_millis() as u64;

    let Some(first) = rows.first() else {
        return QueryResult::rows(Vec::new(), Vec::new(), false, execution_time_ms);
    };

    let columns = first.column_metadata();
    let total_rows = rows.len();
    let truncated = total_rows > row_limit as usize;

    let json_rows = rows
        .iter()
        .take(row_limit as usize)
        .map(|r| r.to_json_map())
        .collect();

    if truncated {
        secure_log!(
            info,
            "Query result truncated",
            limit = row_limit,
            elapsed_ms = execution_time_ms
        );
    }

    QueryResult::rows(columns, json_rows, truncated, execution_time_ms)
}

fn timeout_error(operation: &str, limit: Duration) -> GatewayError {
    GatewayError::timeout(operation, limit.as_secs())
}

fn bind_param<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
    }
}
