use sqlx::{QueryBuilder, SqlitePool};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    BoxFuture,
    types::{DeliveryAttemptLog, ListLogsResponse},
};

#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("log store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid stored log: {0}")]
    Parse(String),
}

/// A log row before storage assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDeliveryAttemptLog {
    pub event_id: String,
    pub target_url: String,
    pub request_payload: String,
    pub response_status: u16,
    pub success: bool,
    pub error_message: Option<String>,
    pub attempt_time: String,
}

impl NewDeliveryAttemptLog {
    fn with_id(self, id: i64) -> DeliveryAttemptLog {
        DeliveryAttemptLog {
            id,
            event_id: self.event_id,
            target_url: self.target_url,
            request_payload: self.request_payload,
            response_status: self.response_status,
            success: self.success,
            error_message: self.error_message,
            attempt_time: self.attempt_time,
        }
    }
}

/// Newest-first page of logs. `before_id` is exclusive.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub event_id: Option<String>,
    pub before_id: Option<i64>,
    pub limit: i64,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            event_id: None,
            before_id: None,
            limit: 50,
        }
    }
}

/// Append-only repository of delivery attempts. Rows are never updated or
/// deleted once appended.
pub trait LogStore: Send + Sync + 'static {
    fn append(
        &self,
        log: NewDeliveryAttemptLog,
    ) -> BoxFuture<'_, Result<DeliveryAttemptLog, LogStoreError>>;

    fn list(&self, query: LogQuery) -> BoxFuture<'_, Result<ListLogsResponse, LogStoreError>>;
}

#[derive(Debug, Clone)]
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    event_id: String,
    target_url: String,
    request_payload: String,
    response_status: i64,
    success: bool,
    error_message: Option<String>,
    attempt_time: String,
}

impl TryFrom<LogRow> for DeliveryAttemptLog {
    type Error = LogStoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let response_status = u16::try_from(row.response_status).map_err(|_| {
            LogStoreError::Parse(format!("response_status out of range: {}", row.response_status))
        })?;

        Ok(DeliveryAttemptLog {
            id: row.id,
            event_id: row.event_id,
            target_url: row.target_url,
            request_payload: row.request_payload,
            response_status,
            success: row.success,
            error_message: row.error_message,
            attempt_time: row.attempt_time,
        })
    }
}

impl LogStore for SqliteLogStore {
    fn append(
        &self,
        log: NewDeliveryAttemptLog,
    ) -> BoxFuture<'_, Result<DeliveryAttemptLog, LogStoreError>> {
        Box::pin(async move {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO delivery_attempt_logs (
                    event_id,
                    target_url,
                    request_payload,
                    response_status,
                    success,
                    error_message,
                    attempt_time
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
            )
            .bind(&log.event_id)
            .bind(&log.target_url)
            .bind(&log.request_payload)
            .bind(i64::from(log.response_status))
            .bind(log.success)
            .bind(log.error_message.as_deref())
            .bind(&log.attempt_time)
            .fetch_one(&self.pool)
            .await?;

            Ok(log.with_id(id))
        })
    }

    fn list(&self, query: LogQuery) -> BoxFuture<'_, Result<ListLogsResponse, LogStoreError>> {
        Box::pin(async move {
            let mut builder = QueryBuilder::new(
                "SELECT \
                    id, \
                    event_id, \
                    target_url, \
                    request_payload, \
                    response_status, \
                    success, \
                    error_message, \
                    attempt_time \
                FROM delivery_attempt_logs \
                WHERE 1 = 1",
            );

            if let Some(event_id) = query.event_id.as_deref() {
                builder.push(" AND event_id = ");
                builder.push_bind(event_id);
            }

            if let Some(before_id) = query.before_id {
                builder.push(" AND id < ");
                builder.push_bind(before_id);
            }

            builder.push(" ORDER BY id DESC LIMIT ");
            builder.push_bind(query.limit + 1);

            let rows: Vec<LogRow> = builder.build_query_as().fetch_all(&self.pool).await?;

            let logs = rows
                .into_iter()
                .map(DeliveryAttemptLog::try_from)
                .collect::<Result<Vec<_>, _>>()?;

            Ok(page(logs, query.limit))
        })
    }
}

/// Non-durable store for tests and local experiments.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    logs: Mutex<Vec<DeliveryAttemptLog>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows in append order.
    pub async fn logs(&self) -> Vec<DeliveryAttemptLog> {
        self.logs.lock().await.clone()
    }

    pub async fn logs_for(&self, event_id: &str) -> Vec<DeliveryAttemptLog> {
        self.logs
            .lock()
            .await
            .iter()
            .filter(|log| log.event_id == event_id)
            .cloned()
            .collect()
    }
}

impl LogStore for MemoryLogStore {
    fn append(
        &self,
        log: NewDeliveryAttemptLog,
    ) -> BoxFuture<'_, Result<DeliveryAttemptLog, LogStoreError>> {
        Box::pin(async move {
            let mut logs = self.logs.lock().await;
            let id = logs.len() as i64 + 1;
            let stored = log.with_id(id);
            logs.push(stored.clone());
            Ok(stored)
        })
    }

    fn list(&self, query: LogQuery) -> BoxFuture<'_, Result<ListLogsResponse, LogStoreError>> {
        Box::pin(async move {
            let logs = self.logs.lock().await;
            let matching: Vec<DeliveryAttemptLog> = logs
                .iter()
                .rev()
                .filter(|log| {
                    query
                        .event_id
                        .as_deref()
                        .is_none_or(|event_id| log.event_id == event_id)
                })
                .filter(|log| query.before_id.is_none_or(|before| log.id < before))
                .take(query.limit.max(0) as usize + 1)
                .cloned()
                .collect();

            Ok(page(matching, query.limit))
        })
    }
}

/// Trims a `limit + 1` fetch down to `limit` and derives the next cursor.
fn page(mut logs: Vec<DeliveryAttemptLog>, limit: i64) -> ListLogsResponse {
    let limit = limit.max(0) as usize;
    let has_more = logs.len() > limit;
    logs.truncate(limit);

    let next_before_id = if has_more {
        logs.last().map(|log| log.id)
    } else {
        None
    };

    ListLogsResponse {
        logs,
        next_before_id,
    }
}
