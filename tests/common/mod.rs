#![allow(dead_code, clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{
    collections::VecDeque,
    fs,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use sqlx::{
    Connection, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tempfile::NamedTempFile;
use webhook_dispatcher::{
    BoxFuture,
    audit::{LogQuery, LogStore, LogStoreError, NewDeliveryAttemptLog},
    dispatcher::{HttpClient, HttpResponse, OutboundRequest, TransportError},
    types::{DeliveryAttemptLog, ListLogsResponse, Payload, WebhookEvent},
};

pub struct TestDb {
    pub pool: SqlitePool,
    _db_file: NamedTempFile,
}

pub async fn setup_db() -> TestDb {
    let db_file = NamedTempFile::new().expect("create temp sqlite file");
    let options = SqliteConnectOptions::new()
        .filename(db_file.path())
        .create_if_missing(true)
        .busy_timeout(Duration::from_millis(500));

    let mut conn = SqliteConnection::connect_with(&options)
        .await
        .expect("connect sqlite");
    run_migrations(&mut conn).await;
    conn.close().await.expect("close migration conn");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connect pool");

    TestDb {
        pool,
        _db_file: db_file,
    }
}

async fn run_migrations(conn: &mut SqliteConnection) {
    let mut entries: Vec<_> = fs::read_dir("migrations")
        .expect("read migrations dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("sql"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let contents = fs::read_to_string(entry.path()).expect("read migration");
        for stmt in contents.split(';') {
            let stmt = stmt.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt)
                    .execute(&mut *conn)
                    .await
                    .expect("run migration");
            }
        }
    }
}

pub fn event(event_id: &str, client_id: &str, target_url: &str) -> WebhookEvent {
    let mut payload = Payload::new();
    payload.insert("orderId".to_string(), serde_json::json!(event_id));
    WebhookEvent {
        event_id: event_id.to_string(),
        client_id: client_id.to_string(),
        target_url: target_url.to_string(),
        payload,
    }
}

/// Answers requests from a script, then repeats the fallback forever.
pub struct ScriptedHttpClient {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    fallback: Result<HttpResponse, TransportError>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedHttpClient {
    pub fn always(status: u16) -> Self {
        Self::new(Vec::new(), Ok(HttpResponse::new(status, "")))
    }

    pub fn failing(err: TransportError) -> Self {
        Self::new(Vec::new(), Err(err))
    }

    pub fn new(
        script: Vec<Result<HttpResponse, TransportError>>,
        fallback: Result<HttpResponse, TransportError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl HttpClient for ScriptedHttpClient {
    fn post(&self, request: OutboundRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        self.requests.lock().unwrap().push(request);
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Box::pin(async move { next })
    }
}

/// Log store whose appends always fail; counts the attempts.
#[derive(Default)]
pub struct FailingLogStore {
    pub appends: AtomicUsize,
}

impl FailingLogStore {
    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

impl LogStore for FailingLogStore {
    fn append(
        &self,
        _log: NewDeliveryAttemptLog,
    ) -> BoxFuture<'_, Result<DeliveryAttemptLog, LogStoreError>> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(LogStoreError::Unavailable("disk full".to_string())) })
    }

    fn list(&self, _query: LogQuery) -> BoxFuture<'_, Result<ListLogsResponse, LogStoreError>> {
        Box::pin(async { Err(LogStoreError::Unavailable("disk full".to_string())) })
    }
}
