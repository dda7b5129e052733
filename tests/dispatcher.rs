#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use common::{FailingLogStore, ScriptedHttpClient, event, setup_db};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use webhook_dispatcher::{
    BoxFuture,
    audit::{
        LogQuery, LogStore, LogStoreError, MemoryLogStore, NewDeliveryAttemptLog, SqliteLogStore,
    },
    channel::{
        Channel, ChannelError, ChannelRecord, MemoryChannel, PublishReceipt, SqliteChannel,
        partition_for,
    },
    dispatcher::{
        AttemptOutcome, CircuitBreaker, CircuitConfig, DeliveryExecutor, DeliveryLogWriter,
        Dispatcher, HttpClient, HttpResponse, OutboundRequest, Processed, TransportError,
        WorkerConfig,
    },
    producer::Producer,
    types::{DeliveryAttemptLog, IngestRequest, ListLogsResponse, WebhookEvent},
};

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        poll_interval: Duration::from_millis(10),
        channel_backoff: Duration::from_millis(10),
    }
}

fn dispatcher(
    channel: Arc<dyn Channel>,
    http: Arc<dyn HttpClient>,
    store: Arc<dyn LogStore>,
) -> Dispatcher {
    let breaker = Arc::new(CircuitBreaker::new(
        "webhook-delivery",
        CircuitConfig {
            failure_rate_threshold: 1.0,
            window_size: 100,
            minimum_calls: 100,
            ..CircuitConfig::default()
        },
    ));
    let executor = Arc::new(DeliveryExecutor::new(
        breaker,
        http,
        DeliveryLogWriter::new(store),
    ));
    Dispatcher::new(channel, executor, worker_config())
}

async fn wait_for_logs(store: &MemoryLogStore, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.logs().await.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("delivery logs did not appear in time");
}

/// Records, for every request, how many log rows existed when it started.
struct OrderRecorder {
    store: Arc<MemoryLogStore>,
    seen: Mutex<Vec<(String, usize)>>,
}

impl HttpClient for OrderRecorder {
    fn post(&self, request: OutboundRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            let logged = self.store.logs().await.len();
            self.seen.lock().unwrap().push((request.event_id, logged));
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(HttpResponse::new(200, ""))
        })
    }
}

#[tokio::test]
async fn events_of_one_client_are_delivered_in_order() {
    let channel = Arc::new(MemoryChannel::new("webhook.deliveries", 3));
    let store = Arc::new(MemoryLogStore::new());
    let recorder = Arc::new(OrderRecorder {
        store: store.clone(),
        seen: Mutex::new(Vec::new()),
    });

    for id in ["E1", "E2", "E3"] {
        let receipt = channel
            .publish("c2", &event(id, "c2", "http://target/hook"))
            .await
            .unwrap();
        assert_eq!(receipt.partition, partition_for("c2", 3));
    }

    let handle = dispatcher(channel.clone(), recorder.clone(), store.clone())
        .spawn(CancellationToken::new());
    wait_for_logs(&store, 3).await;
    handle.shutdown(Duration::from_secs(1)).await.unwrap();

    let seen = recorder.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("E1".to_string(), 0),
            ("E2".to_string(), 1),
            ("E3".to_string(), 2)
        ]
    );
    let logged: Vec<String> = store.logs().await.into_iter().map(|l| l.event_id).collect();
    assert_eq!(logged, vec!["E1", "E2", "E3"]);
}

#[tokio::test]
async fn log_store_failure_still_advances_the_partition() {
    let channel = Arc::new(MemoryChannel::new("webhook.deliveries", 3));
    let store = Arc::new(FailingLogStore::default());
    let http = Arc::new(ScriptedHttpClient::always(200));
    let partition = partition_for("c1", 3);

    channel.publish("c1", &event("E1", "c1", "http://target/hook")).await.unwrap();
    channel.publish("c1", &event("E2", "c1", "http://target/hook")).await.unwrap();

    let dispatcher = dispatcher(channel.clone(), http.clone(), store.clone());
    for _ in 0..2 {
        match dispatcher.process_next(partition).await.unwrap() {
            Some(Processed::Delivered(report)) => {
                assert_eq!(report.outcome, AttemptOutcome::Delivered { status: 200 });
                assert!(report.log.is_none());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    assert!(dispatcher.process_next(partition).await.unwrap().is_none());
    assert_eq!(channel.committed(partition).await, 2);
    assert_eq!(store.appends(), 2);
    assert_eq!(http.calls(), 2);
}

/// Wraps a channel and fails the next commit when armed.
struct FlakyCommit {
    inner: MemoryChannel,
    fail_next_commit: AtomicBool,
}

impl Channel for FlakyCommit {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn partitions(&self) -> u32 {
        self.inner.partitions()
    }

    fn publish<'a>(
        &'a self,
        key: &'a str,
        event: &'a WebhookEvent,
    ) -> BoxFuture<'a, Result<PublishReceipt, ChannelError>> {
        self.inner.publish(key, event)
    }

    fn poll(&self, partition: u32) -> BoxFuture<'_, Result<Option<ChannelRecord>, ChannelError>> {
        self.inner.poll(partition)
    }

    fn commit(&self, partition: u32, offset: u64) -> BoxFuture<'_, Result<(), ChannelError>> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Box::pin(async { Err(ChannelError::Unavailable("broker down".to_string())) });
        }
        self.inner.commit(partition, offset)
    }
}

#[tokio::test]
async fn uncommitted_event_is_redelivered() {
    let channel = Arc::new(FlakyCommit {
        inner: MemoryChannel::new("webhook.deliveries", 3),
        fail_next_commit: AtomicBool::new(true),
    });
    let store = Arc::new(MemoryLogStore::new());
    let http = Arc::new(ScriptedHttpClient::always(200));
    let partition = partition_for("c1", 3);

    channel.publish("c1", &event("E1", "c1", "http://target/hook")).await.unwrap();

    let dispatcher = dispatcher(channel.clone(), http.clone(), store.clone());
    let err = dispatcher.process_next(partition).await.unwrap_err();
    assert!(matches!(err, ChannelError::Unavailable(_)));

    let again = dispatcher.process_next(partition).await.unwrap();
    assert!(matches!(again, Some(Processed::Delivered(_))));
    assert!(dispatcher.process_next(partition).await.unwrap().is_none());

    // At-least-once: the attempt before the failed commit is logged too.
    assert_eq!(store.logs_for("E1").await.len(), 2);
    assert_eq!(http.calls(), 2);
}

/// Panics on one target URL, succeeds on everything else.
struct PoisonTarget;

impl HttpClient for PoisonTarget {
    fn post(&self, request: OutboundRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            if request.url.ends_with("/poison") {
                panic!("handler bug");
            }
            Ok(HttpResponse::new(200, ""))
        })
    }
}

#[tokio::test]
async fn panicking_delivery_is_contained_to_its_event() {
    let channel = Arc::new(MemoryChannel::new("webhook.deliveries", 3));
    let store = Arc::new(MemoryLogStore::new());
    let partition = partition_for("c1", 3);

    channel.publish("c1", &event("E1", "c1", "http://target/poison")).await.unwrap();
    channel.publish("c1", &event("E2", "c1", "http://target/hook")).await.unwrap();

    let dispatcher = dispatcher(channel.clone(), Arc::new(PoisonTarget), store.clone());

    match dispatcher.process_next(partition).await.unwrap() {
        Some(Processed::Delivered(report)) => {
            assert_eq!(
                report.outcome,
                AttemptOutcome::Aborted {
                    message: "delivery aborted: handler bug".to_string()
                }
            );
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let second = dispatcher.process_next(partition).await.unwrap();
    assert!(matches!(second, Some(Processed::Delivered(_))));

    assert_eq!(channel.committed(partition).await, 2);
    let logs = store.logs().await;
    let logged: Vec<&str> = logs.iter().map(|l| l.event_id.as_str()).collect();
    assert_eq!(logged, vec!["E1", "E2"]);
    assert_eq!(logs[0].response_status, 0);
    assert!(!logs[0].success);
    assert!(logs[1].success);
}

/// Memory store whose first append panics.
struct PanickyLogStore {
    inner: MemoryLogStore,
    armed: AtomicBool,
}

impl LogStore for PanickyLogStore {
    fn append(
        &self,
        log: NewDeliveryAttemptLog,
    ) -> BoxFuture<'_, Result<DeliveryAttemptLog, LogStoreError>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("log store bug");
        }
        self.inner.append(log)
    }

    fn list(&self, query: LogQuery) -> BoxFuture<'_, Result<ListLogsResponse, LogStoreError>> {
        self.inner.list(query)
    }
}

#[tokio::test]
async fn log_store_panic_still_leaves_a_failure_row() {
    let channel = Arc::new(MemoryChannel::new("webhook.deliveries", 3));
    let store = Arc::new(PanickyLogStore {
        inner: MemoryLogStore::new(),
        armed: AtomicBool::new(true),
    });
    let http = Arc::new(ScriptedHttpClient::always(200));
    let partition = partition_for("c1", 3);

    channel.publish("c1", &event("E1", "c1", "http://target/hook")).await.unwrap();

    let dispatcher = dispatcher(channel.clone(), http.clone(), store.clone());
    match dispatcher.process_next(partition).await.unwrap() {
        Some(Processed::Aborted { offset, log }) => {
            assert_eq!(offset, 0);
            let log = log.expect("failure row");
            assert_eq!(log.event_id, "E1");
            assert_eq!(log.response_status, 0);
            assert!(!log.success);
            assert_eq!(
                log.error_message.as_deref(),
                Some("delivery aborted: log store bug")
            );
        }
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(channel.committed(partition).await, 1);
    assert_eq!(store.inner.logs_for("E1").await.len(), 1);
    assert_eq!(http.calls(), 1);
}

/// Wraps a channel and fails the given number of polls before recovering.
struct FlakyPoll {
    inner: MemoryChannel,
    failing_polls: AtomicUsize,
}

impl FlakyPoll {
    fn new(failing_polls: usize) -> Self {
        Self {
            inner: MemoryChannel::new("webhook.deliveries", 3),
            failing_polls: AtomicUsize::new(failing_polls),
        }
    }
}

impl Channel for FlakyPoll {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn partitions(&self) -> u32 {
        self.inner.partitions()
    }

    fn publish<'a>(
        &'a self,
        key: &'a str,
        event: &'a WebhookEvent,
    ) -> BoxFuture<'a, Result<PublishReceipt, ChannelError>> {
        self.inner.publish(key, event)
    }

    fn poll(&self, partition: u32) -> BoxFuture<'_, Result<Option<ChannelRecord>, ChannelError>> {
        let down = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if down {
            return Box::pin(async { Err(ChannelError::Unavailable("broker down".to_string())) });
        }
        self.inner.poll(partition)
    }

    fn commit(&self, partition: u32, offset: u64) -> BoxFuture<'_, Result<(), ChannelError>> {
        self.inner.commit(partition, offset)
    }
}

#[tokio::test]
async fn poll_outage_commits_nothing_and_delivers_after_recovery() {
    let channel = Arc::new(FlakyPoll::new(1));
    let store = Arc::new(MemoryLogStore::new());
    let http = Arc::new(ScriptedHttpClient::always(200));
    let partition = partition_for("c1", 3);

    channel.publish("c1", &event("E1", "c1", "http://target/hook")).await.unwrap();

    let dispatcher = dispatcher(channel.clone(), http.clone(), store.clone());
    let err = dispatcher.process_next(partition).await.unwrap_err();
    assert!(matches!(err, ChannelError::Unavailable(_)));
    assert_eq!(channel.inner.committed(partition).await, 0);
    assert_eq!(http.calls(), 0);
    assert!(store.logs().await.is_empty());

    let recovered = dispatcher.process_next(partition).await.unwrap();
    assert!(matches!(recovered, Some(Processed::Delivered(_))));
    assert_eq!(channel.inner.committed(partition).await, 1);
    assert_eq!(store.logs_for("E1").await.len(), 1);
}

#[tokio::test]
async fn workers_back_off_through_a_poll_outage() {
    // Every partition worker polls, so enough failures to hit them all.
    let channel = Arc::new(FlakyPoll::new(9));
    let store = Arc::new(MemoryLogStore::new());
    let partition = partition_for("c1", 3);

    channel.publish("c1", &event("E1", "c1", "http://target/hook")).await.unwrap();
    channel.publish("c1", &event("E2", "c1", "http://target/hook")).await.unwrap();

    let handle = dispatcher(
        channel.clone(),
        Arc::new(ScriptedHttpClient::always(200)),
        store.clone(),
    )
    .spawn(CancellationToken::new());
    wait_for_logs(&store, 2).await;
    handle.shutdown(Duration::from_secs(1)).await.unwrap();

    let logged: Vec<String> = store.logs().await.into_iter().map(|l| l.event_id).collect();
    assert_eq!(logged, vec!["E1", "E2"]);
    assert_eq!(channel.inner.committed(partition).await, 2);
}

/// Holds requests to one URL until released.
struct Gate {
    blocked_url: String,
    release: Notify,
}

impl HttpClient for Gate {
    fn post(&self, request: OutboundRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            if request.url == self.blocked_url {
                self.release.notified().await;
            }
            Ok(HttpResponse::new(200, ""))
        })
    }
}

#[tokio::test]
async fn slow_partition_does_not_block_others() {
    let channel = Arc::new(MemoryChannel::new("webhook.deliveries", 3));
    let store = Arc::new(MemoryLogStore::new());
    let gate = Arc::new(Gate {
        blocked_url: "http://slow/hook".to_string(),
        release: Notify::new(),
    });
    assert_ne!(partition_for("c1", 3), partition_for("c2", 3));

    channel.publish("c1", &event("slow", "c1", "http://slow/hook")).await.unwrap();
    channel.publish("c2", &event("fast", "c2", "http://fast/hook")).await.unwrap();

    let handle = dispatcher(channel.clone(), gate.clone(), store.clone())
        .spawn(CancellationToken::new());
    assert_eq!(handle.worker_count(), 3);

    wait_for_logs(&store, 1).await;
    assert_eq!(store.logs().await[0].event_id, "fast");

    gate.release.notify_one();
    wait_for_logs(&store, 2).await;
    handle.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn unknown_partition_is_a_channel_error() {
    let channel = Arc::new(MemoryChannel::new("webhook.deliveries", 3));
    let dispatcher = dispatcher(
        channel,
        Arc::new(ScriptedHttpClient::always(200)),
        Arc::new(MemoryLogStore::new()),
    );

    let err = dispatcher.process_next(7).await.unwrap_err();
    assert!(matches!(
        err,
        ChannelError::UnknownPartition {
            partition: 7,
            partitions: 3
        }
    ));
}

#[tokio::test]
async fn produced_events_flow_through_sqlite_to_the_log() {
    let db = setup_db().await;
    let channel: Arc<dyn Channel> = Arc::new(SqliteChannel::new(
        db.pool.clone(),
        "webhook.deliveries",
        "webhook-dispatcher-group",
        3,
    ));
    let store = Arc::new(SqliteLogStore::new(db.pool.clone()));
    let producer = Producer::new(Arc::clone(&channel));

    let mut ids = Vec::new();
    for client in ["c1", "c2", "c1"] {
        let accepted = producer
            .submit(IngestRequest {
                client_id: Some(client.to_string()),
                target_url: Some("http://target/hook".to_string()),
                ..IngestRequest::default()
            })
            .await
            .unwrap();
        ids.push(accepted.event.event_id);
    }

    let dispatcher = dispatcher(
        Arc::clone(&channel),
        Arc::new(ScriptedHttpClient::always(200)),
        store.clone(),
    );
    for partition in 0..3 {
        while dispatcher.process_next(partition).await.unwrap().is_some() {}
    }

    let page = store.list(LogQuery::default()).await.unwrap();
    assert_eq!(page.logs.len(), 3);
    assert!(page.logs.iter().all(|log| log.success && log.response_status == 200));

    // c1's two events keep their publish order in the log.
    let c1_order: Vec<&String> = page
        .logs
        .iter()
        .rev()
        .map(|log| &log.event_id)
        .filter(|id| **id == ids[0] || **id == ids[2])
        .collect();
    assert_eq!(c1_order, vec![&ids[0], &ids[2]]);
}

#[tokio::test]
async fn corrupt_sqlite_record_is_skipped_and_the_next_one_delivered() {
    let db = setup_db().await;
    let channel: Arc<dyn Channel> = Arc::new(SqliteChannel::new(
        db.pool.clone(),
        "webhook.deliveries",
        "webhook-dispatcher-group",
        3,
    ));
    let partition = partition_for("c1", 3);

    sqlx::query(
        "INSERT INTO channel_messages \
            (topic, partition_id, seq, event_id, client_id, body, published_at) \
         VALUES ('webhook.deliveries', ?, 0, 'bad', 'c1', '{not json', '2026-01-01T00:00:00.000Z')",
    )
    .bind(i64::from(partition))
    .execute(&db.pool)
    .await
    .unwrap();
    let receipt = channel
        .publish("c1", &event("E2", "c1", "http://target/hook"))
        .await
        .unwrap();
    assert_eq!(receipt.offset, 1);

    let store = Arc::new(MemoryLogStore::new());
    let http = Arc::new(ScriptedHttpClient::always(200));
    let dispatcher = dispatcher(Arc::clone(&channel), http.clone(), store.clone());

    let skipped = dispatcher.process_next(partition).await.unwrap();
    assert!(matches!(skipped, Some(Processed::Skipped { offset: 0 })));

    match dispatcher.process_next(partition).await.unwrap() {
        Some(Processed::Delivered(report)) => assert_eq!(report.event_id, "E2"),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(dispatcher.process_next(partition).await.unwrap().is_none());

    assert_eq!(http.calls(), 1);
    let logged: Vec<String> = store.logs().await.into_iter().map(|l| l.event_id).collect();
    assert_eq!(logged, vec!["E2"]);
}
