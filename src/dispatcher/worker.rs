use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{DeliveryExecutor, DeliveryReport, DispatcherConfig, executor::panic_message};
use crate::{
    channel::{Channel, ChannelError},
    types::DeliveryAttemptLog,
};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls of an empty partition.
    pub poll_interval: Duration,
    /// Sleep after the channel reports an error.
    pub channel_backoff: Duration,
}

impl From<&DispatcherConfig> for WorkerConfig {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            channel_backoff: config.channel_backoff,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

/// What happened to one consumed record. Every variant is committed.
#[derive(Debug)]
pub enum Processed {
    Delivered(DeliveryReport),
    /// The delivery task panicked after the HTTP call, e.g. inside the log
    /// store. `log` is the failure row written in its place, if any.
    Aborted {
        offset: u64,
        log: Option<DeliveryAttemptLog>,
    },
    /// The record body could not be decoded.
    Skipped { offset: u64 },
}

#[derive(Debug, Error)]
#[error("dispatcher workers still running after {0:?}")]
pub struct ShutdownTimeout(pub Duration);

/// Consumes every partition of a channel, one sequential worker per
/// partition. Records are committed only after `deliver` has returned.
#[derive(Clone)]
pub struct Dispatcher {
    channel: Arc<dyn Channel>,
    executor: Arc<DeliveryExecutor>,
    config: WorkerConfig,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn Channel>,
        executor: Arc<DeliveryExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            channel,
            executor,
            config,
        }
    }

    pub fn spawn(&self, cancel: CancellationToken) -> DispatcherHandle {
        let partitions = self.channel.partitions();
        info!(
            topic = self.channel.topic(),
            partitions, "starting partition workers"
        );

        let workers = (0..partitions)
            .map(|partition| {
                let dispatcher = self.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { dispatcher.run_partition(partition, cancel).await })
            })
            .collect();

        DispatcherHandle { cancel, workers }
    }

    /// Consumes at most one record from `partition`. `Ok(None)` means the
    /// partition had nothing uncommitted.
    pub async fn process_next(&self, partition: u32) -> Result<Option<Processed>, ChannelError> {
        let record = match self.channel.poll(partition).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(ChannelError::Corrupt {
                partition,
                offset,
                message,
            }) => {
                error!(partition, offset, error = %message, "skipping undecodable record");
                self.channel.commit(partition, offset).await?;
                return Ok(Some(Processed::Skipped { offset }));
            }
            Err(err) => return Err(err),
        };

        let offset = record.offset;
        let event_id = record.event.event_id.clone();
        debug!(partition, offset, event_id = %event_id, "dispatching record");

        // A panic inside one delivery must not take the partition worker down.
        let executor = Arc::clone(&self.executor);
        let event = record.event;
        let task_event = event.clone();
        let processed =
            match tokio::spawn(async move { executor.deliver(&task_event).await }).await {
                Ok(report) => Processed::Delivered(report),
                Err(join_err) => {
                    let message = format!("delivery aborted: {}", panic_message(join_err));
                    error!(
                        partition,
                        offset,
                        event_id = %event_id,
                        error = %message,
                        "delivery task aborted"
                    );
                    let executor = Arc::clone(&self.executor);
                    let log = tokio::spawn(async move {
                        executor.log_aborted(&event, message).await
                    })
                    .await
                    .ok()
                    .and_then(|report| report.log);
                    Processed::Aborted { offset, log }
                }
            };

        self.channel.commit(partition, offset).await?;
        Ok(Some(processed))
    }

    async fn run_partition(&self, partition: u32, cancel: CancellationToken) {
        info!(partition, "partition worker started");

        while !cancel.is_cancelled() {
            let pause = match self.process_next(partition).await {
                Ok(Some(_)) => continue,
                Ok(None) => self.config.poll_interval,
                Err(err) => {
                    warn!(partition, error = %err, "channel error, backing off");
                    self.config.channel_backoff
                }
            };

            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                () = cancel.cancelled() => break,
            }
        }

        info!(partition, "partition worker stopped");
    }
}

pub struct DispatcherHandle {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops polling and waits for in-flight deliveries to finish.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), ShutdownTimeout> {
        info!(
            workers = self.workers.len(),
            timeout_ms = timeout.as_millis(),
            "stopping dispatcher"
        );
        self.cancel.cancel();

        let join_all = async {
            for worker in self.workers {
                if let Err(err) = worker.await {
                    error!(error = %err, "partition worker panicked");
                }
            }
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(()) => {
                info!("dispatcher stopped");
                Ok(())
            }
            Err(_elapsed) => {
                error!(timeout_ms = timeout.as_millis(), "dispatcher shutdown timed out");
                Err(ShutdownTimeout(timeout))
            }
        }
    }
}
