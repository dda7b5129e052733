use tokio::sync::Mutex;

use super::{Channel, ChannelError, ChannelRecord, PublishReceipt, partition_for};
use crate::{BoxFuture, types::WebhookEvent};

#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<WebhookEvent>,
    /// Offset of the next record handed to the consumer.
    committed: u64,
}

/// In-process channel with the same ordering and redelivery contract as the
/// durable one. Holds one consumer position per partition.
#[derive(Debug)]
pub struct MemoryChannel {
    topic: String,
    partitions: Vec<Mutex<PartitionLog>>,
}

impl MemoryChannel {
    pub fn new(topic: impl Into<String>, partitions: u32) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|_| Mutex::new(PartitionLog::default()))
            .collect();
        Self {
            topic: topic.into(),
            partitions,
        }
    }

    /// Number of records appended to `partition`, committed or not.
    pub async fn len(&self, partition: u32) -> usize {
        match self.partitions.get(partition as usize) {
            Some(log) => log.lock().await.records.len(),
            None => 0,
        }
    }

    pub async fn committed(&self, partition: u32) -> u64 {
        match self.partitions.get(partition as usize) {
            Some(log) => log.lock().await.committed,
            None => 0,
        }
    }

    fn partition_log(&self, partition: u32) -> Result<&Mutex<PartitionLog>, ChannelError> {
        self.partitions
            .get(partition as usize)
            .ok_or(ChannelError::UnknownPartition {
                partition,
                partitions: self.partitions(),
            })
    }
}

impl Channel for MemoryChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partitions(&self) -> u32 {
        self.partitions.len() as u32
    }

    fn publish<'a>(
        &'a self,
        key: &'a str,
        event: &'a WebhookEvent,
    ) -> BoxFuture<'a, Result<PublishReceipt, ChannelError>> {
        Box::pin(async move {
            let partition = partition_for(key, self.partitions());
            let mut log = self.partition_log(partition)?.lock().await;
            let offset = log.records.len() as u64;
            log.records.push(event.clone());
            Ok(PublishReceipt { partition, offset })
        })
    }

    fn poll(&self, partition: u32) -> BoxFuture<'_, Result<Option<ChannelRecord>, ChannelError>> {
        Box::pin(async move {
            let log = self.partition_log(partition)?.lock().await;
            let record = log
                .records
                .get(log.committed as usize)
                .map(|event| ChannelRecord {
                    partition,
                    offset: log.committed,
                    event: event.clone(),
                });
            Ok(record)
        })
    }

    fn commit(&self, partition: u32, offset: u64) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            let mut log = self.partition_log(partition)?.lock().await;
            let next = offset.saturating_add(1).min(log.records.len() as u64);
            if next > log.committed {
                log.committed = next;
            }
            Ok(())
        })
    }
}
