//! Ordered, partitioned, at-least-once transport between producer and
//! dispatcher.
//!
//! Records are appended per partition with a monotonically increasing offset.
//! A consumer sees the first record at or after its committed position and
//! must [`Channel::commit`] it before the next one becomes visible, so anything
//! not committed (for example because the worker died mid-delivery) is
//! redelivered.

mod memory;
mod partition;
mod sqlite;

use thiserror::Error;

use crate::{BoxFuture, types::WebhookEvent};

pub use memory::MemoryChannel;
pub use partition::{murmur2, partition_for};
pub use sqlite::SqliteChannel;

pub const DEFAULT_TOPIC: &str = "webhook.deliveries";
pub const DEFAULT_CONSUMER_GROUP: &str = "webhook-dispatcher-group";
pub const DEFAULT_PARTITIONS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub partition: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub partition: u32,
    pub offset: u64,
    pub event: WebhookEvent,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("unknown partition {partition} (channel has {partitions})")]
    UnknownPartition { partition: u32, partitions: u32 },

    /// A stored record that can no longer be decoded. The consumer skips it.
    #[error("corrupt record at {partition}/{offset}: {message}")]
    Corrupt {
        partition: u32,
        offset: u64,
        message: String,
    },
}

impl From<sqlx::Error> for ChannelError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

pub trait Channel: Send + Sync + 'static {
    fn topic(&self) -> &str;

    fn partitions(&self) -> u32;

    /// Appends `event` to the partition owned by `key`.
    fn publish<'a>(
        &'a self,
        key: &'a str,
        event: &'a WebhookEvent,
    ) -> BoxFuture<'a, Result<PublishReceipt, ChannelError>>;

    /// Returns the first uncommitted record of `partition`, if any. Does not
    /// advance the position.
    fn poll(&self, partition: u32) -> BoxFuture<'_, Result<Option<ChannelRecord>, ChannelError>>;

    /// Marks every record up to and including `offset` as consumed. Never
    /// moves the position backwards.
    fn commit(&self, partition: u32, offset: u64) -> BoxFuture<'_, Result<(), ChannelError>>;
}

fn check_partition(partition: u32, partitions: u32) -> Result<(), ChannelError> {
    if partition < partitions {
        Ok(())
    } else {
        Err(ChannelError::UnknownPartition {
            partition,
            partitions,
        })
    }
}
