//! Append-only storage for delivery attempt logs.

mod store;

pub use store::{
    LogQuery, LogStore, LogStoreError, MemoryLogStore, NewDeliveryAttemptLog, SqliteLogStore,
};
