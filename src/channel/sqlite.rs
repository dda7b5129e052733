use sqlx::SqlitePool;

use super::{Channel, ChannelError, ChannelRecord, PublishReceipt, check_partition, partition_for};
use crate::{BoxFuture, time::now_utc, types::WebhookEvent};

/// Durable channel backed by the `channel_messages` / `channel_offsets`
/// tables. Producer and consumer processes can share one database file.
#[derive(Debug, Clone)]
pub struct SqliteChannel {
    pool: SqlitePool,
    topic: String,
    consumer_group: String,
    partitions: u32,
}

impl SqliteChannel {
    pub fn new(
        pool: SqlitePool,
        topic: impl Into<String>,
        consumer_group: impl Into<String>,
        partitions: u32,
    ) -> Self {
        Self {
            pool,
            topic: topic.into(),
            consumer_group: consumer_group.into(),
            partitions: partitions.max(1),
        }
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    seq: i64,
    body: String,
}

impl Channel for SqliteChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn partitions(&self) -> u32 {
        self.partitions
    }

    fn publish<'a>(
        &'a self,
        key: &'a str,
        event: &'a WebhookEvent,
    ) -> BoxFuture<'a, Result<PublishReceipt, ChannelError>> {
        Box::pin(async move {
            let partition = partition_for(key, self.partitions);
            let body = serde_json::to_string(event)
                .map_err(|err| ChannelError::Unavailable(format!("encode event: {err}")))?;

            // Single statement so concurrent publishers cannot claim the same seq.
            let seq: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO channel_messages (
                    topic,
                    partition_id,
                    seq,
                    event_id,
                    client_id,
                    body,
                    published_at
                )
                SELECT ?, ?, COALESCE(MAX(seq) + 1, 0), ?, ?, ?, ?
                FROM channel_messages
                WHERE topic = ? AND partition_id = ?
                RETURNING seq
                "#,
            )
            .bind(&self.topic)
            .bind(i64::from(partition))
            .bind(&event.event_id)
            .bind(&event.client_id)
            .bind(&body)
            .bind(now_utc())
            .bind(&self.topic)
            .bind(i64::from(partition))
            .fetch_one(&self.pool)
            .await?;

            Ok(PublishReceipt {
                partition,
                offset: seq as u64,
            })
        })
    }

    fn poll(&self, partition: u32) -> BoxFuture<'_, Result<Option<ChannelRecord>, ChannelError>> {
        Box::pin(async move {
            check_partition(partition, self.partitions)?;

            let row = sqlx::query_as::<_, MessageRow>(
                r#"
                SELECT m.seq, m.body
                FROM channel_messages m
                WHERE m.topic = ?
                  AND m.partition_id = ?
                  AND m.seq >= COALESCE((
                      SELECT o.next_seq
                      FROM channel_offsets o
                      WHERE o.topic = ?
                        AND o.consumer_group = ?
                        AND o.partition_id = ?
                  ), 0)
                ORDER BY m.seq ASC
                LIMIT 1
                "#,
            )
            .bind(&self.topic)
            .bind(i64::from(partition))
            .bind(&self.topic)
            .bind(&self.consumer_group)
            .bind(i64::from(partition))
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            let offset = row.seq as u64;
            let event = serde_json::from_str::<WebhookEvent>(&row.body).map_err(|err| {
                ChannelError::Corrupt {
                    partition,
                    offset,
                    message: err.to_string(),
                }
            })?;

            Ok(Some(ChannelRecord {
                partition,
                offset,
                event,
            }))
        })
    }

    fn commit(&self, partition: u32, offset: u64) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            check_partition(partition, self.partitions)?;
            let next_seq = i64::try_from(offset.saturating_add(1)).unwrap_or(i64::MAX);

            sqlx::query(
                r#"
                INSERT INTO channel_offsets (
                    topic,
                    consumer_group,
                    partition_id,
                    next_seq,
                    updated_at
                )
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(topic, consumer_group, partition_id) DO UPDATE SET
                    next_seq = MAX(channel_offsets.next_seq, excluded.next_seq),
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.topic)
            .bind(&self.consumer_group)
            .bind(i64::from(partition))
            .bind(next_seq)
            .bind(now_utc())
            .execute(&self.pool)
            .await?;

            Ok(())
        })
    }
}
