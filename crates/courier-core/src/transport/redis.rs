// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Redis streams transport.
//!
//! Each queue is a stream read through a consumer group shared by every
//! node, so a message is handed to one consumer at a time. Delayed sends
//! are parked in a sorted set `<queue>:delayed` scored by due time and
//! moved onto the stream by a Lua script before each read.
//!
//! Entries read but not acknowledged within the visibility timeout, for
//! example because their consumer died, are claimed with `XAUTOCLAIM` by
//! the next reader and delivered again.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use redis::aio::ConnectionManager;
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Script};
use tracing::{debug, info};
use uuid::Uuid;

use super::{QueueMessage, Transport, TransportError};

/// Stream entry field holding the framed body.
const BODY_FIELD: &str = "frame";

/// Idle time after which a pending entry is claimed by another reader.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Length of the uuid prefix that keeps sorted-set members unique.
const MEMBER_PREFIX_LEN: usize = 36;

/// Moves due members of KEYS[1] onto stream KEYS[2].
/// ARGV: now (ms), batch limit, body field, member prefix length.
const PROMOTE_DUE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
local moved = 0
for _, member in ipairs(due) do
  if redis.call('ZREM', KEYS[1], member) == 1 then
    redis.call('XADD', KEYS[2], '*', ARGV[3], string.sub(member, tonumber(ARGV[4]) + 1))
    moved = moved + 1
  end
end
return moved
"#;

/// Transport backed by Redis streams.
pub struct RedisStreamTransport {
    client: redis::Client,
    writer: ConnectionManager,
    readers: DashMap<String, ConnectionManager>,
    groups: DashSet<String>,
    group: String,
    consumer: String,
    promote: Script,
    visibility_timeout: Duration,
}

impl RedisStreamTransport {
    /// Connect to Redis.
    ///
    /// `group` is the consumer group every node shares; `consumer` names
    /// this node inside the group.
    pub async fn connect(
        url: &str,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = redis::Client::open(url)?;
        let writer = client.get_connection_manager().await?;
        let group = group.into();
        let consumer = consumer.into();

        info!(group = %group, consumer = %consumer, "Connected to Redis streams transport");

        Ok(Self {
            client,
            writer,
            readers: DashMap::new(),
            groups: DashSet::new(),
            group,
            consumer,
            promote: Script::new(PROMOTE_DUE_SCRIPT),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        })
    }

    /// Claim entries left unacknowledged for longer than `timeout`.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    fn delayed_key(queue: &str) -> String {
        format!("{}:delayed", queue)
    }

    /// Blocking reads get their own connection per queue so they never
    /// stall writes multiplexed on the shared one.
    async fn reader(&self, queue: &str) -> Result<ConnectionManager, TransportError> {
        if let Some(conn) = self.readers.get(queue) {
            return Ok(conn.clone());
        }
        let conn = self.client.get_connection_manager().await?;
        self.readers.insert(queue.to_string(), conn.clone());
        Ok(conn)
    }

    async fn ensure_group(&self, queue: &str) -> Result<(), TransportError> {
        if self.groups.contains(queue) {
            return Ok(());
        }
        let mut conn = self.writer.clone();
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match created {
            Ok(_) => debug!(queue = %queue, group = %self.group, "Created consumer group"),
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(e.into()),
        }
        self.groups.insert(queue.to_string());
        Ok(())
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Take over up to `max` entries idle longer than the visibility timeout.
    async fn reclaim_idle(
        &self,
        queue: &str,
        max: usize,
    ) -> Result<Vec<QueueMessage>, TransportError> {
        let min_idle_ms = u64::try_from(self.visibility_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut conn = self.writer.clone();
        // [next cursor, claimed entries, deleted ids (Redis 7+)]
        let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
            .arg(queue)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(max)
            .query_async(&mut conn)
            .await?;
        let Some(claimed) = reply.get(1) else {
            return Ok(Vec::new());
        };
        let claimed: StreamRangeReply = redis::from_redis_value(claimed)?;

        let messages = entries_to_messages(claimed.ids)?;
        if !messages.is_empty() {
            info!(queue = %queue, count = messages.len(), "Reclaimed idle messages");
        }
        Ok(messages)
    }
}

fn entries_to_messages(
    entries: Vec<redis::streams::StreamId>,
) -> Result<Vec<QueueMessage>, TransportError> {
    let mut messages = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(value) = entry.map.get(BODY_FIELD) else {
            continue;
        };
        let body: Vec<u8> = redis::from_redis_value(value)?;
        messages.push(QueueMessage {
            id: entry.id,
            body: Bytes::from(body),
        });
    }
    Ok(messages)
}

#[async_trait]
impl Transport for RedisStreamTransport {
    async fn send(&self, queue: &str, body: Bytes) -> Result<(), TransportError> {
        let mut conn = self.writer.clone();
        let _: String = redis::cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(body.as_ref())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn send_delayed(
        &self,
        queue: &str,
        body: Bytes,
        delay: Duration,
    ) -> Result<(), TransportError> {
        if delay.is_zero() {
            return self.send(queue, body).await;
        }

        let due = Self::now_millis() + delay.as_millis() as i64;
        let mut member = Vec::with_capacity(MEMBER_PREFIX_LEN + body.len());
        member.extend_from_slice(Uuid::new_v4().hyphenated().to_string().as_bytes());
        member.extend_from_slice(&body);

        let mut conn = self.writer.clone();
        let _: i64 = conn.zadd(Self::delayed_key(queue), member, due).await?;
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, TransportError> {
        self.ensure_group(queue).await?;

        let mut writer = self.writer.clone();
        let moved: i64 = self
            .promote
            .key(Self::delayed_key(queue))
            .key(queue)
            .arg(Self::now_millis())
            .arg(max)
            .arg(BODY_FIELD)
            .arg(MEMBER_PREFIX_LEN)
            .invoke_async(&mut writer)
            .await?;
        if moved > 0 {
            debug!(queue = %queue, moved, "Promoted delayed messages");
        }

        let reclaimed = self.reclaim_idle(queue, max).await?;
        if !reclaimed.is_empty() {
            return Ok(reclaimed);
        }

        // BLOCK 0 would wait forever
        let block_ms = wait.as_millis().max(1) as usize;
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(max)
            .block(block_ms);

        let mut reader = self.reader(queue).await?;
        let reply: Option<StreamReadReply> =
            reader.xread_options(&[queue], &[">"], &options).await?;

        let mut messages = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            messages.extend(entries_to_messages(key.ids)?);
        }
        Ok(messages)
    }

    async fn delete(&self, queue: &str, message: &QueueMessage) -> Result<(), TransportError> {
        let mut conn = self.writer.clone();
        let (acked, _deleted): (i64, i64) = redis::pipe()
            .cmd("XACK")
            .arg(queue)
            .arg(&self.group)
            .arg(&message.id)
            .cmd("XDEL")
            .arg(queue)
            .arg(&message.id)
            .query_async(&mut conn)
            .await?;
        if acked == 0 {
            return Err(TransportError::UnknownMessage {
                queue: queue.to_string(),
                id: message.id.clone(),
            });
        }
        Ok(())
    }
}
