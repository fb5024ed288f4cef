// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message transport abstraction.
//!
//! The core only needs four queue operations. Delivery is at-least-once:
//! a message received but not deleted within the transport's visibility
//! timeout is delivered again.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::{InMemoryTransport, SentRecord};
#[cfg(feature = "redis")]
pub use self::redis::RedisStreamTransport;

/// A message received from a queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    /// Transport-assigned id, used to delete the message.
    pub id: String,
    /// Framed body.
    pub body: Bytes,
}

/// Errors raised by a transport backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The message was never received or was already deleted.
    #[error("unknown message '{id}' on queue '{queue}'")]
    UnknownMessage { queue: String, id: String },

    /// The backend refused or failed the operation.
    #[error("transport backend error: {0}")]
    Backend(String),

    /// The sender was dropped before the message was transmitted.
    #[error("sender closed before transmitting to '{0}'")]
    Closed(String),
}

#[cfg(feature = "redis")]
impl From<::redis::RedisError> for TransportError {
    fn from(err: ::redis::RedisError) -> Self {
        TransportError::Backend(err.to_string())
    }
}

/// Queue operations consumed by the core.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Enqueue a message for immediate delivery.
    async fn send(&self, queue: &str, body: Bytes) -> Result<(), TransportError>;

    /// Enqueue a message that becomes visible after `delay`.
    async fn send_delayed(
        &self,
        queue: &str,
        body: Bytes,
        delay: Duration,
    ) -> Result<(), TransportError>;

    /// Receive up to `max` messages, waiting at most `wait` for the first one.
    ///
    /// Returns an empty batch when nothing arrived in time.
    async fn receive(
        &self,
        queue: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, TransportError>;

    /// Remove a processed message so it is not delivered again.
    async fn delete(&self, queue: &str, message: &QueueMessage) -> Result<(), TransportError>;
}
