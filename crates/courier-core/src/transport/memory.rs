// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-process transport.
//!
//! Named queues living in one process, with delayed delivery and a log of
//! every send. Used by tests and by single-process nodes.
//!
//! A received message stays invisible for the visibility timeout. If it is
//! not deleted by then it goes back to the front of its queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::{QueueMessage, Transport, TransportError};

/// How long a received message may stay undeleted before redelivery.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

/// One recorded send.
#[derive(Debug, Clone)]
pub struct SentRecord {
    /// Destination queue.
    pub queue: String,
    /// Framed body.
    pub body: Bytes,
    /// Requested delay, zero for immediate sends.
    pub delay: Duration,
    /// When the send happened.
    pub sent_at: DateTime<Utc>,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<QueueMessage>,
    delayed: Vec<(Instant, QueueMessage)>,
    in_flight: HashMap<String, (Instant, QueueMessage)>,
}

impl Queue {
    fn promote_due(&mut self, now: Instant) {
        if self.delayed.is_empty() {
            return;
        }
        self.delayed.sort_by_key(|(due, _)| *due);
        let due = self.delayed.partition_point(|(at, _)| *at <= now);
        for (_, message) in self.delayed.drain(..due) {
            self.ready.push_back(message);
        }
    }

    fn reclaim_expired(&mut self, now: Instant) -> usize {
        let mut expired: Vec<(Instant, QueueMessage)> = Vec::new();
        self.in_flight.retain(|_, (until, message)| {
            if *until <= now {
                expired.push((*until, message.clone()));
                false
            } else {
                true
            }
        });
        // Oldest first at the head of the queue.
        expired.sort_by_key(|(until, _)| *until);
        let count = expired.len();
        for (_, message) in expired.into_iter().rev() {
            self.ready.push_front(message);
        }
        count
    }

    fn next_due(&self) -> Option<Instant> {
        self.delayed
            .iter()
            .map(|(due, _)| *due)
            .chain(self.in_flight.values().map(|(until, _)| *until))
            .min()
    }
}

/// In-process transport for testing and embedded use.
pub struct InMemoryTransport {
    queues: Mutex<HashMap<String, Queue>>,
    sent: Mutex<Vec<SentRecord>>,
    arrivals: Notify,
    next_id: AtomicU64,
    fail_sends: Mutex<Option<String>>,
    visibility_timeout: Duration,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            arrivals: Notify::new(),
            next_id: AtomicU64::new(1),
            fail_sends: Mutex::new(None),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Redeliver messages left undeleted for longer than `timeout`.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Every send made to `queue`, in order.
    pub fn sent(&self, queue: &str) -> Vec<SentRecord> {
        self.sent
            .lock()
            .map(|log| log.iter().filter(|r| r.queue == queue).cloned().collect())
            .unwrap_or_default()
    }

    /// Number of sends made to `queue`.
    pub fn sent_count(&self, queue: &str) -> usize {
        self.sent
            .lock()
            .map(|log| log.iter().filter(|r| r.queue == queue).count())
            .unwrap_or(0)
    }

    /// Messages waiting in `queue`, delayed ones included.
    pub fn pending(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .ok()
            .and_then(|queues| queues.get(queue).map(|q| q.ready.len() + q.delayed.len()))
            .unwrap_or(0)
    }

    /// Messages received from `queue` but not deleted yet.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .ok()
            .and_then(|queues| queues.get(queue).map(|q| q.in_flight.len()))
            .unwrap_or(0)
    }

    /// Make every following send fail with `reason`, or succeed again with `None`.
    pub fn fail_sends(&self, reason: Option<&str>) {
        if let Ok(mut fail) = self.fail_sends.lock() {
            *fail = reason.map(String::from);
        }
    }

    fn enqueue(&self, queue: &str, body: Bytes, delay: Duration) -> Result<(), TransportError> {
        if let Some(reason) = self.fail_sends.lock().ok().and_then(|f| f.clone()) {
            return Err(TransportError::Backend(reason));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let message = QueueMessage {
            id,
            body: body.clone(),
        };

        {
            let mut queues = self
                .queues
                .lock()
                .map_err(|_| TransportError::Backend("queue lock poisoned".to_string()))?;
            let q = queues.entry(queue.to_string()).or_default();
            if delay.is_zero() {
                q.ready.push_back(message);
            } else {
                q.delayed.push((Instant::now() + delay, message));
            }
        }

        if let Ok(mut log) = self.sent.lock() {
            log.push(SentRecord {
                queue: queue.to_string(),
                body,
                delay,
                sent_at: Utc::now(),
            });
        }

        self.arrivals.notify_waiters();
        Ok(())
    }
}

fn far_future() -> Instant {
    // Roughly thirty years.
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, queue: &str, body: Bytes) -> Result<(), TransportError> {
        self.enqueue(queue, body, Duration::ZERO)
    }

    async fn send_delayed(
        &self,
        queue: &str,
        body: Bytes,
        delay: Duration,
    ) -> Result<(), TransportError> {
        self.enqueue(queue, body, delay)
    }

    async fn receive(
        &self,
        queue: &str,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, TransportError> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut queues = self
                    .queues
                    .lock()
                    .map_err(|_| TransportError::Backend("queue lock poisoned".to_string()))?;
                let q = queues.entry(queue.to_string()).or_default();
                let now = Instant::now();
                q.promote_due(now);
                let reclaimed = q.reclaim_expired(now);
                if reclaimed > 0 {
                    debug!(queue = %queue, reclaimed, "Redelivering expired messages");
                }

                let take = max.min(q.ready.len());
                if take > 0 {
                    let visible_again = now
                        .checked_add(self.visibility_timeout)
                        .unwrap_or_else(far_future);
                    let batch: Vec<QueueMessage> = q.ready.drain(..take).collect();
                    for message in &batch {
                        q.in_flight.insert(message.id.clone(), (visible_again, message.clone()));
                    }
                    return Ok(batch);
                }
                q.next_due()
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn delete(&self, queue: &str, message: &QueueMessage) -> Result<(), TransportError> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| TransportError::Backend("queue lock poisoned".to_string()))?;
        queues
            .get_mut(queue)
            .and_then(|q| q.in_flight.remove(&message.id))
            .map(|_| ())
            .ok_or_else(|| TransportError::UnknownMessage {
                queue: queue.to_string(),
                id: message.id.clone(),
            })
    }
}
