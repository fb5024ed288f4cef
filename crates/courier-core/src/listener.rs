// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Queue listeners.
//!
//! A [`QueueListener`] polls one queue and feeds each message to a
//! [`MessageHandler`] on a tracked task, bounded by a semaphore. Messages
//! are deleted after processing whatever the outcome: a retry is a new
//! message, and a message that cannot be decoded will never succeed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use courier_protocol::{decode_call, decode_response};
use tokio::sync::{Semaphore, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::gateway::Gateway;
use crate::handler::CallHandler;
use crate::transport::{QueueMessage, Transport};

/// What a listener consumes, which decides when the lifecycle stops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerRole {
    /// General application work.
    Work,
    /// Events that may be dropped first on shutdown.
    LowPriorityEvent,
    /// Events that must be drained before calls stop.
    HighPriorityEvent,
    /// RPC calls.
    Call,
    /// RPC responses.
    Response,
    /// Deployment orchestration.
    System,
}

/// Contract the lifecycle drives.
#[async_trait]
pub trait MessageListener: Send + Sync {
    fn name(&self) -> &str;

    fn role(&self) -> ListenerRole;

    /// Begin consuming. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Hint that shutdown is coming.
    fn prepare_for_shutdown(&self);

    /// Stop taking new messages. In-flight work continues.
    async fn shutdown(&self);

    /// Wait until in-flight work is done. Returns `false` if `deadline` passed first.
    async fn await_termination(&self, deadline: Instant) -> bool;

    fn is_running(&self) -> bool;
}

/// Processes one received message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &QueueMessage) -> Result<()>;
}

/// Shared open/closed switch listeners wait on before polling.
#[derive(Clone)]
pub struct RequestGate {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for RequestGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestGate {
    /// A closed gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn close(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the gate is open.
    pub async fn wait_open(&self) {
        let mut rx = self.tx.subscribe();
        // Sender lives in self, so this only fails if it is dropped mid-wait.
        let _ = rx.wait_for(|open| *open).await;
    }
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerOptions {
    pub concurrency: usize,
    pub batch_size: usize,
    pub poll_wait: Duration,
    /// Back-off after a failed receive.
    pub error_backoff: Duration,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            batch_size: 10,
            poll_wait: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Polls one queue and dispatches to a handler.
pub struct QueueListener {
    name: String,
    role: ListenerRole,
    queue: String,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler>,
    gate: Option<RequestGate>,
    options: ListenerOptions,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
    shutting_down: AtomicBool,
}

impl QueueListener {
    pub fn new(
        name: impl Into<String>,
        role: ListenerRole,
        queue: impl Into<String>,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            queue: queue.into(),
            transport,
            handler,
            gate: None,
            options: ListenerOptions::default(),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Only poll while `gate` is open.
    pub fn with_gate(mut self, gate: RequestGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_options(mut self, options: ListenerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Messages currently being processed.
    pub fn in_flight(&self) -> usize {
        // The poll loop is tracked too.
        self.tracker
            .len()
            .saturating_sub(usize::from(self.is_running()))
    }
}

#[async_trait]
impl MessageListener for QueueListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> ListenerRole {
        self.role
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!(listener = %self.name, queue = %self.queue, role = ?self.role, "Listener started");

        let poller = Poller {
            name: self.name.clone(),
            queue: self.queue.clone(),
            transport: self.transport.clone(),
            handler: self.handler.clone(),
            gate: self.gate.clone(),
            options: self.options.clone(),
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
        };
        self.tracker.spawn(poller.run());
        Ok(())
    }

    fn prepare_for_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::SeqCst) {
            info!(listener = %self.name, "Listener preparing for shutdown");
        }
    }

    async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        self.tracker.close();
        info!(listener = %self.name, "Listener stopped polling");
    }

    async fn await_termination(&self, deadline: Instant) -> bool {
        self.tracker.close();
        let finished = tokio::time::timeout_at(deadline, self.tracker.wait())
            .await
            .is_ok();
        if finished {
            info!(listener = %self.name, "Listener terminated");
        } else {
            warn!(
                listener = %self.name,
                in_flight = self.tracker.len(),
                "Listener did not terminate before deadline"
            );
        }
        finished
    }

    fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }
}

struct Poller {
    name: String,
    queue: String,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler>,
    gate: Option<RequestGate>,
    options: ListenerOptions,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Poller {
    async fn run(self) {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));

        loop {
            if let Some(gate) = &self.gate {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    _ = gate.wait_open() => {}
                }
            }

            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = self.transport.receive(
                    &self.queue,
                    self.options.batch_size.max(1),
                    self.options.poll_wait,
                ) => received,
            };

            let messages = match received {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(listener = %self.name, queue = %self.queue, error = %e, "Receive failed");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.options.error_backoff) => continue,
                    }
                }
            };

            if !messages.is_empty() {
                debug!(listener = %self.name, count = messages.len(), "Received messages");
            }

            // Messages already received are processed even if shutdown starts now.
            for message in messages {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let handler = self.handler.clone();
                let transport = self.transport.clone();
                let queue = self.queue.clone();
                let name = self.name.clone();
                self.tracker.spawn(async move {
                    let _permit = permit;
                    if let Err(e) = handler.handle(&message).await {
                        error!(
                            listener = %name,
                            message_id = %message.id,
                            error = %e,
                            code = e.error_code(),
                            "Message handling failed"
                        );
                    }
                    if let Err(e) = transport.delete(&queue, &message).await {
                        warn!(
                            listener = %name,
                            message_id = %message.id,
                            error = %e,
                            "Failed to delete message"
                        );
                    }
                });
            }
        }

        debug!(listener = %self.name, "Poll loop exited");
    }
}

/// Feeds decoded calls to a [`CallHandler`].
pub struct CallMessageHandler {
    handler: Arc<CallHandler>,
}

impl CallMessageHandler {
    pub fn new(handler: Arc<CallHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl MessageHandler for CallMessageHandler {
    async fn handle(&self, message: &QueueMessage) -> Result<()> {
        let call = decode_call(message.body.clone())?;
        let outcome = self.handler.handle(call).await?;
        debug!(message_id = %message.id, outcome = ?outcome, "Call processed");
        Ok(())
    }
}

/// Feeds decoded responses to a [`Gateway`].
pub struct ResponseMessageHandler {
    gateway: Arc<Gateway>,
}

impl ResponseMessageHandler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl MessageHandler for ResponseMessageHandler {
    async fn handle(&self, message: &QueueMessage) -> Result<()> {
        let response = decode_response(message.body.clone())?;
        self.gateway.handle(response).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryTransport;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        seen: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, _message: &QueueMessage) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_options() -> ListenerOptions {
        ListenerOptions {
            concurrency: 4,
            batch_size: 10,
            poll_wait: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_gate_wait_open() {
        let gate = RequestGate::new();
        assert!(!gate.is_open());
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_open().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        gate.open();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_listener_processes_and_deletes() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let listener = QueueListener::new(
            "work",
            ListenerRole::Work,
            "q",
            transport.clone(),
            handler.clone(),
        )
        .with_options(fast_options());

        for _ in 0..3 {
            transport.send("q", Bytes::from_static(b"m")).await.unwrap();
        }
        listener.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.seen.load(Ordering::SeqCst) < 3 || transport.in_flight("q") > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        listener.shutdown().await;
        assert!(listener.await_termination(Instant::now() + Duration::from_secs(1)).await);
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn test_closed_gate_blocks_polling() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let gate = RequestGate::new();
        let listener = QueueListener::new(
            "calls",
            ListenerRole::Call,
            "q",
            transport.clone(),
            handler.clone(),
        )
        .with_gate(gate.clone())
        .with_options(fast_options());

        transport.send("q", Bytes::from_static(b"m")).await.unwrap();
        listener.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handler.seen.load(Ordering::SeqCst), 0);
        assert_eq!(transport.pending("q"), 1);

        gate.open();
        tokio::time::timeout(Duration::from_secs(2), async {
            while handler.seen.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        listener.shutdown().await;
        assert!(listener.await_termination(Instant::now() + Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_await_termination_respects_deadline() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            delay: Duration::from_millis(500),
        });
        let listener = QueueListener::new(
            "slow",
            ListenerRole::Work,
            "q",
            transport.clone(),
            handler.clone(),
        )
        .with_options(fast_options());

        transport.send("q", Bytes::from_static(b"m")).await.unwrap();
        listener.start().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while transport.in_flight("q") == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        listener.shutdown().await;
        assert!(!listener.await_termination(Instant::now() + Duration::from_millis(50)).await);
        assert!(listener.await_termination(Instant::now() + Duration::from_secs(2)).await);
        assert_eq!(handler.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unstarted_listener_terminates_immediately() {
        let transport = Arc::new(InMemoryTransport::new());
        let handler = Arc::new(Counting {
            seen: AtomicUsize::new(0),
            delay: Duration::ZERO,
        });
        let listener = QueueListener::new("idle", ListenerRole::System, "q", transport, handler);
        listener.shutdown().await;
        assert!(listener.await_termination(Instant::now() + Duration::from_millis(10)).await);
    }
}
