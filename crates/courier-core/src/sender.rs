// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound senders with pause/resume.
//!
//! While a node is paused during a deployment transition its outgoing
//! messages are held in process and flushed, in order, on resume.
//!
//! Every send is appended to one buffer and a single drainer transmits
//! from the front of it, so concurrent senders and a concurrent toggle
//! never lose, duplicate or reorder messages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::transport::{Transport, TransportError};

type Ack = oneshot::Sender<Result<(), TransportError>>;

struct Pending {
    queue: String,
    body: Bytes,
    delay: Option<Duration>,
    ack: Option<Ack>,
}

#[derive(Default)]
struct SenderState {
    paused: bool,
    buffer: VecDeque<Pending>,
}

/// Wraps a transport's sends with pause/resume.
pub struct OutboundSender {
    name: String,
    default_queue: String,
    transport: Arc<dyn Transport>,
    state: Mutex<SenderState>,
    drain_lock: tokio::sync::Mutex<()>,
}

impl OutboundSender {
    /// Create an unpaused sender whose `send` targets `default_queue`.
    pub fn new(
        name: impl Into<String>,
        default_queue: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            default_queue: default_queue.into(),
            transport,
            state: Mutex::new(SenderState::default()),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// Send to the default queue.
    pub async fn send(&self, body: Bytes) -> Result<(), TransportError> {
        self.submit(self.default_queue.clone(), body, None).await
    }

    /// Send to the default queue, visible after `delay`.
    pub async fn send_delayed(&self, body: Bytes, delay: Duration) -> Result<(), TransportError> {
        self.submit(self.default_queue.clone(), body, Some(delay))
            .await
    }

    /// Send to an explicit queue.
    pub async fn send_to(&self, queue: &str, body: Bytes) -> Result<(), TransportError> {
        self.submit(queue.to_string(), body, None).await
    }

    /// Hold every following send until [`resume`](Self::resume).
    pub fn pause(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.paused {
            return;
        }
        state.paused = true;
        // Senders still waiting on a transmission are released: their
        // message is buffered now and will go out on resume.
        for pending in state.buffer.iter_mut() {
            if let Some(ack) = pending.ack.take() {
                let _ = ack.send(Ok(()));
            }
        }
        info!(sender = %self.name, buffered = state.buffer.len(), "Outbound sender paused");
    }

    /// Transmit everything buffered, in enqueue order, and stop buffering.
    pub async fn resume(&self) {
        let buffered = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.paused = false;
            state.buffer.len()
        };
        info!(sender = %self.name, buffered, "Outbound sender resumed");
        self.drain().await;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().map(|s| s.paused).unwrap_or(false)
    }

    /// Messages waiting for transmission.
    pub fn buffered(&self) -> usize {
        self.state.lock().map(|s| s.buffer.len()).unwrap_or(0)
    }

    async fn submit(
        &self,
        queue: String,
        body: Bytes,
        delay: Option<Duration>,
    ) -> Result<(), TransportError> {
        let closed = TransportError::Closed(queue.clone());
        let receiver = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| TransportError::Backend("sender state poisoned".to_string()))?;
            if state.paused {
                state.buffer.push_back(Pending {
                    queue,
                    body,
                    delay,
                    ack: None,
                });
                debug!(
                    sender = %self.name,
                    buffered = state.buffer.len(),
                    "Send buffered while paused"
                );
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            state.buffer.push_back(Pending {
                queue,
                body,
                delay,
                ack: Some(tx),
            });
            rx
        };

        self.drain().await;
        receiver.await.unwrap_or(Err(closed))
    }

    async fn drain(&self) {
        let _drainer = self.drain_lock.lock().await;
        loop {
            let next = match self.state.lock() {
                Ok(mut state) if !state.paused => state.buffer.pop_front(),
                _ => None,
            };
            let Some(pending) = next else {
                break;
            };

            let result = match pending.delay {
                Some(delay) => {
                    self.transport
                        .send_delayed(&pending.queue, pending.body, delay)
                        .await
                }
                None => self.transport.send(&pending.queue, pending.body).await,
            };

            match pending.ack {
                Some(ack) => {
                    let _ = ack.send(result);
                }
                None => {
                    if let Err(e) = result {
                        warn!(
                            sender = %self.name,
                            queue = %pending.queue,
                            error = %e,
                            "Failed to transmit buffered message"
                        );
                    }
                }
            }
        }
    }
}
