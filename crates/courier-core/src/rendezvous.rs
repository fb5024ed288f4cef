// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-call hand-off between a waiting caller and the response path.
//!
//! A slot is a capacity-one channel plus an acknowledgement. Either side
//! may create it first. The caller opens it before sending the call; the
//! response path delivers into it and waits, bounded, for the caller to
//! acknowledge. Whoever finishes removes the map entry.

use std::sync::Arc;
use std::time::Duration;

use courier_protocol::Response;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

type Delivery = (Response, oneshot::Sender<()>);

/// Single-item hand-off point for one call id.
pub struct Rendezvous {
    tx: mpsc::Sender<Delivery>,
    rx: Mutex<mpsc::Receiver<Delivery>>,
}

impl Rendezvous {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

/// Result of delivering a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// A waiting caller took the response.
    Delivered,
    /// Nobody took it in time. The response was discarded.
    NoCaller,
}

/// Concurrent map of open slots keyed by call id.
#[derive(Default)]
pub struct RendezvousTable {
    slots: DashMap<String, Arc<Rendezvous>>,
}

impl RendezvousTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the slot for `call_id`.
    pub fn open(&self, call_id: &str) -> Arc<Rendezvous> {
        self.slots
            .entry(call_id.to_string())
            .or_insert_with(|| Arc::new(Rendezvous::new()))
            .clone()
    }

    /// Remove the entry if it still refers to `slot`.
    pub fn close(&self, call_id: &str, slot: &Arc<Rendezvous>) {
        self.slots
            .remove_if(call_id, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Open slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Wait up to `timeout` for the response on `slot`, then close it.
    pub async fn wait(
        &self,
        call_id: &str,
        slot: &Arc<Rendezvous>,
        timeout: Duration,
    ) -> Option<Response> {
        let received = {
            let mut rx = slot.rx.lock().await;
            tokio::time::timeout(timeout, rx.recv()).await
        };
        self.close(call_id, slot);

        match received {
            Ok(Some((response, ack))) => {
                let _ = ack.send(());
                Some(response)
            }
            _ => None,
        }
    }

    /// Hand `response` to whoever waits on its call id.
    ///
    /// Waits at most `timeout` in total for the caller to take it.
    pub async fn deliver(&self, response: Response, timeout: Duration) -> HandoffOutcome {
        let call_id = response.call_id.clone();
        let slot = self.open(&call_id);
        let deadline = Instant::now() + timeout;
        let (ack_tx, ack_rx) = oneshot::channel();

        let handoff = slot.tx.send((response, ack_tx));
        let outcome = match tokio::time::timeout_at(deadline, handoff).await {
            Ok(Ok(())) => match tokio::time::timeout_at(deadline, ack_rx).await {
                Ok(Ok(())) => HandoffOutcome::Delivered,
                _ => Self::reclaim(&slot),
            },
            // Slot already holds an undelivered response for this call
            _ => HandoffOutcome::NoCaller,
        };

        self.close(&call_id, &slot);

        match outcome {
            HandoffOutcome::Delivered => debug!(call_id = %call_id, "Response handed to caller"),
            HandoffOutcome::NoCaller => {
                warn!(call_id = %call_id, "No caller waiting for response, discarding")
            }
        }
        outcome
    }

    /// Take back an unacknowledged response. If the receiver is locked the
    /// caller is in the middle of taking it, which counts as delivered.
    fn reclaim(slot: &Rendezvous) -> HandoffOutcome {
        match slot.rx.try_lock() {
            Ok(mut rx) => match rx.try_recv() {
                Ok(_) => HandoffOutcome::NoCaller,
                Err(_) => HandoffOutcome::Delivered,
            },
            Err(_) => HandoffOutcome::Delivered,
        }
    }
}
