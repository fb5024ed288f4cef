// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gateway: sends calls and correlates their responses.

use std::sync::Arc;
use std::time::Duration;

use courier_protocol::{Call, Response, encode_call};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::{CoreError, Result};
use crate::rendezvous::{HandoffOutcome, RendezvousTable};
use crate::sender::OutboundSender;

/// Caller side of the RPC layer.
///
/// Synchronous invocations block the calling task on a rendezvous slot
/// until the matching response is handed over by [`handle`](Self::handle)
/// or the response wait elapses.
pub struct Gateway {
    sender: Arc<OutboundSender>,
    table: RendezvousTable,
    response_wait: Duration,
    handoff_timeout: Duration,
}

impl Gateway {
    pub fn new(
        sender: Arc<OutboundSender>,
        response_wait: Duration,
        handoff_timeout: Duration,
    ) -> Self {
        Self {
            sender,
            table: RendezvousTable::new(),
            response_wait,
            handoff_timeout,
        }
    }

    /// How long a synchronous caller waits.
    pub fn response_wait(&self) -> Duration {
        self.response_wait
    }

    /// Callers currently waiting plus undelivered responses.
    pub fn pending(&self) -> usize {
        self.table.len()
    }

    /// Send `call` on the default call queue and wait for its outcome.
    pub async fn invoke_synchronously(&self, call: Call) -> Result<Value> {
        let queue = self.sender.default_queue().to_string();
        self.invoke_synchronously_on(&queue, call).await
    }

    /// Send `call` on `queue` and wait for its outcome.
    ///
    /// Fails with [`CoreError::NoResponse`] when nothing arrives in time
    /// and with [`CoreError::Remote`] when the remote method failed.
    #[instrument(skip_all, fields(call_id = %call.call_id, method = %call.qualified_method()))]
    pub async fn invoke_synchronously_on(&self, queue: &str, call: Call) -> Result<Value> {
        let call_id = call.call_id.clone();
        // Open before sending so an early response finds the slot.
        let slot = self.table.open(&call_id);

        let sent = match encode_call(&call) {
            Ok(body) => self
                .sender
                .send_to(queue, body)
                .await
                .map_err(CoreError::from),
            Err(e) => Err(CoreError::from(e)),
        };
        if let Err(e) = sent {
            self.table.close(&call_id, &slot);
            return Err(e);
        }
        debug!(queue = %queue, "Call sent, waiting for response");

        match self.table.wait(&call_id, &slot, self.response_wait).await {
            Some(response) => response.into_result().map_err(CoreError::Remote),
            None => {
                warn!(
                    waited_ms = self.response_wait.as_millis() as u64,
                    "No response before deadline"
                );
                Err(CoreError::NoResponse {
                    call_id,
                    waited_ms: self.response_wait.as_millis() as u64,
                })
            }
        }
    }

    /// Send `call` on the default call queue without waiting.
    pub async fn invoke_asynchronously_without_response(&self, call: Call) -> Result<()> {
        let queue = self.sender.default_queue().to_string();
        self.invoke_asynchronously_without_response_on(&queue, call)
            .await
    }

    /// Send `call` on `queue` without waiting. No slot is opened.
    pub async fn invoke_asynchronously_without_response_on(
        &self,
        queue: &str,
        call: Call,
    ) -> Result<()> {
        let body = encode_call(&call)?;
        self.sender.send_to(queue, body).await?;
        debug!(
            call_id = %call.call_id,
            method = %call.qualified_method(),
            "Fire-and-forget call sent"
        );
        Ok(())
    }

    /// Hand an inbound response to its waiting caller.
    pub async fn handle(&self, response: Response) -> HandoffOutcome {
        self.table.deliver(response, self.handoff_timeout).await
    }
}
