// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sends terminal responses, immediately or later through a continuation.

use std::sync::Arc;

use courier_protocol::{Call, RemoteError, Response, encode_response};
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::sender::OutboundSender;

/// Redeemable handle for a suspended response.
///
/// Consumed on redemption, so one continuation resumes at most once.
#[derive(Debug)]
pub struct Continuation {
    call_id: String,
}

impl Continuation {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }
}

/// Sends responses on behalf of call handlers.
pub struct Responder {
    sender: Arc<OutboundSender>,
    // call id -> reply queue
    suspended: DashMap<String, String>,
}

impl Responder {
    /// Responder whose default reply queue is the sender's default queue.
    pub fn new(sender: Arc<OutboundSender>) -> Self {
        Self {
            sender,
            suspended: DashMap::new(),
        }
    }

    fn reply_queue(&self, reply_to: Option<&str>) -> String {
        reply_to
            .unwrap_or_else(|| self.sender.default_queue())
            .to_string()
    }

    /// Send `response` to `reply_to`, or to the default reply queue.
    pub async fn send_response(&self, reply_to: Option<&str>, response: Response) -> Result<()> {
        let queue = self.reply_queue(reply_to);
        let body = encode_response(&response)?;
        self.sender.send_to(&queue, body).await?;
        debug!(
            call_id = %response.call_id,
            queue = %queue,
            error = response.is_error(),
            "Response sent"
        );
        Ok(())
    }

    /// Register `call` as suspended.
    pub(crate) fn suspend(&self, call: &Call) -> Continuation {
        self.suspended.insert(
            call.call_id.clone(),
            self.reply_queue(call.reply_to.as_deref()),
        );
        info!(call_id = %call.call_id, "Response suspended");
        Continuation {
            call_id: call.call_id.clone(),
        }
    }

    /// Drop a suspension whose invocation failed afterwards.
    pub(crate) fn cancel_suspension(&self, call_id: &str) {
        if self.suspended.remove(call_id).is_some() {
            debug!(call_id = %call_id, "Suspension cancelled");
        }
    }

    /// Responses suspended and not yet resumed.
    pub fn suspended_count(&self) -> usize {
        self.suspended.len()
    }

    /// Complete a suspended call with a value.
    pub async fn resume_response_with_return_value(
        &self,
        continuation: Continuation,
        value: Value,
    ) -> Result<()> {
        let response = Response::returned(continuation.call_id.clone(), value);
        self.resume(continuation, response).await
    }

    /// Complete a suspended call with an error.
    pub async fn resume_response_with_exception(
        &self,
        continuation: Continuation,
        error: RemoteError,
    ) -> Result<()> {
        let response = Response::thrown(continuation.call_id.clone(), error);
        self.resume(continuation, response).await
    }

    async fn resume(&self, continuation: Continuation, response: Response) -> Result<()> {
        let Some((call_id, queue)) = self.suspended.remove(&continuation.call_id) else {
            return Err(CoreError::UnknownContinuation {
                call_id: continuation.call_id,
            });
        };
        info!(call_id = %call_id, "Resuming suspended response");
        self.send_response(Some(&queue), response).await
    }
}
