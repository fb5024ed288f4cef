// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Call handler: executes received calls and decides retry or respond.
//!
//! Per call:
//! 1. fail fast if no implementation of the interface is registered
//! 2. consume one attempt
//! 3. resolve the implementation and method
//! 4. invoke inside an [`InvocationContext`] and a principal scope
//! 5. on success respond, unless fire-and-forget or suspended
//! 6. on failure finalize immediately for immediate-failure error types
//!    or exhausted attempts, otherwise re-enqueue with a fixed delay
//!
//! Retries are delayed re-sends through the transport, never sleeps.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_protocol::{
    Call, PERSISTENCE_UNAVAILABLE, RemoteError, Response, VALIDATION_ERROR, encode_call,
};
use tracing::{error, info, instrument, warn};

use crate::context::InvocationContext;
use crate::error::Result;
use crate::health::TaggedCallMonitor;
use crate::registry::{MethodDescriptor, ServiceRegistry};
use crate::responder::Responder;
use crate::security;
use crate::sender::OutboundSender;

/// Error types that are never retried, for every method.
pub const BASE_IMMEDIATE_FAILURES: &[&str] = &[VALIDATION_ERROR, PERSISTENCE_UNAVAILABLE];

/// Receives fire-and-forget calls that failed for good.
#[async_trait]
pub trait AsyncExceptionHandler: Send + Sync {
    async fn handle(&self, call: &Call, error: &RemoteError);
}

/// Logs final fire-and-forget failures.
#[derive(Debug, Default)]
pub struct LoggingExceptionHandler;

#[async_trait]
impl AsyncExceptionHandler for LoggingExceptionHandler {
    async fn handle(&self, call: &Call, error: &RemoteError) {
        error!(
            call_id = %call.call_id,
            method = %call.qualified_method(),
            error_type = %error.error_type,
            error = %error.message,
            "Fire-and-forget call failed"
        );
    }
}

/// What the handler did with a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// A terminal response was sent.
    Responded,
    /// The method suspended its response.
    Suspended,
    /// The call was re-enqueued.
    Retried { attempts_remaining: u32 },
    /// A fire-and-forget method succeeded.
    FireAndForgetCompleted,
    /// A fire-and-forget method failed for good.
    FireAndForgetFailed,
}

/// Server-side executor for calls.
pub struct CallHandler {
    registry: Arc<ServiceRegistry>,
    responder: Arc<Responder>,
    retry_sender: Arc<OutboundSender>,
    retry_delay: Duration,
    immediate_failures: HashSet<String>,
    monitor: Arc<TaggedCallMonitor>,
    async_exception_handler: Arc<dyn AsyncExceptionHandler>,
}

impl CallHandler {
    /// Create a handler. Retries are sent to `retry_sender`'s default queue.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        responder: Arc<Responder>,
        retry_sender: Arc<OutboundSender>,
        retry_delay: Duration,
        monitor: Arc<TaggedCallMonitor>,
    ) -> Self {
        Self {
            registry,
            responder,
            retry_sender,
            retry_delay,
            immediate_failures: BASE_IMMEDIATE_FAILURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            monitor,
            async_exception_handler: Arc::new(LoggingExceptionHandler),
        }
    }

    /// Add error types that are never retried.
    pub fn with_immediate_failures<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.immediate_failures
            .extend(types.into_iter().map(Into::into));
        self
    }

    pub fn with_async_exception_handler(mut self, handler: Arc<dyn AsyncExceptionHandler>) -> Self {
        self.async_exception_handler = handler;
        self
    }

    fn is_immediate_failure(&self, error: &RemoteError, method: &MethodDescriptor) -> bool {
        self.immediate_failures.contains(&error.error_type)
            || method.immediate_failures.contains(&error.error_type.as_str())
    }

    /// Execute one received call.
    #[instrument(
        skip_all,
        fields(call_id = %call.call_id, method = %call.qualified_method(), attempts = call.attempts_remaining)
    )]
    pub async fn handle(&self, mut call: Call) -> Result<CallOutcome> {
        if !self.registry.has_interface(&call.interface_name) {
            warn!("No implementation registered for interface");
            let error = RemoteError::configuration(format!(
                "no implementation registered for interface '{}'",
                call.interface_name
            ));
            return self.finalize_failure(&call, false, error).await;
        }

        call.decrement_attempts();

        let service = match self.registry.resolve(&call.interface_name) {
            Ok((implementation, service)) => {
                tracing::debug!(implementation = %implementation, "Resolved implementation");
                service
            }
            Err(e) => {
                warn!(error = %e, "Implementation could not be resolved");
                let error = RemoteError::configuration(e.to_string());
                return self.finalize_failure(&call, false, error).await;
            }
        };

        let Some(method) = service.method(&call.method_name).copied() else {
            warn!("Unknown method");
            let error = RemoteError::configuration(format!(
                "method '{}' is not part of interface '{}'",
                call.method_name, call.interface_name
            ));
            return self.finalize_failure(&call, false, error).await;
        };

        let _tagged = call.tag.then(|| self.monitor.begin());
        let ctx = InvocationContext::new(&call, self.responder.clone());
        let result = security::scope(
            call.principal.clone(),
            service.invoke(&ctx, &call.method_name, call.parameters.clone()),
        )
        .await;

        match result {
            Ok(value) => {
                if method.fire_and_forget {
                    // Nobody is waiting for a reply.
                    if ctx.is_suspended() {
                        self.responder.cancel_suspension(&call.call_id);
                    }
                    return Ok(CallOutcome::FireAndForgetCompleted);
                }
                if ctx.is_suspended() {
                    return Ok(CallOutcome::Suspended);
                }
                self.responder
                    .send_response(call.reply_to.as_deref(), Response::for_return(&call, value))
                    .await?;
                Ok(CallOutcome::Responded)
            }
            Err(error) => {
                if ctx.is_suspended() {
                    self.responder.cancel_suspension(&call.call_id);
                }

                if self.is_immediate_failure(&error, &method) {
                    info!(error_type = %error.error_type, "Immediate failure, not retrying");
                    return self
                        .finalize_failure(&call, method.fire_and_forget, error)
                        .await;
                }
                if !call.has_attempts_remaining() {
                    warn!(error_type = %error.error_type, "Attempts exhausted");
                    return self
                        .finalize_failure(&call, method.fire_and_forget, error)
                        .await;
                }

                let body = encode_call(&call)?;
                self.retry_sender
                    .send_delayed(body, self.retry_delay)
                    .await?;
                info!(
                    error_type = %error.error_type,
                    attempts_remaining = call.attempts_remaining,
                    delay_ms = self.retry_delay.as_millis() as u64,
                    "Call failed, retry scheduled"
                );
                Ok(CallOutcome::Retried {
                    attempts_remaining: call.attempts_remaining,
                })
            }
        }
    }

    async fn finalize_failure(
        &self,
        call: &Call,
        fire_and_forget: bool,
        error: RemoteError,
    ) -> Result<CallOutcome> {
        if fire_and_forget {
            self.async_exception_handler.handle(call, &error).await;
            return Ok(CallOutcome::FireAndForgetFailed);
        }
        self.responder
            .send_response(call.reply_to.as_deref(), Response::for_error(call, error))
            .await?;
        Ok(CallOutcome::Responded)
    }
}
