// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-invocation context handed to remote methods.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use courier_protocol::Call;

use crate::responder::{Continuation, Responder};

/// Identity of the call being served plus the suspend/resume hook.
///
/// Lives exactly as long as one invocation.
pub struct InvocationContext {
    call: Call,
    responder: Arc<Responder>,
    suspended: AtomicBool,
}

impl InvocationContext {
    pub fn new(call: &Call, responder: Arc<Responder>) -> Self {
        Self {
            call: call.clone(),
            responder,
            suspended: AtomicBool::new(false),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call.call_id
    }

    pub fn interface_name(&self) -> &str {
        &self.call.interface_name
    }

    pub fn method_name(&self) -> &str {
        &self.call.method_name
    }

    /// Principal carried by the call.
    pub fn principal(&self) -> Option<&str> {
        self.call.principal.as_deref()
    }

    /// Attempts left after the current one.
    pub fn attempts_remaining(&self) -> u32 {
        self.call.attempts_remaining
    }

    pub fn is_tagged(&self) -> bool {
        self.call.tag
    }

    /// Defer the response. The handler sends nothing when the method
    /// returns; redeem the continuation through [`Responder`] instead.
    pub fn suspend_response(&self) -> Continuation {
        self.suspended.store(true, Ordering::SeqCst);
        self.responder.suspend(&self.call)
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Responder for resuming from another task.
    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::OutboundSender;
    use crate::transport::InMemoryTransport;
    use courier_protocol::{RemoteError, decode_response};
    use serde_json::json;

    fn fixture() -> (Arc<InMemoryTransport>, Arc<Responder>) {
        let transport = Arc::new(InMemoryTransport::new());
        let sender = Arc::new(OutboundSender::new(
            "responses",
            "default-replies",
            transport.clone(),
        ));
        (transport, Arc::new(Responder::new(sender)))
    }

    #[tokio::test]
    async fn test_suspend_then_resume_sends_once() {
        let (transport, responder) = fixture();
        let call = Call::new("Jobs", "run").with_reply_to("node-a-replies");
        let ctx = InvocationContext::new(&call, responder.clone());

        assert!(!ctx.is_suspended());
        let continuation = ctx.suspend_response();
        assert!(ctx.is_suspended());
        assert_eq!(continuation.call_id(), call.call_id);
        assert_eq!(responder.suspended_count(), 1);

        responder
            .resume_response_with_return_value(continuation, json!(42))
            .await
            .unwrap();

        let sent = transport.sent("node-a-replies");
        assert_eq!(sent.len(), 1);
        let response = decode_response(sent[0].body.clone()).unwrap();
        assert_eq!(response.call_id, call.call_id);
        assert_eq!(response.into_result().unwrap(), json!(42));
        assert_eq!(responder.suspended_count(), 0);
    }

    #[tokio::test]
    async fn test_second_redemption_is_rejected() {
        let (transport, responder) = fixture();
        let call = Call::new("Jobs", "run");
        let ctx = InvocationContext::new(&call, responder.clone());

        let first = ctx.suspend_response();
        let second = ctx.suspend_response();
        responder
            .resume_response_with_exception(first, RemoteError::new("Boom", "failed"))
            .await
            .unwrap();

        let err = responder
            .resume_response_with_return_value(second, json!(1))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "UNKNOWN_CONTINUATION");
        assert_eq!(transport.sent_count("default-replies"), 1);
    }

    #[test]
    fn test_context_exposes_call_identity() {
        let (_transport, responder) = fixture();
        let call = Call::new("Jobs", "run")
            .with_principal(Some("svc".to_string()))
            .tagged(true);
        let ctx = InvocationContext::new(&call, responder);
        assert_eq!(ctx.interface_name(), "Jobs");
        assert_eq!(ctx.method_name(), "run");
        assert_eq!(ctx.principal(), Some("svc"));
        assert!(ctx.is_tagged());
    }
}
