// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client proxy: builds calls and dispatches them through the gateway.
//!
//! Generated `<Trait>Client` stubs wrap a `ClientProxy`; it can also be
//! used directly for hand-written clients.

use std::sync::Arc;

use courier_protocol::Call;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::Result;
use crate::gateway::Gateway;
use crate::security;

/// Dispatches calls for typed clients.
#[derive(Clone)]
pub struct ClientProxy {
    gateway: Arc<Gateway>,
    reply_to: Option<String>,
    target_queue: Option<String>,
    max_attempts: u32,
    tag: bool,
}

impl ClientProxy {
    /// Proxy whose calls carry `max_attempts` and ask for responses on `reply_to`.
    pub fn new(gateway: Arc<Gateway>, reply_to: Option<String>, max_attempts: u32) -> Self {
        Self {
            gateway,
            reply_to,
            target_queue: None,
            max_attempts,
            tag: false,
        }
    }

    /// Same proxy, but its calls are tagged for recent-activity monitoring.
    pub fn tagged(&self) -> Self {
        Self {
            tag: true,
            ..self.clone()
        }
    }

    /// Same proxy, but calls go to `queue` instead of the default call queue.
    pub fn targeting(&self, queue: impl Into<String>) -> Self {
        Self {
            target_queue: Some(queue.into()),
            ..self.clone()
        }
    }

    /// Start a call, capturing the ambient principal.
    pub fn new_call(&self, interface_name: &str, method_name: &str) -> Call {
        let mut call = Call::new(interface_name, method_name)
            .with_principal(security::current_principal())
            .with_attempts(self.max_attempts)
            .tagged(self.tag);
        if let Some(queue) = &self.reply_to {
            call = call.with_reply_to(queue.clone());
        }
        call
    }

    /// Send the call and wait for its typed result.
    pub async fn invoke<T: DeserializeOwned>(&self, call: Call) -> Result<T> {
        let value = match &self.target_queue {
            Some(queue) => self.gateway.invoke_synchronously_on(queue, call).await?,
            None => self.gateway.invoke_synchronously(call).await?,
        };
        Ok(serde_json::from_value(value)?)
    }

    /// Send the call and return once it is enqueued.
    pub async fn invoke_fire_and_forget(&self, call: Call) -> Result<()> {
        debug!(
            call_id = %call.call_id,
            method = %call.qualified_method(),
            "Dispatching fire-and-forget"
        );
        match &self.target_queue {
            Some(queue) => {
                self.gateway
                    .invoke_asynchronously_without_response_on(queue, call)
                    .await
            }
            None => {
                self.gateway
                    .invoke_asynchronously_without_response(call)
                    .await
            }
        }
    }
}
