// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for courier-core integration tests.
//!
//! Provides an `Inventory` remote interface with methods that succeed,
//! fail, suspend and stall on demand, and a TestNode running it over an
//! in-memory transport with short delays.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_core::{
    AsyncExceptionHandler, Call, Config, InMemoryTransport, InvocationContext, NodeRuntime,
    RemoteError, async_trait, remote_interface, security,
};
use serde_json::json;

pub const RETRY_DELAY: Duration = Duration::from_millis(50);

#[remote_interface(name = "Inventory")]
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn reserve(
        &self,
        ctx: &InvocationContext,
        sku: String,
        quantity: u32,
    ) -> Result<String, RemoteError>;

    /// Fails with a retryable error `failures` times, then succeeds.
    async fn flaky(&self, ctx: &InvocationContext, failures: u32) -> Result<String, RemoteError>;

    /// Always fails with a retryable error.
    async fn broken(&self, ctx: &InvocationContext) -> Result<String, RemoteError>;

    #[remote(immediate_failure = "OutOfStock")]
    async fn out_of_stock(&self, ctx: &InvocationContext) -> Result<String, RemoteError>;

    /// Always fails with `QuotaExceeded`.
    async fn over_quota(&self, ctx: &InvocationContext) -> Result<String, RemoteError>;

    /// Suspends and answers from another task after `delay_ms`.
    async fn deferred(&self, ctx: &InvocationContext, delay_ms: u64) -> Result<u32, RemoteError>;

    /// Suspends and never answers.
    async fn silent(&self, ctx: &InvocationContext) -> Result<String, RemoteError>;

    async fn whoami(&self, ctx: &InvocationContext) -> Result<Option<String>, RemoteError>;

    async fn nothing(&self, ctx: &InvocationContext) -> Result<Option<String>, RemoteError>;

    async fn slow(&self, ctx: &InvocationContext, millis: u64) -> Result<String, RemoteError>;

    /// Always fails.
    #[remote(fire_and_forget)]
    async fn audit(&self, ctx: &InvocationContext, event: String) -> Result<(), RemoteError>;

    /// Suspends its response and returns.
    #[remote(fire_and_forget)]
    async fn notify(&self, ctx: &InvocationContext, event: String) -> Result<(), RemoteError>;
}

/// Counts attempts per method.
#[derive(Default)]
pub struct Warehouse {
    attempts: Mutex<HashMap<&'static str, u32>>,
}

impl Warehouse {
    fn attempt(&self, method: &'static str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap();
        let count = attempts.entry(method).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts(&self, method: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(method)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Inventory for Warehouse {
    async fn reserve(
        &self,
        _ctx: &InvocationContext,
        sku: String,
        quantity: u32,
    ) -> Result<String, RemoteError> {
        self.attempt("reserve");
        Ok(format!("reserved {} x {}", quantity, sku))
    }

    async fn flaky(&self, _ctx: &InvocationContext, failures: u32) -> Result<String, RemoteError> {
        let attempt = self.attempt("flaky");
        if attempt <= failures {
            return Err(RemoteError::new("StockServiceDown", format!("attempt {}", attempt)));
        }
        Ok("ok".to_string())
    }

    async fn broken(&self, _ctx: &InvocationContext) -> Result<String, RemoteError> {
        let attempt = self.attempt("broken");
        Err(RemoteError::new("StockServiceDown", format!("attempt {}", attempt)))
    }

    async fn out_of_stock(&self, _ctx: &InvocationContext) -> Result<String, RemoteError> {
        self.attempt("out_of_stock");
        Err(RemoteError::new("OutOfStock", "sku-1 is sold out"))
    }

    async fn over_quota(&self, _ctx: &InvocationContext) -> Result<String, RemoteError> {
        self.attempt("over_quota");
        Err(RemoteError::new("QuotaExceeded", "daily quota used"))
    }

    async fn deferred(&self, ctx: &InvocationContext, delay_ms: u64) -> Result<u32, RemoteError> {
        self.attempt("deferred");
        let continuation = ctx.suspend_response();
        let responder = ctx.responder().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            responder
                .resume_response_with_return_value(continuation, json!(42))
                .await
                .unwrap();
        });
        Ok(0)
    }

    async fn silent(&self, ctx: &InvocationContext) -> Result<String, RemoteError> {
        self.attempt("silent");
        let _continuation = ctx.suspend_response();
        Ok(String::new())
    }

    async fn whoami(&self, _ctx: &InvocationContext) -> Result<Option<String>, RemoteError> {
        Ok(security::current_principal())
    }

    async fn nothing(&self, _ctx: &InvocationContext) -> Result<Option<String>, RemoteError> {
        Ok(None)
    }

    async fn slow(&self, _ctx: &InvocationContext, millis: u64) -> Result<String, RemoteError> {
        self.attempt("slow");
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok("done".to_string())
    }

    async fn audit(&self, _ctx: &InvocationContext, event: String) -> Result<(), RemoteError> {
        self.attempt("audit");
        Err(RemoteError::new("AuditStoreDown", format!("could not store {}", event)))
    }

    async fn notify(&self, ctx: &InvocationContext, _event: String) -> Result<(), RemoteError> {
        self.attempt("notify");
        let _continuation = ctx.suspend_response();
        Ok(())
    }
}

/// Collects fire-and-forget failures.
#[derive(Default)]
pub struct RecordingExceptionHandler {
    pub failures: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl AsyncExceptionHandler for RecordingExceptionHandler {
    async fn handle(&self, call: &Call, error: &RemoteError) {
        self.failures
            .lock()
            .unwrap()
            .push((call.method_name.clone(), error.error_type.clone()));
    }
}

/// Configuration with short delays for a named node.
pub fn test_config(node_name: &str) -> Config {
    let mut config = Config::for_node(node_name);
    config.retry_delay = RETRY_DELAY;
    config.processing_allowance = Duration::from_millis(1500);
    config.handoff_timeout = Duration::from_millis(500);
    config.shutdown_deadline = Duration::from_secs(3);
    config.poll_wait = Duration::from_millis(20);
    config.tagged_activity_window = Duration::from_secs(60);
    config.immediate_failures = vec!["QuotaExceeded".to_string()];
    config
}

/// A node serving `Inventory` over an in-memory transport.
pub struct TestNode {
    pub runtime: NodeRuntime,
    pub transport: Arc<InMemoryTransport>,
    pub warehouse: Arc<Warehouse>,
    pub exceptions: Arc<RecordingExceptionHandler>,
}

impl TestNode {
    /// Build a node. It is not started.
    pub fn build(config: Config, transport: Arc<InMemoryTransport>) -> Self {
        let warehouse = Arc::new(Warehouse::default());
        let exceptions = Arc::new(RecordingExceptionHandler::default());
        let runtime = NodeRuntime::builder()
            .config(config)
            .transport(transport.clone())
            .service("defaultInventory", Arc::new(InventoryService::new(warehouse.clone())))
            .async_exception_handler(exceptions.clone())
            .build()
            .unwrap();
        Self {
            runtime,
            transport,
            warehouse,
            exceptions,
        }
    }

    /// Build and start a running node on its own transport.
    pub async fn running(node_name: &str) -> Self {
        let node = Self::build(test_config(node_name), Arc::new(InMemoryTransport::new()));
        node.runtime.start().await.unwrap();
        node
    }

    pub fn client(&self) -> InventoryClient {
        InventoryClient::new(self.runtime.client())
    }

    /// Sends recorded on the call queue with the retry delay.
    pub fn scheduled_retries(&self) -> usize {
        self.transport
            .sent(&self.runtime.config().call_queue)
            .iter()
            .filter(|record| record.delay == RETRY_DELAY)
            .count()
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
