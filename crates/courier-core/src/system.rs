// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The `System` remote interface.
//!
//! Served on each node's system queue, which keeps listening while the node
//! is paused, so a deployment orchestrator can probe a fresh node and
//! promote it once it is ready.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use courier_protocol::RemoteError;
use tracing::info;

use crate::context::InvocationContext;
use crate::health::HealthReport;
use crate::lifecycle::{Lifecycle, LifecycleStatus};

/// Error type reported when `promote` is called outside PAUSED.
pub const INVALID_TRANSITION: &str = "InvalidTransition";

/// Error type reported once the node has been dropped.
pub const NODE_UNAVAILABLE: &str = "NodeUnavailable";

/// Deployment orchestration endpoint of a node.
#[courier_macros::remote_interface(name = "System")]
#[async_trait]
pub trait System: Send + Sync {
    /// Name of the node answering.
    async fn ping(&self, ctx: &InvocationContext) -> Result<String, RemoteError>;

    async fn status(&self, ctx: &InvocationContext) -> Result<HealthReport, RemoteError>;

    /// Whether a tagged call ran recently. Used to tell when smoke traffic
    /// against a paused node has settled.
    async fn recently_processed_tagged_call(
        &self,
        ctx: &InvocationContext,
    ) -> Result<bool, RemoteError>;

    /// PAUSED → RUNNING.
    #[remote(immediate_failure = "InvalidTransition")]
    async fn promote(&self, ctx: &InvocationContext) -> Result<LifecycleStatus, RemoteError>;
}

/// [`System`] backed by a node's lifecycle.
pub struct SystemNode {
    lifecycle: Weak<Lifecycle>,
}

impl SystemNode {
    pub fn new(lifecycle: Weak<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    fn lifecycle(&self) -> Result<Arc<Lifecycle>, RemoteError> {
        self.lifecycle
            .upgrade()
            .ok_or_else(|| RemoteError::new(NODE_UNAVAILABLE, "node is no longer running"))
    }
}

#[async_trait]
impl System for SystemNode {
    async fn ping(&self, _ctx: &InvocationContext) -> Result<String, RemoteError> {
        Ok(self.lifecycle()?.node_name().to_string())
    }

    async fn status(&self, _ctx: &InvocationContext) -> Result<HealthReport, RemoteError> {
        Ok(self.lifecycle()?.health_report())
    }

    async fn recently_processed_tagged_call(
        &self,
        _ctx: &InvocationContext,
    ) -> Result<bool, RemoteError> {
        Ok(self
            .lifecycle()?
            .health_report()
            .recently_processed_tagged_call)
    }

    async fn promote(&self, ctx: &InvocationContext) -> Result<LifecycleStatus, RemoteError> {
        let lifecycle = self.lifecycle()?;
        // Checked before taking the transition lock, which shutdown holds
        // while it waits for this listener.
        let current = lifecycle.status();
        if current != LifecycleStatus::Paused {
            return Err(RemoteError::new(
                INVALID_TRANSITION,
                format!("cannot promote node '{}' from {}", lifecycle.node_name(), current),
            ));
        }
        lifecycle
            .enter_running_state()
            .await
            .map_err(|e| RemoteError::new(INVALID_TRANSITION, e.to_string()))?;
        info!(node = %lifecycle.node_name(), principal = ?ctx.principal(), "Node promoted");
        Ok(lifecycle.status())
    }
}
