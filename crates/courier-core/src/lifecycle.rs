// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Blue-green node lifecycle.
//!
//! ```text
//! INACTIVE ──enter_paused_state──▶ PAUSED ◀──return_to_paused_state── RUNNING
//!    │                               └──────enter_running_state──────▶   │
//!    └────────────start_without_rollout──────────────────────────────▶   │
//!                                                                         ▼
//!          TERMINATED ◀── TERMINATING ◀── HALTING_HIGH_PRIORITY_EVENTS ◀── DRAINING_REQUESTS ◀── HALTING_LOW_PRIORITY_EVENTS
//! ```
//!
//! Every transition is guarded: it only happens from the expected state,
//! and transitions never run concurrently.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{CoreError, Result};
use crate::health::{HealthCheck, HealthReport, TaggedCallMonitor};
use crate::listener::{ListenerRole, MessageListener, RequestGate};
use crate::sender::OutboundSender;

/// Where a node is in its deployment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    Inactive,
    Paused,
    Running,
    HaltingLowPriorityEvents,
    DrainingRequests,
    HaltingHighPriorityEvents,
    Terminating,
    Terminated,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Paused => "PAUSED",
            Self::Running => "RUNNING",
            Self::HaltingLowPriorityEvents => "HALTING_LOW_PRIORITY_EVENTS",
            Self::DrainingRequests => "DRAINING_REQUESTS",
            Self::HaltingHighPriorityEvents => "HALTING_HIGH_PRIORITY_EVENTS",
            Self::Terminating => "TERMINATING",
            Self::Terminated => "TERMINATED",
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether one listener finished before the shutdown deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerTermination {
    pub name: String,
    pub role: ListenerRole,
    pub completed: bool,
}

/// Outcome of [`Lifecycle::terminate`].
#[derive(Debug, Clone, Default)]
pub struct TerminationReport {
    pub listeners: Vec<ListenerTermination>,
    pub elapsed: Duration,
}

impl TerminationReport {
    pub fn all_completed(&self) -> bool {
        self.listeners.iter().all(|l| l.completed)
    }

    /// Names of listeners that were still busy at the deadline.
    pub fn unfinished(&self) -> Vec<&str> {
        self.listeners
            .iter()
            .filter(|l| !l.completed)
            .map(|l| l.name.as_str())
            .collect()
    }
}

/// Drives listeners, senders, the request gate and the health check
/// through the lifecycle.
pub struct Lifecycle {
    node_name: String,
    status: Mutex<LifecycleStatus>,
    transition: tokio::sync::Mutex<()>,
    listeners: Vec<Arc<dyn MessageListener>>,
    senders: Vec<Arc<OutboundSender>>,
    gate: RequestGate,
    health: Arc<HealthCheck>,
    monitor: Arc<TaggedCallMonitor>,
    shutdown_deadline: Duration,
    drain_grace: Duration,
}

impl Lifecycle {
    pub fn new(
        node_name: impl Into<String>,
        gate: RequestGate,
        health: Arc<HealthCheck>,
        monitor: Arc<TaggedCallMonitor>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            status: Mutex::new(LifecycleStatus::Inactive),
            transition: tokio::sync::Mutex::new(()),
            listeners: Vec::new(),
            senders: Vec::new(),
            gate,
            health,
            monitor,
            shutdown_deadline: Duration::from_secs(30),
            drain_grace: Duration::ZERO,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn MessageListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Add a sender that is paused and resumed with the node.
    pub fn with_sender(mut self, sender: Arc<OutboundSender>) -> Self {
        self.senders.push(sender);
        self
    }

    /// One deadline shared by every await during termination.
    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.shutdown_deadline = deadline;
        self
    }

    /// Pause between draining requests and termination in [`shutdown`](Self::shutdown).
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn status(&self) -> LifecycleStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(LifecycleStatus::Terminated)
    }

    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    pub fn listeners(&self) -> &[Arc<dyn MessageListener>] {
        &self.listeners
    }

    /// Whether application calls are being taken off the queues.
    pub fn is_accepting_requests(&self) -> bool {
        self.status() == LifecycleStatus::Running && self.gate.is_open()
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport {
            node_name: self.node_name.clone(),
            status: self.status(),
            healthy: self.health.is_healthy(),
            accepting_requests: self.is_accepting_requests(),
            in_flight_tagged_calls: self.monitor.in_flight(),
            recently_processed_tagged_call: self.monitor.recently_processed_tagged_call(),
            last_tagged_completion: self.monitor.last_completed_at(),
            captured_at: Utc::now(),
        }
    }

    /// Move from `expected` to `next`, or fail without changing anything.
    pub fn check_and_change(&self, expected: LifecycleStatus, next: LifecycleStatus) -> Result<()> {
        let mut status = self
            .status
            .lock()
            .map_err(|_| CoreError::InvalidTransition {
                expected,
                actual: LifecycleStatus::Terminated,
                requested: next,
            })?;
        if *status != expected {
            warn!(
                node = %self.node_name,
                expected = %expected,
                actual = %*status,
                requested = %next,
                "Rejected lifecycle transition"
            );
            return Err(CoreError::InvalidTransition {
                expected,
                actual: *status,
                requested: next,
            });
        }
        info!(node = %self.node_name, from = %expected, to = %next, "Lifecycle transition");
        *status = next;
        Ok(())
    }

    /// INACTIVE → PAUSED: healthy, senders held, only the system listener runs.
    pub async fn enter_paused_state(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.check_and_change(LifecycleStatus::Inactive, LifecycleStatus::Paused)?;
        self.apply_paused_effects().await
    }

    /// PAUSED → RUNNING.
    pub async fn enter_running_state(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.check_and_change(LifecycleStatus::Paused, LifecycleStatus::Running)?;
        self.apply_running_effects().await
    }

    /// INACTIVE → RUNNING without waiting for promotion.
    pub async fn start_without_rollout(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.check_and_change(LifecycleStatus::Inactive, LifecycleStatus::Running)?;
        self.apply_paused_effects().await?;
        self.apply_running_effects().await
    }

    /// RUNNING → PAUSED. Listeners stay started but wait on the closed gate.
    pub async fn return_to_paused_state(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.check_and_change(LifecycleStatus::Running, LifecycleStatus::Paused)?;
        self.gate.close();
        for sender in &self.senders {
            sender.pause();
        }
        Ok(())
    }

    /// RUNNING → HALTING_LOW_PRIORITY_EVENTS: stop every listener that does
    /// not carry high-priority events, calls, responses or system traffic.
    pub async fn halt_low_priority_events(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.check_and_change(
            LifecycleStatus::Running,
            LifecycleStatus::HaltingLowPriorityEvents,
        )?;
        for listener in &self.listeners {
            listener.prepare_for_shutdown();
        }
        for listener in &self.listeners {
            let keep = matches!(
                listener.role(),
                ListenerRole::HighPriorityEvent
                    | ListenerRole::Call
                    | ListenerRole::Response
                    | ListenerRole::System
            );
            if !keep {
                listener.shutdown().await;
            }
        }
        Ok(())
    }

    /// HALTING_LOW_PRIORITY_EVENTS → DRAINING_REQUESTS: report unhealthy so
    /// traffic moves to the other deployment.
    pub async fn drain_requests(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.check_and_change(
            LifecycleStatus::HaltingLowPriorityEvents,
            LifecycleStatus::DrainingRequests,
        )?;
        self.health.set_healthy(false);
        Ok(())
    }

    /// DRAINING_REQUESTS → TERMINATED, stopping listeners in order:
    /// high-priority events, calls, responses, system.
    ///
    /// All awaits share one deadline. Listeners that miss it are reported
    /// and the sequence carries on.
    pub async fn terminate(&self) -> Result<TerminationReport> {
        let _guard = self.transition.lock().await;
        let started = Instant::now();
        let deadline = started + self.shutdown_deadline;
        let mut report = TerminationReport::default();

        self.check_and_change(
            LifecycleStatus::DrainingRequests,
            LifecycleStatus::HaltingHighPriorityEvents,
        )?;
        self.stop_role(ListenerRole::HighPriorityEvent, deadline, &mut report)
            .await;

        self.check_and_change(
            LifecycleStatus::HaltingHighPriorityEvents,
            LifecycleStatus::Terminating,
        )?;
        self.stop_role(ListenerRole::Call, deadline, &mut report).await;
        self.stop_role(ListenerRole::Response, deadline, &mut report)
            .await;
        self.stop_role(ListenerRole::System, deadline, &mut report)
            .await;

        // Listeners stopped earlier only need their in-flight work awaited.
        for role in [ListenerRole::Work, ListenerRole::LowPriorityEvent] {
            self.stop_role(role, deadline, &mut report).await;
        }

        self.check_and_change(LifecycleStatus::Terminating, LifecycleStatus::Terminated)?;
        report.elapsed = started.elapsed();

        if report.all_completed() {
            info!(
                node = %self.node_name,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Node terminated"
            );
        } else {
            warn!(
                node = %self.node_name,
                unfinished = ?report.unfinished(),
                "Node terminated with listeners still busy"
            );
        }
        Ok(report)
    }

    /// Full retirement from RUNNING, or from PAUSED after promotion.
    pub async fn shutdown(&self) -> Result<TerminationReport> {
        if self.status() == LifecycleStatus::Paused {
            self.enter_running_state().await?;
        }
        self.halt_low_priority_events().await?;
        self.drain_requests().await?;
        if !self.drain_grace.is_zero() {
            info!(
                node = %self.node_name,
                grace_ms = self.drain_grace.as_millis() as u64,
                "Waiting for traffic to drain"
            );
            tokio::time::sleep(self.drain_grace).await;
        }
        self.terminate().await
    }

    async fn apply_paused_effects(&self) -> Result<()> {
        self.health.set_healthy(true);
        for sender in &self.senders {
            sender.pause();
        }
        for listener in self.with_role(ListenerRole::System) {
            listener.start().await?;
        }
        Ok(())
    }

    async fn apply_running_effects(&self) -> Result<()> {
        for listener in &self.listeners {
            if listener.role() != ListenerRole::System {
                listener.start().await?;
            }
        }
        self.gate.open();
        for sender in &self.senders {
            sender.resume().await;
        }
        Ok(())
    }

    fn with_role(&self, role: ListenerRole) -> impl Iterator<Item = &Arc<dyn MessageListener>> {
        self.listeners.iter().filter(move |l| l.role() == role)
    }

    async fn stop_role(
        &self,
        role: ListenerRole,
        deadline: Instant,
        report: &mut TerminationReport,
    ) {
        for listener in self.with_role(role) {
            listener.shutdown().await;
            let completed = listener.await_termination(deadline).await;
            report.listeners.push(ListenerTermination {
                name: listener.name().to_string(),
                role,
                completed,
            });
        }
    }
}
