// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Health signals exposed to load balancers and deployment orchestration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::lifecycle::LifecycleStatus;

/// Whether this node should receive traffic.
///
/// Positive from PAUSED until DRAINING_REQUESTS.
#[derive(Debug, Default)]
pub struct HealthCheck {
    healthy: AtomicBool,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct TaggedState {
    in_flight: usize,
    last_completed: Option<Instant>,
    last_completed_at: Option<DateTime<Utc>>,
}

/// Counts tagged calls being processed and remembers when the last one ended.
#[derive(Debug)]
pub struct TaggedCallMonitor {
    state: Mutex<TaggedState>,
    window: Duration,
}

impl TaggedCallMonitor {
    /// `window` is how long after the last completion activity is still reported.
    pub fn new(window: Duration) -> Self {
        Self {
            state: Mutex::new(TaggedState::default()),
            window,
        }
    }

    /// Mark a tagged call as started. It ends when the guard is dropped.
    pub fn begin(self: &Arc<Self>) -> TaggedCallGuard {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight += 1;
        }
        TaggedCallGuard {
            monitor: self.clone(),
        }
    }

    fn end(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.in_flight = state.in_flight.saturating_sub(1);
            state.last_completed = Some(Instant::now());
            state.last_completed_at = Some(Utc::now());
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().map(|s| s.in_flight).unwrap_or(0)
    }

    /// True while a tagged call runs or within the window after the last one.
    pub fn recently_processed_tagged_call(&self) -> bool {
        let Ok(state) = self.state.lock() else {
            return false;
        };
        state.in_flight > 0
            || state
                .last_completed
                .is_some_and(|at| at.elapsed() <= self.window)
    }

    pub fn last_completed_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().ok().and_then(|s| s.last_completed_at)
    }
}

/// Ends a tagged call on drop, whatever the outcome.
pub struct TaggedCallGuard {
    monitor: Arc<TaggedCallMonitor>,
}

impl Drop for TaggedCallGuard {
    fn drop(&mut self) {
        self.monitor.end();
    }
}

/// Point-in-time health of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub node_name: String,
    pub status: LifecycleStatus,
    pub healthy: bool,
    pub accepting_requests: bool,
    pub in_flight_tagged_calls: usize,
    pub recently_processed_tagged_call: bool,
    pub last_tagged_completion: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
}
