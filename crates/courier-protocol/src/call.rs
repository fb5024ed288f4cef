// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The `Call` value object: one remote invocation and its retry budget.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Number of execution attempts a freshly constructed call is allowed.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// A pending remote invocation request.
///
/// A call is created by a client proxy, travels over the call queue, and is
/// executed by a call handler in some (possibly different) process. The only
/// field that changes after construction is `attempts_remaining`, which the
/// handler decrements once per execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    /// Globally unique identifier, generated at construction.
    pub call_id: String,
    /// Name of the remote interface.
    pub interface_name: String,
    /// Name of the method on the interface.
    pub method_name: String,
    /// Declared type names of the parameters, positionally matched to `parameters`.
    pub parameter_types: Vec<String>,
    /// Argument values.
    pub parameters: Vec<Value>,
    /// Ambient principal of the caller, propagated but never validated.
    pub principal: Option<String>,
    /// Execution attempts left before the call is finalized as failed.
    pub attempts_remaining: u32,
    /// Marks calls tracked by the "recently processed a tagged call" signal.
    pub tag: bool,
    /// Queue the response should be sent to. `None` means the responder's default queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Call {
    /// Create a call with a fresh id and the default attempt budget.
    pub fn new(interface_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            interface_name: interface_name.into(),
            method_name: method_name.into(),
            parameter_types: Vec::new(),
            parameters: Vec::new(),
            principal: None,
            attempts_remaining: DEFAULT_ATTEMPTS,
            tag: false,
            reply_to: None,
        }
    }

    /// Append a parameter with its declared type name.
    pub fn with_parameter(mut self, type_name: impl Into<String>, value: Value) -> Self {
        self.parameter_types.push(type_name.into());
        self.parameters.push(value);
        self
    }

    /// Set the propagated principal.
    pub fn with_principal(mut self, principal: Option<String>) -> Self {
        self.principal = principal;
        self
    }

    /// Override the attempt budget.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts_remaining = attempts;
        self
    }

    /// Mark the call for recent-activity monitoring.
    pub fn tagged(mut self, tag: bool) -> Self {
        self.tag = tag;
        self
    }

    /// Set the queue the response should be sent to.
    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    /// Consume one execution attempt. Floors at zero.
    ///
    /// Returns the number of attempts left after this one.
    pub fn decrement_attempts(&mut self) -> u32 {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.attempts_remaining
    }

    /// Whether a retry may still be scheduled.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts_remaining > 0
    }

    /// `Interface.method`, used in log fields.
    pub fn qualified_method(&self) -> String {
        format!("{}.{}", self.interface_name, self.method_name)
    }
}
