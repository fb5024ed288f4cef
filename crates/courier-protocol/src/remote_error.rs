// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Structured error carried inside a `Response`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type name for input validation failures. Never retried.
pub const VALIDATION_ERROR: &str = "ValidationError";

/// Error type name for an unavailable persistence layer. Never retried.
pub const PERSISTENCE_UNAVAILABLE: &str = "PersistenceUnavailable";

/// Error type name for interfaces, methods or implementations that cannot be resolved.
pub const CONFIGURATION_ERROR: &str = "ConfigurationError";

/// An error thrown by a remote method.
///
/// `error_type` plays the role of the exception class: it is what retry
/// classification matches on and what the caller sees re-raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
    /// Type name of the error, e.g. `ValidationError`.
    pub error_type: String,
    /// Human readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RemoteError {
    /// Create an error of the given type.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Input validation failed.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(VALIDATION_ERROR, message)
    }

    /// The persistence layer is unavailable.
    pub fn persistence_unavailable(message: impl Into<String>) -> Self {
        Self::new(PERSISTENCE_UNAVAILABLE, message)
    }

    /// Interface, method or implementation could not be resolved.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(CONFIGURATION_ERROR, message)
    }

    /// Attach a structured payload.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether this error has the given type name.
    pub fn is(&self, error_type: &str) -> bool {
        self.error_type == error_type
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for RemoteError {}
