// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The `Response` value object: the terminal outcome of a call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::call::Call;
use crate::remote_error::RemoteError;

/// Outcome of a call. Exactly one of a return value or a thrown error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// The method returned, possibly a legitimate `null`.
    ReturnValue(Value),
    /// The method failed.
    ThrownException(RemoteError),
}

/// Correlates the outcome of a call back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Id of the originating call.
    pub call_id: String,
    /// What happened.
    pub outcome: Outcome,
}

impl Response {
    /// Successful response.
    pub fn returned(call_id: impl Into<String>, value: Value) -> Self {
        Self {
            call_id: call_id.into(),
            outcome: Outcome::ReturnValue(value),
        }
    }

    /// Failed response.
    pub fn thrown(call_id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            call_id: call_id.into(),
            outcome: Outcome::ThrownException(error),
        }
    }

    /// Successful response for a call.
    pub fn for_return(call: &Call, value: Value) -> Self {
        Self::returned(call.call_id.clone(), value)
    }

    /// Failed response for a call.
    pub fn for_error(call: &Call, error: RemoteError) -> Self {
        Self::thrown(call.call_id.clone(), error)
    }

    /// Whether the outcome is an error.
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::ThrownException(_))
    }

    /// Convert into the caller-facing result.
    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self.outcome {
            Outcome::ReturnValue(value) => Ok(value),
            Outcome::ThrownException(error) => Err(error),
        }
    }
}
