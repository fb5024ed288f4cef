// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for courier-core.
//!
//! `CoreError` is what a local caller sees. Errors raised by the remote
//! method itself travel inside the response as a [`RemoteError`] and are
//! surfaced unchanged through [`CoreError::Remote`].

use courier_protocol::{FrameError, RemoteError};

use crate::lifecycle::LifecycleStatus;
use crate::transport::TransportError;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while dispatching or serving calls.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// The remote method failed. Type name and message are preserved.
    #[error("remote call failed: {0}")]
    Remote(RemoteError),

    /// No response arrived before the caller's deadline.
    #[error("no response for call '{call_id}' within {waited_ms}ms")]
    NoResponse {
        /// The call that timed out.
        call_id: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The transport rejected an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A message body could not be framed or unframed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A value could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No implementation is registered for the interface.
    #[error("no implementation registered for interface '{interface}'")]
    UnknownInterface {
        /// The requested interface name.
        interface: String,
    },

    /// Several implementations match and none is bound or marked default.
    #[error("interface '{interface}' has {candidates} implementations and none is bound or named default")]
    AmbiguousImplementation {
        /// The requested interface name.
        interface: String,
        /// How many implementations were found.
        candidates: usize,
    },

    /// An explicit binding points at an implementation that does not exist.
    #[error("interface '{interface}' is bound to unknown implementation '{implementation}'")]
    UnknownImplementation {
        /// The requested interface name.
        interface: String,
        /// The bound implementation name.
        implementation: String,
    },

    /// A continuation was redeemed twice or never issued.
    #[error("no suspended response for call '{call_id}'")]
    UnknownContinuation {
        /// The call id carried by the continuation.
        call_id: String,
    },

    /// A lifecycle transition was attempted from the wrong state.
    #[error("invalid lifecycle transition: expected {expected:?}, current {actual:?}, requested {requested:?}")]
    InvalidTransition {
        /// State the transition requires.
        expected: LifecycleStatus,
        /// State the node was actually in.
        actual: LifecycleStatus,
        /// State that was requested.
        requested: LifecycleStatus,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Remote(_) => "REMOTE_ERROR",
            Self::NoResponse { .. } => "NO_RESPONSE",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Frame(_) => "FRAME_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::UnknownInterface { .. } => "UNKNOWN_INTERFACE",
            Self::AmbiguousImplementation { .. } => "AMBIGUOUS_IMPLEMENTATION",
            Self::UnknownImplementation { .. } => "UNKNOWN_IMPLEMENTATION",
            Self::UnknownContinuation { .. } => "UNKNOWN_CONTINUATION",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }

    /// The remote error, if this is one.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the caller gave up waiting.
    pub fn is_no_response(&self) -> bool {
        matches!(self, Self::NoResponse { .. })
    }
}

impl From<RemoteError> for CoreError {
    fn from(err: RemoteError) -> Self {
        CoreError::Remote(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_codes() {
        let test_cases = vec![
            (
                CoreError::Remote(RemoteError::validation("bad")),
                "REMOTE_ERROR",
            ),
            (
                CoreError::NoResponse {
                    call_id: "c-1".to_string(),
                    waited_ms: 40_000,
                },
                "NO_RESPONSE",
            ),
            (
                CoreError::UnknownInterface {
                    interface: "Greeter".to_string(),
                },
                "UNKNOWN_INTERFACE",
            ),
            (
                CoreError::AmbiguousImplementation {
                    interface: "Greeter".to_string(),
                    candidates: 2,
                },
                "AMBIGUOUS_IMPLEMENTATION",
            ),
            (
                CoreError::UnknownContinuation {
                    call_id: "c-1".to_string(),
                },
                "UNKNOWN_CONTINUATION",
            ),
            (
                CoreError::InvalidTransition {
                    expected: LifecycleStatus::Paused,
                    actual: LifecycleStatus::Inactive,
                    requested: LifecycleStatus::Running,
                },
                "INVALID_TRANSITION",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(error.error_code(), expected_code, "for {:?}", error);
        }
    }

    #[test]
    fn test_remote_error_is_preserved() {
        let err: CoreError = RemoteError::new("QuotaExceeded", "limit reached").into();
        let remote = err.as_remote().unwrap();
        assert_eq!(remote.error_type, "QuotaExceeded");
        assert_eq!(remote.message, "limit reached");
        assert!(err.to_string().contains("QuotaExceeded: limit reached"));
    }

    #[test]
    fn test_no_response_display() {
        let err = CoreError::NoResponse {
            call_id: "c-9".to_string(),
            waited_ms: 250,
        };
        assert!(err.is_no_response());
        assert_eq!(err.to_string(), "no response for call 'c-9' within 250ms");
    }
}
