// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protobuf messages for the call and response schema.
//!
//! Field tags are part of the wire contract and must never be reused.
//! Parameter values, return values and error details are JSON documents
//! carried in `bytes` fields, so a `null` return value is the four bytes
//! `null` rather than an absent field.
//!
//! ```text
//! message CallMessage {
//!   string call_id = 1;
//!   string interface_name = 2;
//!   string method_name = 3;
//!   repeated string parameter_types = 4;
//!   repeated bytes parameters = 5;
//!   optional string principal = 6;
//!   uint32 attempts_remaining = 7;
//!   bool tag = 8;
//!   optional string reply_to = 9;
//! }
//!
//! message ErrorMessage {
//!   string error_type = 1;
//!   string message = 2;
//!   optional bytes details = 3;
//! }
//!
//! message ResponseMessage {
//!   string call_id = 1;
//!   oneof outcome {
//!     bytes return_value = 2;
//!     ErrorMessage thrown_exception = 3;
//!   }
//! }
//! ```

use crate::call::Call;
use crate::frame::FrameError;
use crate::remote_error::RemoteError;
use crate::response::{Outcome, Response};

/// Wire form of a [`Call`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CallMessage {
    #[prost(string, tag = "1")]
    pub call_id: String,
    #[prost(string, tag = "2")]
    pub interface_name: String,
    #[prost(string, tag = "3")]
    pub method_name: String,
    #[prost(string, repeated, tag = "4")]
    pub parameter_types: Vec<String>,
    #[prost(bytes = "vec", repeated, tag = "5")]
    pub parameters: Vec<Vec<u8>>,
    #[prost(string, optional, tag = "6")]
    pub principal: Option<String>,
    #[prost(uint32, tag = "7")]
    pub attempts_remaining: u32,
    #[prost(bool, tag = "8")]
    pub tag: bool,
    #[prost(string, optional, tag = "9")]
    pub reply_to: Option<String>,
}

/// Wire form of a [`RemoteError`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorMessage {
    #[prost(string, tag = "1")]
    pub error_type: String,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub details: Option<Vec<u8>>,
}

/// Wire form of a [`Response`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponseMessage {
    #[prost(string, tag = "1")]
    pub call_id: String,
    #[prost(oneof = "response_message::Outcome", tags = "2, 3")]
    pub outcome: Option<response_message::Outcome>,
}

/// Nested types for [`ResponseMessage`].
pub mod response_message {
    /// Exactly one of a JSON return value or an error.
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Outcome {
        #[prost(bytes, tag = "2")]
        ReturnValue(Vec<u8>),
        #[prost(message, tag = "3")]
        ThrownException(super::ErrorMessage),
    }
}

impl TryFrom<&Call> for CallMessage {
    type Error = FrameError;

    fn try_from(call: &Call) -> Result<Self, Self::Error> {
        let parameters = call
            .parameters
            .iter()
            .map(serde_json::to_vec)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            call_id: call.call_id.clone(),
            interface_name: call.interface_name.clone(),
            method_name: call.method_name.clone(),
            parameter_types: call.parameter_types.clone(),
            parameters,
            principal: call.principal.clone(),
            attempts_remaining: call.attempts_remaining,
            tag: call.tag,
            reply_to: call.reply_to.clone(),
        })
    }
}

impl TryFrom<CallMessage> for Call {
    type Error = FrameError;

    fn try_from(msg: CallMessage) -> Result<Self, Self::Error> {
        if msg.parameter_types.len() != msg.parameters.len() {
            return Err(FrameError::Malformed(format!(
                "call '{}' has {} parameter types but {} parameters",
                msg.call_id,
                msg.parameter_types.len(),
                msg.parameters.len()
            )));
        }

        let parameters = msg
            .parameters
            .iter()
            .map(|bytes| serde_json::from_slice(bytes))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            call_id: msg.call_id,
            interface_name: msg.interface_name,
            method_name: msg.method_name,
            parameter_types: msg.parameter_types,
            parameters,
            principal: msg.principal,
            attempts_remaining: msg.attempts_remaining,
            tag: msg.tag,
            reply_to: msg.reply_to,
        })
    }
}

impl TryFrom<&RemoteError> for ErrorMessage {
    type Error = FrameError;

    fn try_from(err: &RemoteError) -> Result<Self, Self::Error> {
        let details = err.details.as_ref().map(serde_json::to_vec).transpose()?;
        Ok(Self {
            error_type: err.error_type.clone(),
            message: err.message.clone(),
            details,
        })
    }
}

impl TryFrom<ErrorMessage> for RemoteError {
    type Error = FrameError;

    fn try_from(msg: ErrorMessage) -> Result<Self, Self::Error> {
        let details = msg
            .details
            .as_deref()
            .map(serde_json::from_slice)
            .transpose()?;
        Ok(Self {
            error_type: msg.error_type,
            message: msg.message,
            details,
        })
    }
}

impl TryFrom<&Response> for ResponseMessage {
    type Error = FrameError;

    fn try_from(response: &Response) -> Result<Self, Self::Error> {
        let outcome = match &response.outcome {
            Outcome::ReturnValue(value) => {
                response_message::Outcome::ReturnValue(serde_json::to_vec(value)?)
            }
            Outcome::ThrownException(err) => {
                response_message::Outcome::ThrownException(ErrorMessage::try_from(err)?)
            }
        };
        Ok(Self {
            call_id: response.call_id.clone(),
            outcome: Some(outcome),
        })
    }
}

impl TryFrom<ResponseMessage> for Response {
    type Error = FrameError;

    fn try_from(msg: ResponseMessage) -> Result<Self, Self::Error> {
        let outcome = match msg.outcome {
            Some(response_message::Outcome::ReturnValue(bytes)) => {
                Outcome::ReturnValue(serde_json::from_slice(&bytes)?)
            }
            Some(response_message::Outcome::ThrownException(err)) => {
                Outcome::ThrownException(RemoteError::try_from(err)?)
            }
            None => {
                return Err(FrameError::Malformed(format!(
                    "response '{}' carries neither a return value nor an exception",
                    msg.call_id
                )));
            }
        };
        Ok(Self {
            call_id: msg.call_id,
            outcome,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_return_value_is_encoded_as_json_null() {
        let msg = ResponseMessage::try_from(&Response::returned("c-1", json!(null))).unwrap();
        assert_eq!(
            msg.outcome,
            Some(response_message::Outcome::ReturnValue(b"null".to_vec()))
        );
    }

    #[test]
    fn test_response_without_outcome_is_rejected() {
        let msg = ResponseMessage {
            call_id: "c-1".to_string(),
            outcome: None,
        };
        assert!(matches!(
            Response::try_from(msg),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_mismatched_parameter_counts_are_rejected() {
        let msg = CallMessage {
            call_id: "c-1".to_string(),
            interface_name: "Greeter".to_string(),
            method_name: "greet".to_string(),
            parameter_types: vec!["String".to_string()],
            parameters: vec![],
            principal: None,
            attempts_remaining: 5,
            tag: false,
            reply_to: None,
        };
        assert!(matches!(Call::try_from(msg), Err(FrameError::Malformed(_))));
    }
}
