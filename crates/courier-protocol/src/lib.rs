// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Courier Protocol - message types and queue framing
//!
//! This crate defines what travels over the queues between nodes:
//! - [`Call`]: a remote invocation request with its retry budget
//! - [`Response`]: the terminal outcome of a call, a value or a [`RemoteError`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    courier-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Domain: Call / Response / RemoteError (serde)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: Protobuf (prost), JSON values in bytes      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Framing: version + message type header                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use courier_protocol::{Call, decode_call, encode_call};
//! use serde_json::json;
//!
//! let call = Call::new("Greeter", "greet").with_parameter("String", json!("world"));
//! let body = encode_call(&call).unwrap();
//! assert_eq!(decode_call(body).unwrap(), call);
//! ```

pub mod call;
pub mod frame;
pub mod remote_error;
pub mod response;
pub mod wire;

pub use call::{Call, DEFAULT_ATTEMPTS};
pub use frame::{
    Frame, FrameError, MessageType, PROTOCOL_VERSION, decode_call, decode_response, encode_call,
    encode_response,
};
pub use remote_error::{
    CONFIGURATION_ERROR, PERSISTENCE_UNAVAILABLE, RemoteError, VALIDATION_ERROR,
};
pub use response::{Outcome, Response};
