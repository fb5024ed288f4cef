// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for queue message bodies.
//!
//! Every message placed on a queue carries exactly one frame:
//! - 2 bytes: protocol version (big-endian)
//! - 2 bytes: message type (big-endian)
//! - N bytes: protobuf payload
//!
//! The queue delimits messages, so no length prefix is needed.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::call::Call;
use crate::response::Response;
use crate::wire::{CallMessage, ResponseMessage};

/// Current protocol version written into every frame.
pub const PROTOCOL_VERSION: u16 = 1;

/// Maximum payload size (1 MB). Most brokers reject larger bodies anyway.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Frame header size (2 bytes version + 2 bytes type)
pub const HEADER_SIZE: usize = 4;

/// Message types carried on queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    /// A `Call` destined for a call handler
    Call = 1,
    /// A `Response` destined for a gateway
    Response = 2,
}

impl TryFrom<u16> for MessageType {
    type Error = FrameError;

    fn try_from(value: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        match value {
            1 => Ok(MessageType::Call),
            2 => Ok(MessageType::Response),
            _ => Err(FrameError::InvalidMessageType(value)),
        }
    }
}

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("incomplete frame: {0} bytes")]
    Truncated(usize),

    #[error("unsupported protocol version: {0} (expected {PROTOCOL_VERSION})")]
    UnsupportedVersion(u16),

    #[error("invalid message type: {0}")]
    InvalidMessageType(u16),

    #[error("unexpected message type: expected {expected:?}, got {actual:?}")]
    UnexpectedMessageType {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("JSON value error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// A framed message with type and payload
#[derive(Debug, Clone)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Create a call frame
    pub fn call(call: &Call) -> Result<Self, FrameError> {
        Self::new(MessageType::Call, &CallMessage::try_from(call)?)
    }

    /// Create a response frame
    pub fn response(response: &Response) -> Result<Self, FrameError> {
        Self::new(MessageType::Response, &ResponseMessage::try_from(response)?)
    }

    /// Create a new frame with the given type and message
    pub fn new<M: Message>(message_type: MessageType, msg: &M) -> Result<Self, FrameError> {
        let payload = msg.encode_to_vec();
        if payload.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(payload.len()));
        }
        Ok(Self {
            message_type,
            payload: Bytes::from(payload),
        })
    }

    /// Decode the payload as a protobuf message
    pub fn decode<M: Message + Default>(&self) -> Result<M, FrameError> {
        Ok(M::decode(self.payload.clone())?)
    }

    /// Decode the payload as a `Call`
    pub fn into_call(self) -> Result<Call, FrameError> {
        self.expect(MessageType::Call)?;
        Call::try_from(self.decode::<CallMessage>()?)
    }

    /// Decode the payload as a `Response`
    pub fn into_response(self) -> Result<Response, FrameError> {
        self.expect(MessageType::Response)?;
        Response::try_from(self.decode::<ResponseMessage>()?)
    }

    fn expect(&self, expected: MessageType) -> Result<(), FrameError> {
        if self.message_type != expected {
            return Err(FrameError::UnexpectedMessageType {
                expected,
                actual: self.message_type,
            });
        }
        Ok(())
    }

    /// Encode the frame to bytes for a queue message body
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u16(self.message_type as u16);
        buf.put(self.payload.clone());
        buf.freeze()
    }

    /// Decode a frame from a queue message body
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated(bytes.len()));
        }

        let version = bytes.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        let message_type = MessageType::try_from(bytes.get_u16())?;

        if bytes.len() > MAX_FRAME_SIZE {
            return Err(FrameError::FrameTooLarge(bytes.len()));
        }

        Ok(Self {
            message_type,
            payload: bytes,
        })
    }
}

/// Encode a call into a queue message body
pub fn encode_call(call: &Call) -> Result<Bytes, FrameError> {
    Ok(Frame::call(call)?.encode())
}

/// Decode a call from a queue message body
pub fn decode_call(body: Bytes) -> Result<Call, FrameError> {
    Frame::decode_from_bytes(body)?.into_call()
}

/// Encode a response into a queue message body
pub fn encode_response(response: &Response) -> Result<Bytes, FrameError> {
    Ok(Frame::response(response)?.encode())
}

/// Decode a response from a queue message body
pub fn decode_response(body: Bytes) -> Result<Response, FrameError> {
    Frame::decode_from_bytes(body)?.into_response()
}
