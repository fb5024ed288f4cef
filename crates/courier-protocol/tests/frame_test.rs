// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Frame encoding/decoding tests for courier-protocol.

use bytes::{BufMut, Bytes, BytesMut};
use courier_protocol::frame::{Frame, FrameError, HEADER_SIZE, MessageType, PROTOCOL_VERSION};
use courier_protocol::{
    Call, RemoteError, Response, decode_call, decode_response, encode_call, encode_response,
};
use serde_json::json;

#[test]
fn test_call_survives_the_queue() {
    let call = Call::new("Orders", "place")
        .with_parameter("String", json!("sku-42"))
        .with_parameter("Quantity", json!({"amount": 3, "unit": "pcs"}))
        .with_principal(Some("alice".to_string()))
        .with_attempts(3)
        .tagged(true)
        .with_reply_to("node-a-responses");

    let decoded = decode_call(encode_call(&call).unwrap()).unwrap();
    assert_eq!(decoded, call);
}

#[test]
fn test_call_without_principal_or_parameters() {
    let call = Call::new("System", "ping");
    let decoded = decode_call(encode_call(&call).unwrap()).unwrap();
    assert_eq!(decoded.principal, None);
    assert_eq!(decoded.reply_to, None);
    assert!(decoded.parameters.is_empty());
    assert!(!decoded.tag);
}

#[test]
fn test_null_parameter_is_preserved() {
    let call = Call::new("Greeter", "greet").with_parameter("Option<String>", json!(null));
    let decoded = decode_call(encode_call(&call).unwrap()).unwrap();
    assert_eq!(decoded.parameters, vec![json!(null)]);
}

#[test]
fn test_null_return_value_is_not_an_error() {
    let response = Response::returned("c-1", json!(null));
    let decoded = decode_response(encode_response(&response).unwrap()).unwrap();
    assert!(!decoded.is_error());
    assert_eq!(decoded.into_result().unwrap(), json!(null));
}

#[test]
fn test_error_response_keeps_type_and_details() {
    let error = RemoteError::new("QuotaExceeded", "limit reached").with_details(json!({"limit": 10}));
    let response = Response::thrown("c-2", error.clone());
    let decoded = decode_response(encode_response(&response).unwrap()).unwrap();
    assert_eq!(decoded.call_id, "c-2");
    assert_eq!(decoded.into_result().unwrap_err(), error);
}

#[test]
fn test_decoding_a_call_as_a_response_fails() {
    let body = encode_call(&Call::new("Greeter", "greet")).unwrap();
    match decode_response(body) {
        Err(FrameError::UnexpectedMessageType { expected, actual }) => {
            assert_eq!(expected, MessageType::Response);
            assert_eq!(actual, MessageType::Call);
        }
        other => panic!("expected UnexpectedMessageType, got {:?}", other),
    }
}

#[test]
fn test_truncated_header_is_rejected() {
    let result = Frame::decode_from_bytes(Bytes::from_static(&[0, 1, 0]));
    assert!(matches!(result, Err(FrameError::Truncated(3))));
}

#[test]
fn test_unknown_version_is_rejected() {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    buf.put_u16(PROTOCOL_VERSION + 1);
    buf.put_u16(MessageType::Call as u16);
    let result = Frame::decode_from_bytes(buf.freeze());
    assert!(matches!(result, Err(FrameError::UnsupportedVersion(_))));
}

#[test]
fn test_unknown_message_type_is_rejected() {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    buf.put_u16(PROTOCOL_VERSION);
    buf.put_u16(7);
    let result = Frame::decode_from_bytes(buf.freeze());
    assert!(matches!(result, Err(FrameError::InvalidMessageType(7))));
}

#[test]
fn test_garbage_payload_is_a_decode_error() {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + 3);
    buf.put_u16(PROTOCOL_VERSION);
    buf.put_u16(MessageType::Call as u16);
    buf.put_slice(&[0xff, 0xff, 0xff]);
    assert!(decode_call(buf.freeze()).is_err());
}
