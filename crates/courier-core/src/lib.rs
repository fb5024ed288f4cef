// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Courier core: queue-backed RPC with a blue-green node lifecycle.
//!
//! Callers talk to remote services through typed clients generated by
//! [`remote_interface`]. Each call is framed, put on a queue, executed by
//! whichever node consumes it, retried on failure with a fixed backoff and
//! answered on the caller's response queue.
//!
//! ```text
//! ┌──────────────┐  Call   ┌─────────────┐  Call   ┌───────────────┐
//! │ <Trait>Client│────────▶│   Gateway   │────────▶│  call queue   │
//! │ (ClientProxy)│         │ (rendezvous)│         └───────┬───────┘
//! └──────────────┘         └──────▲──────┘                 │
//!                                 │ Response               ▼
//!                          ┌──────┴──────┐         ┌───────────────┐
//!                          │response queue│◀───────│  CallHandler  │
//!                          └─────────────┘ Response│ retry / reply │
//!                                                  └───────────────┘
//! ```
//!
//! A node moves through [`LifecycleStatus`] so a new deployment can start
//! paused, be probed and promoted over its system queue, while the old
//! one drains and terminates.
//!
//! A fire-and-forget method never hands a value back, so it must return
//! `Result<(), RemoteError>`:
//!
//! ```compile_fail
//! use courier_core::{InvocationContext, RemoteError, async_trait, remote_interface};
//!
//! #[remote_interface(name = "Counter")]
//! #[async_trait]
//! pub trait Counter: Send + Sync {
//!     #[remote(fire_and_forget)]
//!     async fn count(&self, ctx: &InvocationContext) -> Result<u32, RemoteError>;
//! }
//! ```

extern crate self as courier_core;

pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod health;
pub mod lifecycle;
pub mod listener;
pub mod proxy;
pub mod registry;
pub mod rendezvous;
pub mod responder;
pub mod runtime;
pub mod security;
pub mod sender;
pub mod system;
pub mod transport;

// Used by code generated by `#[remote_interface]`.
pub use async_trait::async_trait;
pub use serde_json;

pub use courier_macros::remote_interface;
pub use courier_protocol::{
    Call, CONFIGURATION_ERROR, Outcome, PERSISTENCE_UNAVAILABLE, RemoteError, Response,
    VALIDATION_ERROR,
};

pub use config::{Config, ConfigError};
pub use context::InvocationContext;
pub use error::{CoreError, Result};
pub use gateway::Gateway;
pub use handler::{
    AsyncExceptionHandler, BASE_IMMEDIATE_FAILURES, CallHandler, CallOutcome,
    LoggingExceptionHandler,
};
pub use health::{HealthCheck, HealthReport, TaggedCallMonitor};
pub use lifecycle::{Lifecycle, LifecycleStatus, ListenerTermination, TerminationReport};
pub use listener::{
    CallMessageHandler, ListenerOptions, ListenerRole, MessageHandler, MessageListener,
    QueueListener, RequestGate, ResponseMessageHandler,
};
pub use proxy::ClientProxy;
pub use registry::{MethodDescriptor, RemoteService, ServiceRegistry};
pub use rendezvous::HandoffOutcome;
pub use responder::{Continuation, Responder};
pub use runtime::{NodeRuntime, NodeRuntimeBuilder};
pub use sender::OutboundSender;
pub use system::{System, SystemClient, SystemNode, SystemService};
pub use transport::{InMemoryTransport, QueueMessage, Transport, TransportError};
#[cfg(feature = "redis")]
pub use transport::RedisStreamTransport;
