// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable node runtime.
//!
//! [`NodeRuntime`] wires a transport, a service registry and the
//! configuration into a node: senders, gateway, responder, call handler,
//! the call/response/system listeners and the lifecycle driving them.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use courier_core::{Config, NodeRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = NodeRuntime::builder()
//!         .config(Config::for_node("orders-blue"))
//!         .service("defaultOrders", Arc::new(OrdersService::new(Arc::new(Orders))))
//!         .build()?;
//!     runtime.start().await?;
//!
//!     let orders = OrdersClient::new(runtime.client());
//!     orders.place("sku-1".into()).await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::gateway::Gateway;
use crate::handler::{AsyncExceptionHandler, CallHandler};
use crate::health::{HealthCheck, HealthReport, TaggedCallMonitor};
use crate::lifecycle::{Lifecycle, TerminationReport};
use crate::listener::{
    CallMessageHandler, ListenerOptions, ListenerRole, MessageHandler, MessageListener,
    QueueListener, RequestGate, ResponseMessageHandler,
};
use crate::proxy::ClientProxy;
use crate::registry::{RemoteService, ServiceRegistry};
use crate::responder::Responder;
use crate::sender::OutboundSender;
use crate::system::{SystemClient, SystemNode, SystemService};
use crate::transport::{InMemoryTransport, Transport};

struct ListenerDefinition {
    role: ListenerRole,
    name: String,
    queue: String,
    handler: Arc<dyn MessageHandler>,
}

/// Builder for a [`NodeRuntime`].
#[derive(Default)]
pub struct NodeRuntimeBuilder {
    config: Option<Config>,
    transport: Option<Arc<dyn Transport>>,
    registry: ServiceRegistry,
    listeners: Vec<ListenerDefinition>,
    async_exception_handler: Option<Arc<dyn AsyncExceptionHandler>>,
}

impl std::fmt::Debug for NodeRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRuntimeBuilder")
            .field("config", &self.config)
            .field("transport", &self.transport.as_ref().map(|_| "..."))
            .field("interfaces", &self.registry.interfaces())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl NodeRuntimeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the queue transport.
    ///
    /// Default: a fresh [`InMemoryTransport`]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Register an implementation served on the call queue.
    pub fn service(mut self, name: impl Into<String>, service: Arc<dyn RemoteService>) -> Self {
        self.registry.register(name, service);
        self
    }

    /// Route `interface` to a named implementation.
    pub fn bind(mut self, interface: impl Into<String>, implementation: impl Into<String>) -> Self {
        self.registry.bind(interface, implementation);
        self
    }

    /// Add an application listener. It follows the request gate and is
    /// stopped according to `role`.
    pub fn listener(
        mut self,
        role: ListenerRole,
        name: impl Into<String>,
        queue: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        self.listeners.push(ListenerDefinition {
            role,
            name: name.into(),
            queue: queue.into(),
            handler,
        });
        self
    }

    /// Receive fire-and-forget calls that failed for good.
    pub fn async_exception_handler(mut self, handler: Arc<dyn AsyncExceptionHandler>) -> Self {
        self.async_exception_handler = Some(handler);
        self
    }

    /// Assemble the node. Nothing is consumed until [`NodeRuntime::start`].
    pub fn build(self) -> Result<NodeRuntime> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;
        if config.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if config.checked_response_wait().is_none() {
            anyhow::bail!("retry_delay * max_attempts + processing_allowance overflows");
        }
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(InMemoryTransport::new()));

        let call_sender = Arc::new(OutboundSender::new(
            "calls",
            config.call_queue.clone(),
            transport.clone(),
        ));
        let response_sender = Arc::new(OutboundSender::new(
            "responses",
            config.response_queue.clone(),
            transport.clone(),
        ));
        // Never paused: orchestration must work while the node is.
        let system_sender = Arc::new(OutboundSender::new(
            "system",
            config.system_queue.clone(),
            transport.clone(),
        ));

        let gateway = Arc::new(Gateway::new(
            call_sender.clone(),
            config.response_wait(),
            config.handoff_timeout,
        ));
        let responder = Arc::new(Responder::new(response_sender.clone()));
        let monitor = Arc::new(TaggedCallMonitor::new(config.tagged_activity_window));
        let health = Arc::new(HealthCheck::new());
        let gate = RequestGate::new();
        let registry = Arc::new(self.registry);

        let mut call_handler = CallHandler::new(
            registry.clone(),
            responder.clone(),
            call_sender.clone(),
            config.retry_delay,
            monitor.clone(),
        )
        .with_immediate_failures(config.immediate_failures.iter().cloned());
        if let Some(handler) = &self.async_exception_handler {
            call_handler = call_handler.with_async_exception_handler(handler.clone());
        }

        let options = ListenerOptions {
            concurrency: config.listener_concurrency,
            batch_size: config.listener_concurrency,
            poll_wait: config.poll_wait,
            error_backoff: config.poll_wait,
        };

        let mut listeners: Vec<Arc<dyn MessageListener>> = Vec::new();
        listeners.push(Arc::new(
            QueueListener::new(
                format!("{}-calls", config.node_name),
                ListenerRole::Call,
                config.call_queue.clone(),
                transport.clone(),
                Arc::new(CallMessageHandler::new(Arc::new(call_handler))),
            )
            .with_gate(gate.clone())
            .with_options(options.clone()),
        ));
        listeners.push(Arc::new(
            QueueListener::new(
                format!("{}-responses", config.node_name),
                ListenerRole::Response,
                config.response_queue.clone(),
                transport.clone(),
                Arc::new(ResponseMessageHandler::new(gateway.clone())),
            )
            .with_gate(gate.clone())
            .with_options(options.clone()),
        ));
        for definition in self.listeners {
            listeners.push(Arc::new(
                QueueListener::new(
                    definition.name,
                    definition.role,
                    definition.queue,
                    transport.clone(),
                    definition.handler,
                )
                .with_gate(gate.clone())
                .with_options(options.clone()),
            ));
        }

        let lifecycle = Arc::new_cyclic(|weak| {
            let mut system_registry = ServiceRegistry::new();
            system_registry.register(
                "system",
                Arc::new(SystemService::new(Arc::new(SystemNode::new(weak.clone())))),
            );
            let system_handler = CallHandler::new(
                Arc::new(system_registry),
                Arc::new(Responder::new(system_sender.clone())),
                system_sender.clone(),
                config.retry_delay,
                monitor.clone(),
            );
            let system_listener = QueueListener::new(
                format!("{}-system", config.node_name),
                ListenerRole::System,
                config.system_queue.clone(),
                transport.clone(),
                Arc::new(CallMessageHandler::new(Arc::new(system_handler))),
            )
            .with_options(options.clone());

            let mut lifecycle = Lifecycle::new(
                config.node_name.clone(),
                gate.clone(),
                health.clone(),
                monitor.clone(),
            )
            .with_sender(call_sender.clone())
            .with_sender(response_sender.clone())
            .with_shutdown_deadline(config.shutdown_deadline)
            .with_drain_grace(config.drain_grace);
            for listener in listeners {
                lifecycle = lifecycle.with_listener(listener);
            }
            lifecycle.with_listener(Arc::new(system_listener))
        });

        Ok(NodeRuntime {
            config,
            transport,
            gateway,
            responder,
            lifecycle,
        })
    }
}

/// A courier node.
pub struct NodeRuntime {
    config: Config,
    transport: Arc<dyn Transport>,
    gateway: Arc<Gateway>,
    responder: Arc<Responder>,
    lifecycle: Arc<Lifecycle>,
}

impl std::fmt::Debug for NodeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRuntime")
            .field("node_name", &self.config.node_name)
            .field("status", &self.lifecycle.status())
            .finish()
    }
}

impl NodeRuntime {
    pub fn builder() -> NodeRuntimeBuilder {
        NodeRuntimeBuilder::new()
    }

    /// Start consuming. With a staged rollout the node waits in PAUSED for
    /// a `promote` on its system queue.
    pub async fn start(&self) -> Result<()> {
        if self.config.staged_rollout {
            self.lifecycle.enter_paused_state().await?;
            info!(
                node = %self.config.node_name,
                system_queue = %self.config.system_queue,
                "Node paused, awaiting promotion"
            );
        } else {
            self.lifecycle.start_without_rollout().await?;
            info!(
                node = %self.config.node_name,
                call_queue = %self.config.call_queue,
                "Node running"
            );
        }
        Ok(())
    }

    /// Proxy for typed clients. Responses come back on this node's response queue.
    pub fn client(&self) -> ClientProxy {
        ClientProxy::new(
            self.gateway.clone(),
            Some(self.config.response_queue.clone()),
            self.config.max_attempts,
        )
    }

    /// Client for another node's system interface.
    pub fn system_client(&self, system_queue: impl Into<String>) -> SystemClient {
        SystemClient::new(self.client().targeting(system_queue))
    }

    /// Run the full retirement sequence.
    pub async fn shutdown(&self) -> Result<TerminationReport> {
        info!(
            node = %self.config.node_name,
            status = %self.lifecycle.status(),
            "Shutting down node"
        );
        Ok(self.lifecycle.shutdown().await?)
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Responder for resuming suspended calls.
    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn health_report(&self) -> HealthReport {
        self.lifecycle.health_report()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
