// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Service registry: resolves an interface name to one implementation.
//!
//! Resolution order for an interface:
//! 1. an explicit binding made with [`ServiceRegistry::bind`]
//! 2. the only registered implementation
//! 3. the implementation whose name starts with `default` (case-insensitive)
//!
//! Anything else is a configuration error.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use courier_protocol::RemoteError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::context::InvocationContext;
use crate::error::{CoreError, Result};

/// Static description of one remote method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    /// The caller does not wait and no response is sent.
    pub fire_and_forget: bool,
    /// Error types never retried for this method.
    pub immediate_failures: &'static [&'static str],
}

/// Server side of a remote interface.
///
/// Usually generated by `#[remote_interface]` as `<Trait>Service`.
#[async_trait]
pub trait RemoteService: Send + Sync {
    fn interface_name(&self) -> &str;

    fn methods(&self) -> &[MethodDescriptor];

    fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods().iter().find(|m| m.name == name)
    }

    /// Invoke `method` with JSON arguments.
    async fn invoke(
        &self,
        ctx: &InvocationContext,
        method: &str,
        params: Vec<Value>,
    ) -> std::result::Result<Value, RemoteError>;
}

/// Named implementations grouped by interface.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Vec<(String, Arc<dyn RemoteService>)>>,
    bindings: HashMap<String, String>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation under `name`. A second registration with
    /// the same name for the same interface replaces the first.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        service: Arc<dyn RemoteService>,
    ) -> &mut Self {
        let name = name.into();
        let interface = service.interface_name().to_string();
        debug!(interface = %interface, implementation = %name, "Registering service");
        let candidates = self.services.entry(interface).or_default();
        candidates.retain(|(existing, _)| *existing != name);
        candidates.push((name, service));
        self
    }

    /// Route `interface` to the implementation registered as `implementation`.
    pub fn bind(
        &mut self,
        interface: impl Into<String>,
        implementation: impl Into<String>,
    ) -> &mut Self {
        self.bindings.insert(interface.into(), implementation.into());
        self
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.services
            .get(interface)
            .is_some_and(|candidates| !candidates.is_empty())
    }

    /// Registered interface names.
    pub fn interfaces(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// Pick the implementation serving `interface`.
    pub fn resolve(&self, interface: &str) -> Result<(&str, Arc<dyn RemoteService>)> {
        let candidates = self
            .services
            .get(interface)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CoreError::UnknownInterface {
                interface: interface.to_string(),
            })?;

        if let Some(bound) = self.bindings.get(interface) {
            return candidates
                .iter()
                .find(|(name, _)| name == bound)
                .map(|(name, service)| (name.as_str(), service.clone()))
                .ok_or_else(|| CoreError::UnknownImplementation {
                    interface: interface.to_string(),
                    implementation: bound.clone(),
                });
        }

        if let [(name, service)] = candidates.as_slice() {
            return Ok((name.as_str(), service.clone()));
        }

        let mut defaults = candidates
            .iter()
            .filter(|(name, _)| name.to_ascii_lowercase().starts_with("default"));
        match (defaults.next(), defaults.next()) {
            (Some((name, service)), None) => Ok((name.as_str(), service.clone())),
            _ => Err(CoreError::AmbiguousImplementation {
                interface: interface.to_string(),
                candidates: candidates.len(),
            }),
        }
    }
}

/// Decode the argument at `index`. A missing argument decodes from `null`,
/// so optional parameters may be omitted by older callers.
pub fn decode_argument<T: DeserializeOwned>(
    args: &mut impl Iterator<Item = Value>,
    method: &str,
    index: usize,
) -> std::result::Result<T, RemoteError> {
    let value = args.next().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| {
        RemoteError::validation(format!(
            "argument {} of '{}' could not be decoded: {}",
            index, method, e
        ))
    })
}

/// Encode a method's return value.
pub fn encode_return<T: Serialize>(value: &T) -> std::result::Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(|e| {
        RemoteError::new(
            "SerializationError",
            format!("return value could not be encoded: {}", e),
        )
    })
}
