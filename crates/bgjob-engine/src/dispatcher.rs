// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Invocation validation and dispatch.
//!
//! Resolves a handler by name and checks the requested operation is declared
//! public. Only then is a fresh instance built and the operation invoked; an
//! error from either step is an execution failure, not an invalid
//! invocation. The dispatcher never writes logs; the retry loop records what
//! happened.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::registry::{Handler, HandlerError, HandlerFactory, HandlerRegistry, InvocationError};

/// Resolves and invokes handler operations.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// The registry handlers are resolved from.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Check that `handler` is registered and declares `operation` as public.
    ///
    /// Nothing is built here; see [`PreparedInvocation::invoke`].
    pub fn validate(
        &self,
        handler: &str,
        operation: &str,
    ) -> Result<PreparedInvocation, InvocationError> {
        let op = self.registry.resolve(handler, operation)?;

        Ok(PreparedInvocation {
            handler: handler.to_string(),
            operation: op.name,
            factory: self.registry.factory(handler)?,
        })
    }
}

/// A validated handler bound to one operation.
pub struct PreparedInvocation {
    handler: String,
    operation: &'static str,
    factory: HandlerFactory,
}

impl PreparedInvocation {
    /// Handler name.
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Operation name.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Build a fresh instance and run the operation on it.
    ///
    /// The returned value is informational only; success means neither the
    /// factory nor the operation failed.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value, HandlerError> {
        let instance: Box<dyn Handler> = (self.factory)()?;
        instance.invoke(self.operation, args).await
    }
}

impl fmt::Debug for PreparedInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedInvocation")
            .field("handler", &self.handler)
            .field("operation", &self.operation)
            .finish()
    }
}
