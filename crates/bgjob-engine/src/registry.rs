// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Handler registry.
//!
//! Handlers are resolved by name at runtime. Each name maps to the list of
//! operations the handler declares and a factory that builds a fresh
//! instance. Operations are checked against the declared list before any
//! instance is built; building and running happen inside the attempt, so a
//! failing factory is an ordinary, retried failure.
//!
//! Static registration goes through the `inventory` crate so any crate linked
//! into the binary can contribute handlers:
//!
//! ```ignore
//! use bgjob_engine::register_handler;
//!
//! fn build_mailer() -> Result<Box<dyn Handler>, HandlerError> {
//!     Ok(Box::new(Mailer::default()))
//! }
//!
//! register_handler!("Mailer", Mailer::OPERATIONS, build_mailer);
//! ```
//!
//! Tests and embedders can also register closures on a
//! [`HandlerRegistry`] directly, which lets a factory capture shared state.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;
use thiserror::Error;

/// Whether an operation may be invoked by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Callable through the dispatcher.
    Public,
    /// Known to the handler but not callable from outside.
    Private,
}

/// An operation a handler knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    /// Operation name as used in invocation requests (e.g., "simpleMethod")
    pub name: &'static str,
    /// Visibility of the operation
    pub visibility: Visibility,
}

impl Operation {
    /// A callable operation.
    pub const fn public(name: &'static str) -> Self {
        Self {
            name,
            visibility: Visibility::Public,
        }
    }

    /// An operation that exists but cannot be invoked.
    pub const fn private(name: &'static str) -> Self {
        Self {
            name,
            visibility: Visibility::Private,
        }
    }

    /// Whether the engine may invoke this operation.
    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

/// Error raised by a handler while being built or while running an operation.
///
/// The source location is captured where the error is constructed, so
/// error records can point at the failing code.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Human-readable message.
    pub message: String,
    /// Application-defined error code (0 when unspecified).
    pub code: i64,
    /// Source file the error was raised in.
    pub file: String,
    /// Source line the error was raised at.
    pub line: u32,
}

impl HandlerError {
    /// Create an error with code 0 at the caller's location.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        Self::at(message.into(), 0, Location::caller())
    }

    /// Create an error with an explicit code at the caller's location.
    #[track_caller]
    pub fn with_code(message: impl Into<String>, code: i64) -> Self {
        Self::at(message.into(), code, Location::caller())
    }

    fn at(message: String, code: i64, location: &Location<'_>) -> Self {
        Self {
            message,
            code,
            file: location.file().to_string(),
            line: location.line(),
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<std::io::Error> for HandlerError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        let code = err.raw_os_error().map(i64::from).unwrap_or(0);
        Self::with_code(err.to_string(), code)
    }
}

/// Reasons an invocation is rejected before anything runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvocationError {
    /// No factory is registered under this name.
    #[error("Handler is not registered: {0}")]
    UnknownHandler(String),

    /// The handler has no operation with this name.
    #[error("Method does not exist: {handler}::{operation}")]
    OperationNotFound {
        /// Handler name.
        handler: String,
        /// Requested operation.
        operation: String,
    },

    /// The operation exists but is private.
    #[error("Method is not public: {handler}::{operation}")]
    OperationNotPublic {
        /// Handler name.
        handler: String,
        /// Requested operation.
        operation: String,
    },
}

/// A named unit of behavior that owns invocable operations.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Run `operation` with positional arguments.
    ///
    /// Only called for operations declared public at registration.
    async fn invoke(&self, operation: &str, args: Vec<Value>) -> Result<Value, HandlerError>;
}

/// Factory producing a fresh handler instance.
pub type HandlerFactory = Arc<dyn Fn() -> Result<Box<dyn Handler>, HandlerError> + Send + Sync>;

/// Static handler registration - submitted via [`register_handler!`].
pub struct HandlerRegistration {
    /// Name the handler is resolved by.
    pub name: &'static str,
    /// Every operation the handler knows about, public or not.
    pub operations: &'static [Operation],
    /// Builds a handler instance.
    pub factory: fn() -> Result<Box<dyn Handler>, HandlerError>,
}

inventory::collect!(HandlerRegistration);

/// Register a handler under a name at link time.
///
/// `$operations` is a `&'static [Operation]`; the factory must be a path to a
/// `fn() -> Result<Box<dyn Handler>, HandlerError>`.
#[macro_export]
macro_rules! register_handler {
    ($name:expr, $operations:expr, $factory:path) => {
        $crate::inventory::submit! {
            $crate::registry::HandlerRegistration {
                name: $name,
                operations: $operations,
                factory: $factory,
            }
        }
    };
}

#[derive(Clone)]
struct HandlerEntry {
    operations: &'static [Operation],
    factory: HandlerFactory,
}

/// Map of handler names to declared operations and factories.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every handler submitted with [`register_handler!`].
    pub fn from_inventory() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<HandlerRegistration> {
            registry.register(
                registration.name,
                registration.operations,
                registration.factory,
            );
        }
        registry
    }

    /// Inventory handlers plus the built-in ones from [`crate::handlers`].
    ///
    /// This is the registry the `bgjob` binary runs with.
    pub fn with_builtins() -> Self {
        let mut registry = Self::from_inventory();
        crate::handlers::register_builtins(&mut registry);
        registry
    }

    /// Register (or replace) a handler under `name`.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        operations: &'static [Operation],
        factory: F,
    ) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn Handler>, HandlerError> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            HandlerEntry {
                operations,
                factory: Arc::new(factory),
            },
        );
        self
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Operations declared by the named handler.
    pub fn operations(&self, name: &str) -> Result<&'static [Operation], InvocationError> {
        self.entry(name).map(|entry| entry.operations)
    }

    /// Check that `handler` declares `operation` as public, without building
    /// an instance.
    pub fn resolve(
        &self,
        handler: &str,
        operation: &str,
    ) -> Result<&'static Operation, InvocationError> {
        let op = self
            .operations(handler)?
            .iter()
            .find(|op| op.name == operation)
            .ok_or_else(|| InvocationError::OperationNotFound {
                handler: handler.to_string(),
                operation: operation.to_string(),
            })?;

        if !op.is_public() {
            return Err(InvocationError::OperationNotPublic {
                handler: handler.to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(op)
    }

    /// Factory of the named handler.
    pub fn factory(&self, name: &str) -> Result<HandlerFactory, InvocationError> {
        self.entry(name).map(|entry| entry.factory.clone())
    }

    fn entry(&self, name: &str) -> Result<&HandlerEntry, InvocationError> {
        self.entries
            .get(name)
            .ok_or_else(|| InvocationError::UnknownHandler(name.to_string()))
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}
