// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Built-in handlers.

mod test_job;

use std::sync::Arc;
use std::sync::atomic::AtomicU32;

use crate::registry::{Handler, HandlerRegistry};

pub use test_job::TestBackgroundJob;

/// Register the built-in handlers on `registry`.
///
/// Every `TestBackgroundJob` built by this registry shares one call counter,
/// so `intermittentMethod` succeeds on the third attempt of a retry chain.
pub fn register_builtins(registry: &mut HandlerRegistry) {
    let attempts = Arc::new(AtomicU32::new(0));
    registry.register("TestBackgroundJob", TestBackgroundJob::OPERATIONS, move || {
        Ok(Box::new(TestBackgroundJob::with_counter(attempts.clone())) as Box<dyn Handler>)
    });
}
