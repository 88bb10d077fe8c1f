// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared cancellation state for one scraper run.

use crate::process::ProcessStopHandle;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation context shared between the orchestrator and signal handlers.
///
/// Cloning is cheap; every clone observes the same state.
#[derive(Clone, Default)]
pub struct ScraperContext {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    stopped: AtomicBool,
    child: Mutex<Option<ProcessStopHandle>>,
}

impl ScraperContext {
    /// Create a fresh, running context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Request the run to stop.
    ///
    /// Stops the registered child, or the next one to register.
    pub fn request_stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("stop requested");
        if let Some(child) = self.inner.child.lock().as_ref() {
            child.stop();
        }
    }

    /// Register the running child. Stops it at once if a stop is pending.
    pub fn register(&self, child: ProcessStopHandle) {
        let mut slot = self.inner.child.lock();
        if self.is_stopped() {
            child.stop();
        }
        *slot = Some(child);
    }

    /// Forget the registered child.
    pub fn clear(&self) {
        self.inner.child.lock().take();
    }

    /// Whether a child is registered.
    pub fn has_child(&self) -> bool {
        self.inner.child.lock().is_some()
    }
}
