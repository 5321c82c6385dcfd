//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Mock ChangeSource with failure injection
//! - The `Item` record type
//! - Subscription helpers
//! - Test log setup

#![allow(dead_code)]

pub mod mock_source;

pub use mock_source::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use table_sync_engine::{LifecycleCallbacks, Subscription};

pub const RESOURCE: &str = "items";

/// Install a log subscriber once. Set `RUST_LOG=table_sync_engine=debug` to see driver logs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let spawned tasks run without moving the paused clock much.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Sorted (id, title) pairs of the visible data.
pub fn titles(sub: &Subscription<Item>) -> Vec<(u64, String)> {
    let mut rows: Vec<(u64, String)> = sub.data().into_iter().map(|i| (i.id, i.title)).collect();
    rows.sort();
    rows
}

/// Callback counters.
#[derive(Default, Clone)]
pub struct CallbackCounts {
    pub connects: Arc<AtomicUsize>,
    pub disconnects: Arc<AtomicUsize>,
    pub errors: Arc<AtomicUsize>,
    pub reconnects: Arc<AtomicUsize>,
}

impl CallbackCounts {
    pub fn callbacks(&self) -> LifecycleCallbacks {
        let (c, d, e, r) = (
            self.connects.clone(),
            self.disconnects.clone(),
            self.errors.clone(),
            self.reconnects.clone(),
        );
        LifecycleCallbacks::new()
            .on_connect(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .on_disconnect(move || {
                d.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                e.fetch_add(1, Ordering::SeqCst);
            })
            .on_reconnect(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
            })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }
}
