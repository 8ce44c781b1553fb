//! In-process broker and partitioned log.
//!
//! Used by the server binary for local runs and by the engine tests.

mod broker;
mod log;
mod scripted;

pub use broker::{MemoryBroker, MemoryChannelProvider, MemoryPublisher, MemorySubscriber};
pub use log::{MemoryLog, MemoryLogConfig};
pub use scripted::{ManualPublisher, ScriptedSubscriber};

use std::sync::{Mutex, MutexGuard};

/// Lock with poison recovery: a panicked test thread must not wedge the rest.
fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = what, "lock poisoned, recovering");
        poisoned.into_inner()
    })
}
