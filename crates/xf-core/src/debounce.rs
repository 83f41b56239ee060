//! Trailing-edge debouncer
//!
//! Only the latest scheduled call survives a burst: each `schedule` cancels
//! the pending timer outright and replaces the pending arguments.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

struct Pending<T> {
    generation: u64,
    args: T,
    timer: JoinHandle<()>,
}

type Action<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Delays an action until calls stop arriving for one window
pub struct Debouncer<T: Send + 'static> {
    delay: Duration,
    action: Action<T>,
    pending: Arc<Mutex<Option<Pending<T>>>>,
    generation: AtomicU64,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Create a debouncer running `action` after `delay` of quiet
    pub fn new<F>(delay: Duration, action: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            delay,
            action: Arc::new(action),
            pending: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedule `args` with the default delay
    pub fn schedule(&self, args: T) -> bool {
        self.schedule_after(args, self.delay)
    }

    /// Schedule `args` after `delay`, superseding any pending call.
    ///
    /// Returns `true` when a pending call was replaced. Without a tokio
    /// runtime, or with a zero delay, the action runs immediately.
    pub fn schedule_after(&self, args: T, delay: Duration) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let mut pending = self.pending.lock();
        let superseded = match pending.take() {
            Some(previous) => {
                previous.timer.abort();
                true
            }
            None => false,
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) if !delay.is_zero() => handle,
            Ok(_) => {
                drop(pending);
                (self.action)(args);
                return superseded;
            }
            Err(_) => {
                drop(pending);
                tracing::debug!("No async runtime available, running debounced call immediately");
                (self.action)(args);
                return superseded;
            }
        };

        let slot = Arc::clone(&self.pending);
        let action = Arc::clone(&self.action);
        let timer = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let args = {
                let mut slot = slot.lock();
                let current = slot.as_ref().map(|p| p.generation) == Some(generation);
                if current {
                    slot.take().map(|p| p.args)
                } else {
                    None
                }
            };
            if let Some(args) = args {
                action(args);
            }
        });

        *pending = Some(Pending {
            generation,
            args,
            timer,
        });
        superseded
    }

    /// Run the pending call now instead of waiting for its timer
    pub fn flush(&self) -> bool {
        let pending = self.pending.lock().take();
        match pending {
            Some(p) => {
                p.timer.abort();
                (self.action)(p.args);
                true
            }
            None => false,
        }
    }

    /// Drop the pending call without running it
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(p) => {
                p.timer.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(p) = self.pending.lock().take() {
            p.timer.abort();
        }
    }
}
