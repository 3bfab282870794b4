//! Per-execution deadline timers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

struct TimerEntry {
    generation: u64,
    deadline: watch::Sender<Instant>,
    handle: JoinHandle<()>,
}

/// Deadline timers keyed by execution id, independent of the processes
/// they guard.
///
/// A timer fires its callback at most once and removes itself when it does.
pub struct TimeoutManager {
    timers: Arc<DashMap<String, TimerEntry>>,
    default_timeout: Duration,
    max_timeout: Duration,
    generation: AtomicU64,
}

impl std::fmt::Debug for TimeoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutManager")
            .field("active", &self.timers.len())
            .field("default_timeout", &self.default_timeout)
            .field("max_timeout", &self.max_timeout)
            .finish()
    }
}

impl TimeoutManager {
    /// `max_timeout` of zero means no upper bound.
    pub fn new(default_timeout: Duration, max_timeout: Duration) -> Self {
        Self {
            timers: Arc::new(DashMap::new()),
            default_timeout,
            max_timeout,
            generation: AtomicU64::new(0),
        }
    }

    /// Substitute the default for zero and clamp to the maximum.
    pub fn resolve(&self, timeout: Duration) -> Duration {
        let timeout = if timeout.is_zero() {
            self.default_timeout
        } else {
            timeout
        };
        if !self.max_timeout.is_zero() && timeout > self.max_timeout {
            self.max_timeout
        } else {
            timeout
        }
    }

    /// Start (or replace) the timer for `id`.
    ///
    /// Returns the duration actually armed. When that is zero no timer is
    /// started and `on_timeout` is dropped.
    pub fn start<F>(&self, id: &str, timeout: Duration, on_timeout: F) -> Duration
    where
        F: FnOnce() + Send + 'static,
    {
        let effective = self.resolve(timeout);
        if effective.is_zero() {
            self.cancel(id);
            return Duration::ZERO;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (deadline_tx, mut deadline_rx) = watch::channel(Instant::now() + effective);
        let (armed_tx, armed_rx) = oneshot::channel::<()>();
        let timers = Arc::clone(&self.timers);
        let key = id.to_string();

        let handle = tokio::spawn(async move {
            // Wait until the entry is in the map so removal below sees it.
            if armed_rx.await.is_err() {
                return;
            }
            loop {
                let deadline = *deadline_rx.borrow_and_update();
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
            if timers
                .remove_if(&key, |_, entry| entry.generation == generation)
                .is_some()
            {
                debug!(id = %key, "execution deadline reached");
                on_timeout();
            }
        });

        let entry = TimerEntry {
            generation,
            deadline: deadline_tx,
            handle,
        };
        if let Some(previous) = self.timers.insert(id.to_string(), entry) {
            previous.handle.abort();
        }
        let _ = armed_tx.send(());
        effective
    }

    /// Stop and discard the timer. Returns whether one was active.
    pub fn cancel(&self, id: &str) -> bool {
        match self.timers.remove(id) {
            Some((_, entry)) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Reset an active timer to fire `duration` from now (clamped like
    /// [`Self::start`]). Returns `false` if no timer is active for `id`.
    pub fn extend(&self, id: &str, duration: Duration) -> bool {
        let Some(entry) = self.timers.get(id) else {
            return false;
        };
        let deadline = Instant::now() + self.resolve(duration);
        entry.deadline.send(deadline).is_ok()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.timers.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for TimeoutManager {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.handle.abort();
        }
    }
}
