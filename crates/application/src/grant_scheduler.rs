//! Tokio timer set for grant expiry.
//!
//! Each armed request owns one spawned task that sleeps until its deadline.
//! A task only runs its callback after removing its own entry from the timer
//! map, and only if that entry still carries the generation it was spawned
//! with. Disarm and re-arm both replace the entry under the same lock, so for
//! any timer exactly one of "callback runs" or "cancel takes effect" happens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

use dlsgate_domain::RequestId;

use crate::grant_ports::{Clock, ExpiryCallback, GrantScheduler};

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

type TimerMap = HashMap<RequestId, ArmedTimer>;

/// Grant scheduler running every timer as a tokio task.
pub struct TokioGrantScheduler {
    clock: Arc<dyn Clock>,
    timers: Arc<Mutex<TimerMap>>,
    next_generation: AtomicU64,
}

impl TokioGrantScheduler {
    /// Creates an empty scheduler. Deadlines are measured against `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn armed_count(&self) -> usize {
        lock_timers(&self.timers).len()
    }
}

fn lock_timers(timers: &Mutex<TimerMap>) -> MutexGuard<'_, TimerMap> {
    timers.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GrantScheduler for TokioGrantScheduler {
    fn arm(&self, request_id: RequestId, fire_at: DateTime<Utc>, callback: ExpiryCallback) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = (fire_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let shared_timers = Arc::clone(&self.timers);

        // Held across spawn so the task cannot look itself up before insertion.
        let mut timers = lock_timers(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let claimed = {
                let mut timers = lock_timers(&shared_timers);
                match timers.get(&request_id) {
                    Some(armed) if armed.generation == generation => {
                        timers.remove(&request_id);
                        true
                    }
                    _ => false,
                }
            };

            if claimed {
                debug!(request_id = %request_id, "grant expiry timer fired");
                callback(request_id).await;
            }
        });

        if let Some(previous) = timers.insert(request_id, ArmedTimer { generation, handle }) {
            previous.handle.abort();
            debug!(request_id = %request_id, "replaced pending grant expiry timer");
        }

        debug!(
            request_id = %request_id,
            fire_at = %fire_at,
            delay_seconds = delay.as_secs(),
            "armed grant expiry timer"
        );
    }

    fn disarm(&self, request_id: RequestId) {
        if let Some(armed) = lock_timers(&self.timers).remove(&request_id) {
            armed.handle.abort();
            debug!(request_id = %request_id, "disarmed grant expiry timer");
        }
    }

    fn is_armed(&self, request_id: RequestId) -> bool {
        lock_timers(&self.timers).contains_key(&request_id)
    }
}

impl Drop for TokioGrantScheduler {
    fn drop(&mut self) {
        for (_, armed) in lock_timers(&self.timers).drain() {
            armed.handle.abort();
        }
    }
}
