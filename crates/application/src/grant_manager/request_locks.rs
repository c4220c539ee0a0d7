use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use dlsgate_domain::RequestId;

/// One async lock per request id. Entries live only while someone holds or
/// waits for them.
#[derive(Default)]
pub(super) struct RequestLocks {
    locks: Mutex<HashMap<RequestId, Arc<AsyncMutex<()>>>>,
}

/// Exclusive hold on one request. Dropping it releases the lock and forgets
/// the entry when nobody else is waiting.
pub(super) struct RequestGuard<'a> {
    locks: &'a RequestLocks,
    request_id: RequestId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RequestLocks {
    pub(super) async fn acquire(&self, request_id: RequestId) -> RequestGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(request_id).or_default())
        };

        RequestGuard {
            locks: self,
            request_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    pub(super) fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self
            .locks
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.request_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.request_id);
        }
    }
}
