//! Ports consumed by the grant manager.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use dlsgate_core::{AppResult, PermissionStoreError};
use dlsgate_domain::{
    AccessRequestRecord, GrantRevision, GrantTransition, NewAccessRequest, RequestId,
};

/// Durable record of access requests and their grant state.
#[async_trait]
pub trait GrantLedger: Send + Sync {
    /// Persists a new request in `Pending` state and returns it with its id.
    async fn create(
        &self,
        input: NewAccessRequest,
        submitted_at: DateTime<Utc>,
    ) -> AppResult<AccessRequestRecord>;

    /// Loads one request with its current grant.
    async fn get(&self, request_id: RequestId) -> AppResult<Option<AccessRequestRecord>>;

    /// Applies `transition` only if the stored grant still matches `expected`.
    ///
    /// Returns `AppError::Conflict` when another transition landed first and
    /// `AppError::NotFound` for unknown ids.
    async fn set_status(
        &self,
        request_id: RequestId,
        expected: GrantRevision,
        transition: GrantTransition,
    ) -> AppResult<AccessRequestRecord>;

    /// Lists every request ordered by id.
    async fn list_all(&self) -> AppResult<Vec<AccessRequestRecord>>;
}

/// Client for the external authorization service.
///
/// Both operations are idempotent: repeating a call leaves the external state
/// unchanged and succeeds.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Lets `username` read `index` through the shared role on behalf of
    /// `request_id`. Repeating the call for the same request is a no-op.
    async fn grant(
        &self,
        request_id: RequestId,
        index: &str,
        username: &str,
    ) -> Result<(), PermissionStoreError>;

    /// Withdraws the hold of `request_id` on `username` reading `index`. The
    /// user keeps access while another request still holds the same pair.
    async fn clear(
        &self,
        request_id: RequestId,
        index: &str,
        username: &str,
    ) -> Result<(), PermissionStoreError>;
}

/// Future returned by an expiry callback.
pub type ExpiryFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Work run once when an armed timer fires.
pub type ExpiryCallback = Box<dyn FnOnce(RequestId) -> ExpiryFuture + Send>;

/// Timer set firing one callback per request at its expiry.
pub trait GrantScheduler: Send + Sync {
    /// Schedules `callback` at `fire_at`, replacing any timer armed for the id.
    fn arm(&self, request_id: RequestId, fire_at: DateTime<Utc>, callback: ExpiryCallback);

    /// Cancels the pending timer for the id. Never fails.
    fn disarm(&self, request_id: RequestId);

    /// Returns true while a timer for the id is pending.
    fn is_armed(&self, request_id: RequestId) -> bool;
}

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
