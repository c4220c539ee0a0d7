//! Grant orchestration: approval, revocation, expiry and recovery.
//!
//! Every transition pushes to the permission store before committing to the
//! ledger. A crash between the two leaves a request externally granted but
//! internally `Pending`, which an operator fixes by approving again; the
//! reverse order could leave a ledger-`Active` grant that was never applied.
//!
//! Within one process, all work on a request runs under that request's lock.
//! The ledger compare-and-set is the guard between processes.

mod request_locks;


use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Duration;
use tracing::{debug, info, warn};

use dlsgate_core::{AppError, AppResult};
use dlsgate_domain::{
    AccessRequestRecord, GrantRevision, GrantTransition, NewAccessRequest, RequestId,
};

use crate::grant_ports::{Clock, GrantLedger, GrantScheduler, PermissionStore};

use self::request_locks::RequestLocks;

/// Fixed grant window policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrantPolicy {
    window: Duration,
}

impl GrantPolicy {
    /// Creates a policy granting access for `window`.
    pub fn new(window: Duration) -> AppResult<Self> {
        if window <= Duration::zero() {
            return Err(AppError::Validation(
                "grant window must be greater than zero".to_owned(),
            ));
        }

        Ok(Self { window })
    }

    /// Returns the grant window.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for GrantPolicy {
    fn default() -> Self {
        Self {
            window: Duration::hours(2),
        }
    }
}

/// Outcome counters of a startup recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Active grants re-applied and re-armed.
    pub rearmed: usize,
    /// Active grants already past expiry and expired.
    pub expired: usize,
    /// Active grants whose re-application failed.
    pub failed: usize,
}

/// Outcome counters of a reconciliation sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Active grants found without a timer and re-armed.
    pub rearmed: usize,
    /// Overdue active grants sent through expiry.
    pub expired: usize,
    /// Active grants whose earlier re-application failed, now pushed again.
    pub reapplied: usize,
}

/// Public entry point for submitting, approving and revoking access.
#[derive(Clone)]
pub struct GrantManager {
    inner: Arc<GrantManagerInner>,
}

struct GrantManagerInner {
    ledger: Arc<dyn GrantLedger>,
    store: Arc<dyn PermissionStore>,
    scheduler: Arc<dyn GrantScheduler>,
    clock: Arc<dyn Clock>,
    policy: GrantPolicy,
    locks: RequestLocks,
    /// Active grants the permission store has not confirmed since startup.
    unapplied: Mutex<BTreeSet<RequestId>>,
}

impl GrantManager {
    /// Creates a grant manager over its collaborators.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn GrantLedger>,
        store: Arc<dyn PermissionStore>,
        scheduler: Arc<dyn GrantScheduler>,
        clock: Arc<dyn Clock>,
        policy: GrantPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(GrantManagerInner {
                ledger,
                store,
                scheduler,
                clock,
                policy,
                locks: RequestLocks::default(),
                unapplied: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    /// Records a new access request in `Pending` state.
    pub async fn submit_request(&self, input: NewAccessRequest) -> AppResult<AccessRequestRecord> {
        let record = self
            .inner
            .ledger
            .create(input, self.inner.clock.now())
            .await?;

        info!(
            request_id = %record.id(),
            username = %record.request.username(),
            index = %record.request.index(),
            ticket_ref = %record.request.ticket_ref(),
            "access request submitted"
        );

        Ok(record)
    }

    /// Returns one request with its grant state.
    pub async fn get_request(&self, request_id: RequestId) -> AppResult<AccessRequestRecord> {
        self.inner.load(request_id).await
    }

    /// Lists every request for display.
    pub async fn list_requests(&self) -> AppResult<Vec<AccessRequestRecord>> {
        self.inner.ledger.list_all().await
    }

    /// Grants read access for the request's window, or re-bases the window of
    /// an already active grant.
    ///
    /// On a permission store failure nothing is written and no timer is armed.
    pub async fn approve(&self, request_id: RequestId) -> AppResult<AccessRequestRecord> {
        let _guard = self.inner.locks.acquire(request_id).await;
        self.inner.approve_locked(request_id).await
    }

    /// Ends an active grant early. Revoking a grant that is not active is a
    /// no-op that returns the current record.
    pub async fn revoke(&self, request_id: RequestId) -> AppResult<AccessRequestRecord> {
        let _guard = self.inner.locks.acquire(request_id).await;
        self.inner.revoke_locked(request_id).await
    }

    /// Re-applies and re-arms every active grant after a restart.
    pub async fn recover(&self) -> AppResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for record in self.inner.ledger.list_all().await? {
            if !record.grant.is_active() {
                continue;
            }

            let request_id = record.id();
            let _guard = self.inner.locks.acquire(request_id).await;
            let Some(record) = self.inner.ledger.get(request_id).await? else {
                continue;
            };
            if !record.grant.is_active() {
                continue;
            }

            if self.inner.is_overdue(&record) {
                self.inner
                    .expire_locked(request_id, record.grant.revision())
                    .await;
                report.expired += 1;
                continue;
            }

            match self
                .inner
                .store
                .grant(request_id, record.request.index(), record.request.username())
                .await
            {
                Ok(()) => {
                    report.rearmed += 1;
                    self.inner.mark_applied(request_id);
                }
                Err(error) => {
                    report.failed += 1;
                    self.inner.mark_unapplied(request_id);
                    warn!(
                        request_id = %request_id,
                        index = %record.request.index(),
                        error = %error,
                        "failed to re-apply active grant during recovery"
                    );
                }
            }

            // Armed either way: expiry must still fire for a grant the store may hold.
            self.inner.arm_expiry(&record);
        }

        info!(
            rearmed = report.rearmed,
            expired = report.expired,
            failed = report.failed,
            "grant recovery finished"
        );

        Ok(report)
    }

    /// Re-arms active grants that lost their timer, expires overdue ones and
    /// re-applies grants the permission store never confirmed.
    ///
    /// This is the retry path for expiries whose revocation call failed and
    /// for recoveries that ran while the store was down.
    pub async fn reconcile(&self) -> AppResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for request_id in self.inner.unapplied_snapshot() {
            let _guard = self.inner.locks.acquire(request_id).await;
            if self.inner.reapply_locked(request_id).await? {
                report.reapplied += 1;
            }
        }

        for record in self.inner.ledger.list_all().await? {
            let request_id = record.id();
            if !record.grant.is_active() || self.inner.scheduler.is_armed(request_id) {
                continue;
            }

            let _guard = self.inner.locks.acquire(request_id).await;
            let Some(record) = self.inner.ledger.get(request_id).await? else {
                continue;
            };
            if !record.grant.is_active() || self.inner.scheduler.is_armed(request_id) {
                continue;
            }

            if self.inner.is_overdue(&record) {
                self.inner
                    .expire_locked(request_id, record.grant.revision())
                    .await;
                report.expired += 1;
            } else {
                self.inner.arm_expiry(&record);
                report.rearmed += 1;
            }
        }

        if report != ReconcileReport::default() {
            info!(
                rearmed = report.rearmed,
                expired = report.expired,
                reapplied = report.reapplied,
                "grant reconciliation sweep repaired grants"
            );
        }

        Ok(report)
    }
}

impl GrantManagerInner {
    fn mark_unapplied(&self, request_id: RequestId) {
        self.unapplied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id);
    }

    fn mark_applied(&self, request_id: RequestId) {
        self.unapplied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);
    }

    fn unapplied_snapshot(&self) -> Vec<RequestId> {
        self.unapplied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Pushes an unconfirmed active grant again. Returns true once the store
    /// accepted it.
    async fn reapply_locked(&self, request_id: RequestId) -> AppResult<bool> {
        let record = match self.ledger.get(request_id).await? {
            Some(record) if record.grant.is_active() => record,
            _ => {
                self.mark_applied(request_id);
                return Ok(false);
            }
        };

        match self
            .store
            .grant(request_id, record.request.index(), record.request.username())
            .await
        {
            Ok(()) => {
                self.mark_applied(request_id);
                info!(
                    request_id = %request_id,
                    index = %record.request.index(),
                    username = %record.request.username(),
                    "active grant re-applied"
                );
                Ok(true)
            }
            Err(error) => {
                warn!(
                    request_id = %request_id,
                    index = %record.request.index(),
                    error = %error,
                    "active grant still not applied; retrying next sweep"
                );
                Ok(false)
            }
        }
    }

    async fn load(&self, request_id: RequestId) -> AppResult<AccessRequestRecord> {
        self.ledger
            .get(request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("access request '{request_id}' not found")))
    }

    fn is_overdue(&self, record: &AccessRequestRecord) -> bool {
        record
            .grant
            .expires_at()
            .is_none_or(|expires_at| expires_at <= self.clock.now())
    }

    async fn approve_locked(
        self: &Arc<Self>,
        request_id: RequestId,
    ) -> AppResult<AccessRequestRecord> {
        let record = self.load(request_id).await?;
        let index = record.request.index();
        let username = record.request.username();

        if let Err(error) = self.store.grant(request_id, index, username).await {
            warn!(
                request_id = %request_id,
                index = %index,
                username = %username,
                error = %error,
                "permission store refused grant; request left unchanged"
            );
            return Err(error.into());
        }
        self.mark_applied(request_id);

        let approved_at = self.clock.now();
        let expires_at = approved_at + self.policy.window();
        let updated = match self
            .ledger
            .set_status(
                request_id,
                record.grant.revision(),
                GrantTransition::Activate {
                    approved_at,
                    expires_at,
                },
            )
            .await
        {
            Ok(updated) => updated,
            Err(error) if error.is_conflict() => {
                warn!(
                    request_id = %request_id,
                    error = %error,
                    "approval lost a concurrent grant transition"
                );
                return self.load(request_id).await;
            }
            Err(error) => return Err(error),
        };

        self.arm_expiry(&updated);

        info!(
            request_id = %request_id,
            index = %index,
            username = %username,
            refreshed = record.grant.is_active(),
            expires_at = %expires_at,
            "access grant approved"
        );

        Ok(updated)
    }

    async fn revoke_locked(
        self: &Arc<Self>,
        request_id: RequestId,
    ) -> AppResult<AccessRequestRecord> {
        self.scheduler.disarm(request_id);

        let record = self.load(request_id).await?;
        if !record.grant.is_active() {
            debug!(
                request_id = %request_id,
                status = %record.grant.status(),
                "revoke on inactive grant is a no-op"
            );
            return Ok(record);
        }

        let index = record.request.index();
        let username = record.request.username();

        if let Err(error) = self.store.clear(request_id, index, username).await {
            self.arm_expiry(&record);
            warn!(
                request_id = %request_id,
                index = %index,
                error = %error,
                "permission store refused revocation; grant stays active"
            );
            return Err(error.into());
        }

        match self
            .ledger
            .set_status(
                request_id,
                record.grant.revision(),
                GrantTransition::Revoke {
                    at: self.clock.now(),
                },
            )
            .await
        {
            Ok(updated) => {
                info!(
                    request_id = %request_id,
                    index = %index,
                    username = %username,
                    "access grant revoked"
                );
                Ok(updated)
            }
            Err(error) if error.is_conflict() => {
                info!(
                    request_id = %request_id,
                    "grant already ended before revocation committed"
                );
                self.load(request_id).await
            }
            Err(error) => {
                self.arm_expiry(&record);
                Err(error)
            }
        }
    }

    fn arm_expiry(self: &Arc<Self>, record: &AccessRequestRecord) {
        let Some(expires_at) = record.grant.expires_at() else {
            return;
        };

        let revision = record.grant.revision();
        let manager = Arc::downgrade(self);
        self.scheduler.arm(
            record.id(),
            expires_at,
            Box::new(move |request_id| {
                Box::pin(async move {
                    if let Some(manager) = manager.upgrade() {
                        manager.expire(request_id, revision).await;
                    }
                })
            }),
        );
    }

    async fn expire(&self, request_id: RequestId, revision: GrantRevision) {
        let _guard = self.locks.acquire(request_id).await;
        self.expire_locked(request_id, revision).await;
    }

    /// Timer path: never returns an error, failures wait for the next sweep.
    async fn expire_locked(&self, request_id: RequestId, revision: GrantRevision) {
        let record = match self.ledger.get(request_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(request_id = %request_id, "expiry fired for unknown request");
                return;
            }
            Err(error) => {
                warn!(
                    request_id = %request_id,
                    error = %error,
                    "failed to load request on expiry; left for reconciliation"
                );
                return;
            }
        };

        if record.grant.revision() != revision {
            debug!(
                request_id = %request_id,
                status = %record.grant.status(),
                "grant moved on before expiry; skipping revocation"
            );
            return;
        }

        let index = record.request.index();
        if let Err(error) = self
            .store
            .clear(request_id, index, record.request.username())
            .await
        {
            warn!(
                request_id = %request_id,
                index = %index,
                error = %error,
                "failed to revoke expired grant; left for reconciliation"
            );
            return;
        }

        match self
            .ledger
            .set_status(
                request_id,
                revision,
                GrantTransition::Expire {
                    at: self.clock.now(),
                },
            )
            .await
        {
            Ok(_) => info!(
                request_id = %request_id,
                index = %index,
                username = %record.request.username(),
                "access grant expired"
            ),
            Err(error) if error.is_conflict() => debug!(
                request_id = %request_id,
                "grant already ended before expiry committed"
            ),
            Err(error) => warn!(
                request_id = %request_id,
                error = %error,
                "failed to record grant expiry; left for reconciliation"
            ),
        }
    }
}
