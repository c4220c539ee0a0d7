use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use dlsgate_application::GrantLedger;
use dlsgate_core::{AppError, AppResult};
use dlsgate_domain::{
    AccessRequest, AccessRequestRecord, Grant, GrantRevision, GrantTransition, NewAccessRequest,
    RequestId,
};

/// Non-durable grant ledger kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryGrantLedger {
    state: RwLock<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    last_id: i64,
    records: BTreeMap<RequestId, AccessRequestRecord>,
}

impl InMemoryGrantLedger {
    /// Creates an empty in-memory ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GrantLedger for InMemoryGrantLedger {
    async fn create(
        &self,
        input: NewAccessRequest,
        submitted_at: DateTime<Utc>,
    ) -> AppResult<AccessRequestRecord> {
        let mut state = self.state.write().await;
        state.last_id += 1;

        let record = AccessRequestRecord {
            request: AccessRequest::new(RequestId::new(state.last_id), input, submitted_at),
            grant: Grant::pending(),
        };
        state.records.insert(record.id(), record.clone());

        Ok(record)
    }

    async fn get(&self, request_id: RequestId) -> AppResult<Option<AccessRequestRecord>> {
        Ok(self.state.read().await.records.get(&request_id).cloned())
    }

    async fn set_status(
        &self,
        request_id: RequestId,
        expected: GrantRevision,
        transition: GrantTransition,
    ) -> AppResult<AccessRequestRecord> {
        let mut state = self.state.write().await;
        let record = state.records.get_mut(&request_id).ok_or_else(|| {
            AppError::NotFound(format!("access request '{request_id}' not found"))
        })?;

        let stored = record.grant.revision();
        if stored != expected {
            return Err(AppError::Conflict(format!(
                "access request '{request_id}' is '{}' at version {}, expected '{}' at version {}",
                stored.status, stored.version, expected.status, expected.version
            )));
        }

        record.grant = record.grant.apply(transition)?;
        Ok(record.clone())
    }

    async fn list_all(&self) -> AppResult<Vec<AccessRequestRecord>> {
        Ok(self.state.read().await.records.values().cloned().collect())
    }
}
