//! PostgreSQL-backed grant ledger using the `access_requests` table.


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use dlsgate_application::GrantLedger;
use dlsgate_core::{AppError, AppResult};
use dlsgate_domain::{
    AccessRequest, AccessRequestRecord, Grant, GrantRevision, GrantStatus, GrantTransition,
    NewAccessRequest, RequestId, RevocationCause,
};

const RECORD_COLUMNS: &str = r#"
    id,
    username,
    index_name,
    ticket_ref,
    submitted_at,
    status,
    revocation_cause,
    approved_at,
    expires_at,
    ended_at,
    grant_version
"#;

/// PostgreSQL implementation of the grant ledger port.
#[derive(Clone)]
pub struct PostgresGrantLedger {
    pool: PgPool,
}

impl PostgresGrantLedger {
    /// Creates a ledger with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn conflict_or_not_found(
        &self,
        request_id: RequestId,
        expected: GrantRevision,
    ) -> AppError {
        let stored = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, grant_version
            FROM access_requests
            WHERE id = $1
            "#,
        )
        .bind(request_id.as_i64())
        .fetch_optional(&self.pool)
        .await;

        match stored {
            Ok(Some((status, version))) => AppError::Conflict(format!(
                "access request '{request_id}' is '{status}' at version {version}, expected '{}' at version {}",
                expected.status, expected.version
            )),
            Ok(None) => AppError::NotFound(format!("access request '{request_id}' not found")),
            Err(error) => AppError::Internal(format!(
                "failed to inspect access request '{request_id}' after lost update: {error}"
            )),
        }
    }
}

#[async_trait]
impl GrantLedger for PostgresGrantLedger {
    async fn create(
        &self,
        input: NewAccessRequest,
        submitted_at: DateTime<Utc>,
    ) -> AppResult<AccessRequestRecord> {
        let row = sqlx::query_as::<_, AccessRequestRow>(&format!(
            r#"
            INSERT INTO access_requests (username, index_name, ticket_ref, submitted_at)
            VALUES ($1, $2, $3, $4)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(input.username())
        .bind(input.index())
        .bind(input.ticket_ref())
        .bind(submitted_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to create access request: {error}")))?;

        row.try_into()
    }

    async fn get(&self, request_id: RequestId) -> AppResult<Option<AccessRequestRecord>> {
        let row = sqlx::query_as::<_, AccessRequestRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM access_requests
            WHERE id = $1
            "#
        ))
        .bind(request_id.as_i64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to load access request '{request_id}': {error}"
            ))
        })?;

        row.map(TryInto::try_into).transpose()
    }

    async fn set_status(
        &self,
        request_id: RequestId,
        expected: GrantRevision,
        transition: GrantTransition,
    ) -> AppResult<AccessRequestRecord> {
        transition.ensure_allowed_from(expected.status)?;

        let (approved_at, expires_at, ended_at) = match transition {
            GrantTransition::Activate {
                approved_at,
                expires_at,
            } => (Some(approved_at), Some(expires_at), None),
            GrantTransition::Revoke { at } | GrantTransition::Expire { at } => {
                (None, None, Some(at))
            }
        };

        // Single conditional UPDATE: the row only changes if nobody moved it.
        let row = sqlx::query_as::<_, AccessRequestRow>(&format!(
            r#"
            UPDATE access_requests
            SET
                status = $4,
                revocation_cause = $5,
                approved_at = COALESCE($6, approved_at),
                expires_at = COALESCE($7, expires_at),
                ended_at = $8,
                grant_version = grant_version + 1
            WHERE id = $1
              AND status = $2
              AND grant_version = $3
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(request_id.as_i64())
        .bind(expected.status.as_str())
        .bind(expected.version)
        .bind(transition.target_status().as_str())
        .bind(transition.revocation_cause().map(|cause| cause.as_str()))
        .bind(approved_at)
        .bind(expires_at)
        .bind(ended_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to update grant status for access request '{request_id}': {error}"
            ))
        })?;

        match row {
            Some(row) => row.try_into(),
            None => Err(self.conflict_or_not_found(request_id, expected).await),
        }
    }

    async fn list_all(&self) -> AppResult<Vec<AccessRequestRecord>> {
        let rows = sqlx::query_as::<_, AccessRequestRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM access_requests
            ORDER BY id
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to list access requests: {error}")))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccessRequestRow {
    id: i64,
    username: String,
    index_name: String,
    ticket_ref: String,
    submitted_at: DateTime<Utc>,
    status: String,
    revocation_cause: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    grant_version: i64,
}

impl TryFrom<AccessRequestRow> for AccessRequestRecord {
    type Error = AppError;

    fn try_from(row: AccessRequestRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<GrantStatus>()?;
        let revocation_cause = row
            .revocation_cause
            .as_deref()
            .map(str::parse::<RevocationCause>)
            .transpose()?;
        let grant = Grant::restore(
            status,
            revocation_cause,
            row.approved_at,
            row.expires_at,
            row.ended_at,
            row.grant_version,
        )?;

        Ok(Self {
            request: AccessRequest::restore(
                RequestId::new(row.id),
                row.username,
                row.index_name,
                row.ticket_ref,
                row.submitted_at,
            ),
            grant,
        })
    }
}
