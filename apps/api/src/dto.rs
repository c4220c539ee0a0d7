use chrono::{DateTime, Utc};
use dlsgate_domain::AccessRequestRecord;
use serde::{Deserialize, Serialize};

/// Health response payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ledger: HealthDependencyStatus,
}

/// Status of one dependency checked by the health endpoint.
#[derive(Debug, Serialize)]
pub struct HealthDependencyStatus {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Incoming payload for submitting an access request.
#[derive(Debug, Deserialize)]
pub struct SubmitAccessRequest {
    pub username: String,
    pub index: String,
    pub ticket_ref: String,
}

/// API representation of an access request and its grant.
#[derive(Debug, Serialize)]
pub struct AccessRequestResponse {
    pub id: i64,
    pub username: String,
    pub index: String,
    pub ticket_ref: String,
    pub submitted_at: DateTime<Utc>,
    pub status: String,
    pub revocation_cause: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<AccessRequestRecord> for AccessRequestResponse {
    fn from(record: AccessRequestRecord) -> Self {
        let AccessRequestRecord { request, grant } = record;
        Self {
            id: request.id().as_i64(),
            username: request.username().to_owned(),
            index: request.index().to_owned(),
            ticket_ref: request.ticket_ref().to_owned(),
            submitted_at: request.submitted_at(),
            status: grant.status().as_str().to_owned(),
            revocation_cause: grant
                .revocation_cause()
                .map(|cause| cause.as_str().to_owned()),
            approved_at: grant.approved_at(),
            expires_at: grant.expires_at(),
            ended_at: grant.ended_at(),
        }
    }
}
