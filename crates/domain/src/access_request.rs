use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dlsgate_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

use crate::grant::Grant;

/// Ledger-assigned identifier of an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(i64);

impl RequestId {
    /// Wraps a persisted identifier.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid request id '{value}': {error}")))
    }
}

/// Validated input for submitting an access request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccessRequest {
    username: NonEmptyString,
    index: NonEmptyString,
    ticket_ref: NonEmptyString,
}

impl NewAccessRequest {
    /// Validates a submission.
    ///
    /// The index must be a single pattern: no whitespace and no commas, since
    /// it is placed verbatim into `index_patterns`.
    pub fn new(
        username: impl Into<String>,
        index: impl Into<String>,
        ticket_ref: impl Into<String>,
    ) -> AppResult<Self> {
        let username = NonEmptyString::new(username)
            .map_err(|_| AppError::Validation("username must not be empty".to_owned()))?;
        let index = NonEmptyString::new(index)
            .map_err(|_| AppError::Validation("index must not be empty".to_owned()))?;
        let ticket_ref = NonEmptyString::new(ticket_ref)
            .map_err(|_| AppError::Validation("ticket reference must not be empty".to_owned()))?;

        if index
            .as_str()
            .chars()
            .any(|character| character.is_whitespace() || character == ',')
        {
            return Err(AppError::Validation(format!(
                "index '{}' must be a single pattern without whitespace or commas",
                index.as_str()
            )));
        }

        Ok(Self {
            username,
            index,
            ticket_ref,
        })
    }

    /// Returns the requesting username.
    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_str()
    }

    /// Returns the target index.
    #[must_use]
    pub fn index(&self) -> &str {
        self.index.as_str()
    }

    /// Returns the ticket or incident reference.
    #[must_use]
    pub fn ticket_ref(&self) -> &str {
        self.ticket_ref.as_str()
    }
}

/// An immutable access request as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    id: RequestId,
    username: String,
    index: String,
    ticket_ref: String,
    submitted_at: DateTime<Utc>,
}

impl AccessRequest {
    /// Builds a stored request from a validated submission.
    #[must_use]
    pub fn new(id: RequestId, input: NewAccessRequest, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            username: input.username.into(),
            index: input.index.into(),
            ticket_ref: input.ticket_ref.into(),
            submitted_at,
        }
    }

    /// Rebuilds a stored request from persisted columns.
    #[must_use]
    pub fn restore(
        id: RequestId,
        username: String,
        index: String,
        ticket_ref: String,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            username,
            index,
            ticket_ref,
            submitted_at,
        }
    }

    /// Returns the request identifier.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Returns the requesting username.
    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_str()
    }

    /// Returns the target index.
    #[must_use]
    pub fn index(&self) -> &str {
        self.index.as_str()
    }

    /// Returns the ticket or incident reference.
    #[must_use]
    pub fn ticket_ref(&self) -> &str {
        self.ticket_ref.as_str()
    }

    /// Returns when the request was submitted.
    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

/// A request together with its current grant state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequestRecord {
    /// The immutable request.
    pub request: AccessRequest,
    /// The mutable grant state.
    pub grant: Grant,
}

impl AccessRequestRecord {
    /// Returns the request identifier.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.request.id()
    }
}
