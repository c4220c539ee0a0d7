use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use dlsgate_core::AppError;
use serde::{Deserialize, Serialize};

/// Lifecycle status of the grant attached to an access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Submitted and never approved.
    Pending,
    /// Approved; read access is in effect until expiry.
    Active,
    /// Ended early by an operator.
    Revoked,
    /// Ended by the expiry timer.
    Expired,
}

impl GrantStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl Display for GrantStatus {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for GrantStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            _ => Err(AppError::Validation(format!(
                "unknown grant status '{value}'"
            ))),
        }
    }
}

/// Why an active grant stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationCause {
    /// An operator called revoke.
    Manual,
    /// The grant window elapsed.
    TimerExpiry,
}

impl RevocationCause {
    /// Returns a stable storage value for this cause.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::TimerExpiry => "timer_expiry",
        }
    }
}

impl FromStr for RevocationCause {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "manual" => Ok(Self::Manual),
            "timer_expiry" => Ok(Self::TimerExpiry),
            _ => Err(AppError::Validation(format!(
                "unknown revocation cause '{value}'"
            ))),
        }
    }
}

/// Identity of one grant state, used as the compare-and-set expectation.
///
/// The version increments on every transition, so two revisions with the same
/// status still differ once the grant has been refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantRevision {
    /// Expected stored status.
    pub status: GrantStatus,
    /// Expected stored version.
    pub version: i64,
}

/// Grant state derived from an access request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    status: GrantStatus,
    revocation_cause: Option<RevocationCause>,
    approved_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    version: i64,
}

impl Grant {
    /// Returns the grant state of a freshly submitted request.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: GrantStatus::Pending,
            revocation_cause: None,
            approved_at: None,
            expires_at: None,
            ended_at: None,
            version: 0,
        }
    }

    /// Rebuilds a grant from persisted columns.
    pub fn restore(
        status: GrantStatus,
        revocation_cause: Option<RevocationCause>,
        approved_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
        version: i64,
    ) -> Result<Self, AppError> {
        if version < 0 {
            return Err(AppError::Validation(format!(
                "grant version must not be negative, got {version}"
            )));
        }

        if status == GrantStatus::Active && expires_at.is_none() {
            return Err(AppError::Validation(
                "active grant must carry an expiry timestamp".to_owned(),
            ));
        }

        Ok(Self {
            status,
            revocation_cause,
            approved_at,
            expires_at,
            ended_at,
            version,
        })
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> GrantStatus {
        self.status
    }

    /// Returns why the grant ended, if it has.
    #[must_use]
    pub fn revocation_cause(&self) -> Option<RevocationCause> {
        self.revocation_cause
    }

    /// Returns the last approval timestamp.
    #[must_use]
    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    /// Returns the expiry of the last approval.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Returns when the grant was revoked or expired.
    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Returns the transition counter.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns true when the grant is in effect.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == GrantStatus::Active
    }

    /// Returns the compare-and-set expectation matching this state.
    #[must_use]
    pub fn revision(&self) -> GrantRevision {
        GrantRevision {
            status: self.status,
            version: self.version,
        }
    }

    /// Applies a transition and returns the resulting grant.
    ///
    /// Fails when the transition is not allowed from the current status.
    pub fn apply(&self, transition: GrantTransition) -> Result<Self, AppError> {
        transition.ensure_allowed_from(self.status)?;

        let next = match transition {
            GrantTransition::Activate {
                approved_at,
                expires_at,
            } => Self {
                status: GrantStatus::Active,
                revocation_cause: None,
                approved_at: Some(approved_at),
                expires_at: Some(expires_at),
                ended_at: None,
                version: self.version + 1,
            },
            GrantTransition::Revoke { at } => Self {
                status: GrantStatus::Revoked,
                revocation_cause: Some(RevocationCause::Manual),
                ended_at: Some(at),
                version: self.version + 1,
                ..self.clone()
            },
            GrantTransition::Expire { at } => Self {
                status: GrantStatus::Expired,
                revocation_cause: Some(RevocationCause::TimerExpiry),
                ended_at: Some(at),
                version: self.version + 1,
                ..self.clone()
            },
        };

        Ok(next)
    }
}

/// A requested change of grant state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantTransition {
    /// Approve or re-approve; re-bases the window.
    Activate {
        /// Approval timestamp.
        approved_at: DateTime<Utc>,
        /// End of the grant window.
        expires_at: DateTime<Utc>,
    },
    /// Manual revocation.
    Revoke {
        /// Revocation timestamp.
        at: DateTime<Utc>,
    },
    /// Timer-driven expiry.
    Expire {
        /// Expiry timestamp.
        at: DateTime<Utc>,
    },
}

impl GrantTransition {
    /// Returns the status the grant holds after this transition.
    #[must_use]
    pub fn target_status(&self) -> GrantStatus {
        match self {
            Self::Activate { .. } => GrantStatus::Active,
            Self::Revoke { .. } => GrantStatus::Revoked,
            Self::Expire { .. } => GrantStatus::Expired,
        }
    }

    /// Returns the revocation cause recorded by this transition.
    #[must_use]
    pub fn revocation_cause(&self) -> Option<RevocationCause> {
        match self {
            Self::Activate { .. } => None,
            Self::Revoke { .. } => Some(RevocationCause::Manual),
            Self::Expire { .. } => Some(RevocationCause::TimerExpiry),
        }
    }

    /// Checks the state machine: any status may be activated, only active
    /// grants may end.
    pub fn ensure_allowed_from(&self, current: GrantStatus) -> Result<(), AppError> {
        match self {
            Self::Activate {
                approved_at,
                expires_at,
            } => {
                if expires_at <= approved_at {
                    return Err(AppError::Validation(
                        "grant expiry must be after approval".to_owned(),
                    ));
                }
                Ok(())
            }
            Self::Revoke { .. } | Self::Expire { .. } if current == GrantStatus::Active => Ok(()),
            Self::Revoke { .. } | Self::Expire { .. } => Err(AppError::Validation(format!(
                "cannot move grant from '{current}' to '{}'",
                self.target_status()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{Grant, GrantStatus, GrantTransition, RevocationCause};

    fn activate_at(hour: u32) -> GrantTransition {
        let approved_at = Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).single();
        let approved_at = approved_at.unwrap_or_else(Utc::now);
        GrantTransition::Activate {
            approved_at,
            expires_at: approved_at + Duration::hours(2),
        }
    }

    #[test]
    fn approve_then_expire_records_timer_cause() {
        let active = Grant::pending().apply(activate_at(9));
        assert!(active.is_ok());
        let active = active.unwrap_or_else(|_| Grant::pending());
        assert_eq!(active.status(), GrantStatus::Active);
        assert_eq!(active.version(), 1);

        let expired = active.apply(GrantTransition::Expire { at: Utc::now() });
        assert!(expired.is_ok());
        let expired = expired.unwrap_or_else(|_| Grant::pending());
        assert_eq!(expired.status(), GrantStatus::Expired);
        assert_eq!(expired.revocation_cause(), Some(RevocationCause::TimerExpiry));
        assert_eq!(expired.approved_at(), active.approved_at());
        assert_eq!(expired.version(), 2);
    }

    #[test]
    fn reapproval_rebases_window_and_bumps_version() {
        let first = Grant::pending()
            .apply(activate_at(9))
            .unwrap_or_else(|_| Grant::pending());
        let second = first
            .apply(activate_at(10))
            .unwrap_or_else(|_| Grant::pending());

        assert_eq!(second.status(), GrantStatus::Active);
        assert_eq!(second.version(), 2);
        assert!(second.expires_at() > first.expires_at());
        assert_ne!(first.revision(), second.revision());
    }

    #[test]
    fn pending_grant_cannot_be_revoked() {
        let result = Grant::pending().apply(GrantTransition::Revoke { at: Utc::now() });
        assert!(result.is_err());
    }

    #[test]
    fn ended_grant_can_be_reactivated() {
        let revoked = Grant::pending()
            .apply(activate_at(9))
            .and_then(|grant| grant.apply(GrantTransition::Revoke { at: Utc::now() }))
            .unwrap_or_else(|_| Grant::pending());
        assert_eq!(revoked.revocation_cause(), Some(RevocationCause::Manual));

        let reactivated = revoked.apply(activate_at(11));
        assert!(reactivated.is_ok());
        assert_eq!(
            reactivated.map(|grant| grant.revocation_cause()).ok(),
            Some(None)
        );
    }

    #[test]
    fn restore_rejects_active_without_expiry() {
        let restored = Grant::restore(GrantStatus::Active, None, Some(Utc::now()), None, None, 1);
        assert!(restored.is_err());
    }
}
