//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod access_request;
mod grant;
mod permission_rule;

pub use access_request::{AccessRequest, AccessRequestRecord, NewAccessRequest, RequestId};
pub use grant::{Grant, GrantRevision, GrantStatus, GrantTransition, RevocationCause};
pub use permission_rule::{
    DLS_USER_FIELD, IndexPermission, READ_ACTION, RoleDocument, RuleBook, RuleLayout,
    dls_filter_for,
};
