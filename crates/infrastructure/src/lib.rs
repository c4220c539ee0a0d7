//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_permission_store;
mod in_memory_grant_ledger;
mod postgres_grant_ledger;

pub use http_permission_store::{
    ClientIdentityPaths, HttpPermissionStore, HttpPermissionStoreConfig,
};
pub use in_memory_grant_ledger::InMemoryGrantLedger;
pub use postgres_grant_ledger::PostgresGrantLedger;
