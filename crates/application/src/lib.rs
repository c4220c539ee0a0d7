//! Application services and ports.

#![forbid(unsafe_code)]

mod grant_manager;
mod grant_ports;
mod grant_scheduler;

pub use grant_manager::{GrantManager, GrantPolicy, ReconcileReport, RecoveryReport};
pub use grant_ports::{
    Clock, ExpiryCallback, ExpiryFuture, GrantLedger, GrantScheduler, PermissionStore,
    SystemClock,
};
pub use grant_scheduler::TokioGrantScheduler;
