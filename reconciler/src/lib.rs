//! Keeps synthetic-monitoring alert routing and the alert forwarder's
//! per-tenant credentials in step with the tenant database.
//!
//! One run updates the alert route of every sentinel device owned by an
//! eligible tenant, reads the owner credentials of those tenants, and
//! rewrites the credential sections of the forwarder config.

pub mod forwarder_config;
pub mod metrics_defs;
pub mod postgres;
pub mod reconcile;
pub mod routing;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod testutils;

pub use forwarder_config::{ConfigStore, FilesystemConfigStore, ForwarderConfig};
pub use postgres::PgConnector;
pub use reconcile::{ReconcileError, ReconcileSettings, Reconciler, RunState, RunSummary};
pub use routing::{AlertTarget, RouteMode};
pub use service::{Runner, RunnerError};
