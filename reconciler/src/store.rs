use crate::routing::{AlertTarget, RouteMode};
use crate::types::CredentialRow;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::ReadOnly => f.write_str("read-only"),
            Role::ReadWrite => f.write_str("read-write"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("no connection string configured for {0} connection")]
    MissingUrl(Role),
    #[error("invalid connection string for {role} connection: {source}")]
    InvalidUrl {
        role: Role,
        #[source]
        source: sqlx::Error,
    },
    #[error("could not open {role} connection: {source}")]
    Connect {
        role: Role,
        #[source]
        source: sqlx::Error,
    },
    #[error("statement failed: {0}")]
    Statement(#[from] sqlx::Error),
    #[error("{what} did not finish within {limit:?}")]
    Timeout { what: &'static str, limit: Duration },
    #[error("{0}")]
    Other(String),
}

/// Opens the connections a run needs. Each call returns a fresh,
/// unpooled connection.
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    async fn connect(&self, role: Role) -> Result<Self::Conn, StoreError>;
}

#[async_trait]
pub trait Connection: Send {
    /// Points every out-of-date sentinel device of an eligible tenant at
    /// `target`. Returns the number of devices rewritten.
    async fn update_alert_routes(
        &mut self,
        target: &AlertTarget,
        mode: RouteMode,
    ) -> Result<u64, StoreError>;

    /// Owner credentials of every eligible tenant, ordered by tenant id.
    async fn credential_rows(&mut self) -> Result<Vec<CredentialRow>, StoreError>;

    async fn close(self) -> Result<(), StoreError>
    where
        Self: Sized;
}
