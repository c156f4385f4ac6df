//! Postgres implementation of the store seam.
//!
//! Tenants live in `mn_company` (hstore `company_kvs`, `company_status`),
//! users in `mn_user` (hstore `user_kvs`), devices in `mn_device`
//! (`device_alert`, `edate`). Connection strings may embed credentials and
//! are never logged.

use crate::routing::{self, AlertTarget, RouteMode, SENTINEL_DEVICE};
use crate::store::{Connection, Connector, Role, StoreError};
use crate::types::{
    API_TOKEN, CredentialRow, NR_ACCOUNT_ID, NR_API_KEY, OWNER_EMAIL_DOMAIN, OWNER_EMAIL_PREFIX,
    TenantStatus,
};
use async_trait::async_trait;
use sqlx::Connection as _;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Row, query};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const PG_RO_CON: &str = "PG_CONNECTION";
pub const PG_RW_CON: &str = "PG_CONNECTION_RW";

const OVERWRITE_ROUTES: &str = r#"
update
  mn_device set
    edate = now(),
    device_alert = $2
where
  device_name = $3
  and strpos(coalesce(device_alert, ''), $1) = 0
  and company_id in (
    select id from mn_company
      where exist(company_kvs, $4) and company_status = $5
  )
"#;

const SELECT_STALE_ROUTES: &str = r#"
select
  id::bigint as id,
  device_alert
from
  mn_device
where
  device_name = $2
  and strpos(coalesce(device_alert, ''), $1) = 0
  and company_id in (
    select id from mn_company
      where exist(company_kvs, $3) and company_status = $4
  )
order by id
for update
"#;

const SET_ROUTE: &str = r#"
update mn_device set edate = now(), device_alert = $2 where id = $1
"#;

const SELECT_CREDENTIALS: &str = r#"
select
  a.id::bigint as id,
  company_kvs -> $1 as api_key,
  company_kvs -> $2 as account_id,
  user_email,
  user_kvs -> $3 as kentik_api
from
    mn_company as a
  join
    mn_user as b
  on (a.id = b.company_id)
where
  exist(company_kvs, $1)
  and company_status = $4
  and user_email like $5
order by a.id
"#;

#[derive(Clone, Debug)]
pub struct PgConnector {
    ro: Option<PgConnectOptions>,
    rw: Option<PgConnectOptions>,
    connect_timeout: Duration,
    statement_timeout: Duration,
}

impl PgConnector {
    /// A role without options fails with [`StoreError::MissingUrl`] when it
    /// is first connected.
    pub fn new(
        ro: Option<PgConnectOptions>,
        rw: Option<PgConnectOptions>,
        connect_timeout: Duration,
        statement_timeout: Duration,
    ) -> Self {
        PgConnector {
            ro,
            rw,
            connect_timeout,
            statement_timeout,
        }
    }

    pub fn from_urls(
        ro_url: Option<&str>,
        rw_url: Option<&str>,
        connect_timeout: Duration,
        statement_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let parse = |role: Role, url: Option<&str>| {
            url.map(PgConnectOptions::from_str)
                .transpose()
                .map_err(|source| StoreError::InvalidUrl { role, source })
        };
        Ok(PgConnector::new(
            parse(Role::ReadOnly, ro_url)?,
            parse(Role::ReadWrite, rw_url)?,
            connect_timeout,
            statement_timeout,
        ))
    }

    /// Reads both connection strings from `PG_CONNECTION` and `PG_CONNECTION_RW`.
    pub fn from_env(
        connect_timeout: Duration,
        statement_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        PgConnector::from_urls(
            read(PG_RO_CON).as_deref(),
            read(PG_RW_CON).as_deref(),
            connect_timeout,
            statement_timeout,
        )
    }

    fn options(&self, role: Role) -> Result<&PgConnectOptions, StoreError> {
        let options = match role {
            Role::ReadOnly => self.ro.as_ref(),
            Role::ReadWrite => self.rw.as_ref(),
        };
        options.ok_or(StoreError::MissingUrl(role))
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Conn = PgStore;

    async fn connect(&self, role: Role) -> Result<PgStore, StoreError> {
        let options = self
            .options(role)?
            .clone()
            .application_name("nrupdate")
            .options([(
                "statement_timeout",
                self.statement_timeout.as_millis().to_string(),
            )]);

        let conn = tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| StoreError::Timeout {
                what: "connect",
                limit: self.connect_timeout,
            })?
            .map_err(|source| StoreError::Connect { role, source })?;

        debug!(%role, "opened postgres connection");

        Ok(PgStore {
            conn,
            role,
            statement_timeout: self.statement_timeout,
        })
    }
}

pub struct PgStore {
    conn: PgConnection,
    role: Role,
    statement_timeout: Duration,
}

/// Client-side bound on a statement, on top of the session `statement_timeout`.
async fn bounded<T, F>(what: &'static str, limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| StoreError::Timeout { what, limit })?
        .map_err(StoreError::from)
}

impl PgStore {
    async fn overwrite_routes(&mut self, target: &AlertTarget) -> Result<u64, StoreError> {
        let result = bounded(
            "alert route update",
            self.statement_timeout,
            query(OVERWRITE_ROUTES)
                .bind(target.as_str())
                .bind(routing::overwrite_route(target))
                .bind(SENTINEL_DEVICE)
                .bind(NR_API_KEY)
                .bind(TenantStatus::VALID_CODE)
                .execute(&mut self.conn),
        )
        .await?;

        Ok(result.rows_affected())
    }

    /// Rewrites each stale route in Rust so prior destinations survive. The
    /// rows stay locked between the scan and the updates.
    async fn merge_routes(&mut self, target: &AlertTarget) -> Result<u64, StoreError> {
        let limit = self.statement_timeout;
        let mut tx = self.conn.begin().await?;

        let stale = bounded(
            "stale route scan",
            limit,
            query(SELECT_STALE_ROUTES)
                .bind(target.as_str())
                .bind(SENTINEL_DEVICE)
                .bind(NR_API_KEY)
                .bind(TenantStatus::VALID_CODE)
                .fetch_all(&mut *tx),
        )
        .await?;

        let mut updated = 0;
        for row in stale {
            let id: i64 = row.try_get("id")?;
            let route: Option<String> = row.try_get("device_alert")?;
            let merged = routing::merge_route(route.as_deref(), target);

            let result = bounded(
                "alert route update",
                limit,
                query(SET_ROUTE).bind(id).bind(merged).execute(&mut *tx),
            )
            .await?;
            updated += result.rows_affected();
        }

        tx.commit().await?;
        Ok(updated)
    }
}

fn decode_credential_row(row: &PgRow) -> Result<CredentialRow, sqlx::Error> {
    Ok(CredentialRow {
        tenant_id: row.try_get("id")?,
        nr_api_key: row.try_get("api_key")?,
        nr_account_id: row.try_get("account_id")?,
        email: row.try_get("user_email")?,
        api_token: row.try_get("kentik_api")?,
    })
}

#[async_trait]
impl Connection for PgStore {
    async fn update_alert_routes(
        &mut self,
        target: &AlertTarget,
        mode: RouteMode,
    ) -> Result<u64, StoreError> {
        if self.role != Role::ReadWrite {
            return Err(StoreError::Other(format!(
                "alert routes cannot be updated over a {} connection",
                self.role
            )));
        }
        match mode {
            RouteMode::Overwrite => self.overwrite_routes(target).await,
            RouteMode::Merge => self.merge_routes(target).await,
        }
    }

    async fn credential_rows(&mut self) -> Result<Vec<CredentialRow>, StoreError> {
        let owner_pattern = format!("{OWNER_EMAIL_PREFIX}%{OWNER_EMAIL_DOMAIN}");

        let rows = bounded(
            "credential query",
            self.statement_timeout,
            query(SELECT_CREDENTIALS)
                .bind(NR_API_KEY)
                .bind(NR_ACCOUNT_ID)
                .bind(API_TOKEN)
                .bind(TenantStatus::VALID_CODE)
                .bind(owner_pattern)
                .fetch_all(&mut self.conn),
        )
        .await?;

        rows.iter()
            .map(decode_credential_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    async fn close(self) -> Result<(), StoreError> {
        debug!(role = %self.role, "closing postgres connection");
        bounded("close", self.statement_timeout, self.conn.close()).await
    }
}
