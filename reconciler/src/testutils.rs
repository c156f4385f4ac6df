//! In-memory stand-ins for the database and the config file. The database
//! evaluates the same predicates as the SQL statements in `postgres.rs`.

use crate::forwarder_config::{ConfigError, ConfigStore, ForwarderConfig};
use crate::routing::{self, AlertTarget, RouteMode, SENTINEL_DEVICE};
use crate::store::{Connection, Connector, Role, StoreError};
use crate::types::{
    API_TOKEN, Attributes, CredentialRow, NR_ACCOUNT_ID, NR_API_KEY, TenantId, TenantStatus,
    is_owner_email,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Tenant {
    pub id: TenantId,
    pub status: TenantStatus,
    pub attributes: Attributes,
}

impl Tenant {
    fn is_eligible(&self) -> bool {
        self.status.is_valid() && self.attributes.contains(NR_API_KEY)
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: i64,
    pub tenant_id: TenantId,
    pub email: String,
    pub attributes: Attributes,
}

impl User {
    pub fn new(id: i64, tenant_id: TenantId, email: impl Into<String>, api_token: &str) -> Self {
        User {
            id,
            tenant_id,
            email: email.into(),
            attributes: Attributes::new().with(API_TOKEN, api_token),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub tenant_id: TenantId,
    pub alert_route: Option<String>,
    /// Bumped every time the row is written, standing in for `edate`.
    pub edits: u32,
}

impl Device {
    pub fn new(id: i64, name: &str, tenant_id: TenantId, alert_route: Option<&str>) -> Self {
        Device {
            id,
            name: name.into(),
            tenant_id,
            alert_route: alert_route.map(String::from),
            edits: 0,
        }
    }
}

#[derive(Default)]
struct Tables {
    tenants: Vec<Tenant>,
    users: Vec<User>,
    devices: Vec<Device>,
    refused: Vec<Role>,
    update_error: Option<String>,
    stall_credentials: bool,
    connections_opened: usize,
    open_connections: usize,
    credential_queries: usize,
}

impl Tables {
    fn eligible(&self, tenant_id: TenantId) -> bool {
        self.tenants
            .iter()
            .any(|t| t.id == tenant_id && t.is_eligible())
    }
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDatabase {
    pub fn insert_tenant(&self, tenant: Tenant) {
        self.tables.lock().tenants.push(tenant);
    }

    pub fn insert_user(&self, user: User) {
        self.tables.lock().users.push(user);
    }

    pub fn insert_device(&self, device: Device) {
        self.tables.lock().devices.push(device);
    }

    pub fn set_tenant_status(&self, tenant_id: TenantId, status: TenantStatus) {
        let mut tables = self.tables.lock();
        for tenant in tables.tenants.iter_mut().filter(|t| t.id == tenant_id) {
            tenant.status = status.clone();
        }
    }

    pub fn device_route(&self, device_id: i64) -> Option<String> {
        self.device(device_id).alert_route
    }

    pub fn device_edits(&self, device_id: i64) -> u32 {
        self.device(device_id).edits
    }

    fn device(&self, device_id: i64) -> Device {
        self.tables
            .lock()
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .cloned()
            .expect("device exists")
    }

    pub fn refuse_connections(&self, role: Role) {
        self.tables.lock().refused.push(role);
    }

    pub fn fail_updates(&self, message: &str) {
        self.tables.lock().update_error = Some(message.to_string());
    }

    /// Credential queries are counted and then never return.
    pub fn stall_credential_queries(&self) {
        self.tables.lock().stall_credentials = true;
    }

    pub fn connections_opened(&self) -> usize {
        self.tables.lock().connections_opened
    }

    pub fn open_connections(&self) -> usize {
        self.tables.lock().open_connections
    }

    pub fn credential_queries(&self) -> usize {
        self.tables.lock().credential_queries
    }
}

#[async_trait]
impl Connector for MemoryDatabase {
    type Conn = MemoryConnection;

    async fn connect(&self, role: Role) -> Result<MemoryConnection, StoreError> {
        let mut tables = self.tables.lock();
        if tables.refused.contains(&role) {
            return Err(StoreError::Other(format!("{role} connection refused")));
        }
        tables.connections_opened += 1;
        tables.open_connections += 1;
        Ok(MemoryConnection {
            tables: self.tables.clone(),
        })
    }
}

pub struct MemoryConnection {
    tables: Arc<Mutex<Tables>>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn update_alert_routes(
        &mut self,
        target: &AlertTarget,
        mode: RouteMode,
    ) -> Result<u64, StoreError> {
        let mut guard = self.tables.lock();
        if let Some(message) = &guard.update_error {
            return Err(StoreError::Other(message.clone()));
        }

        let tables = &mut *guard;
        let mut updated = 0;
        for device in tables.devices.iter_mut() {
            let eligible = tables
                .tenants
                .iter()
                .any(|t| t.id == device.tenant_id && t.is_eligible());
            if device.name == SENTINEL_DEVICE
                && eligible
                && routing::needs_update(device.alert_route.as_deref(), target)
            {
                device.alert_route = Some(routing::rewrite_route(
                    mode,
                    device.alert_route.as_deref(),
                    target,
                ));
                device.edits += 1;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn credential_rows(&mut self) -> Result<Vec<CredentialRow>, StoreError> {
        let stall = {
            let mut tables = self.tables.lock();
            tables.credential_queries += 1;
            tables.stall_credentials
        };
        if stall {
            std::future::pending::<()>().await;
        }

        let tables = self.tables.lock();
        let mut rows: Vec<(TenantId, i64, CredentialRow)> = Vec::new();
        for user in &tables.users {
            if !tables.eligible(user.tenant_id) || !is_owner_email(&user.email) {
                continue;
            }
            let Some(tenant) = tables.tenants.iter().find(|t| t.id == user.tenant_id) else {
                continue;
            };
            rows.push((
                tenant.id,
                user.id,
                CredentialRow {
                    tenant_id: tenant.id,
                    nr_api_key: tenant.attributes.get(NR_API_KEY).map(String::from),
                    nr_account_id: tenant.attributes.get(NR_ACCOUNT_ID).map(String::from),
                    email: Some(user.email.clone()),
                    api_token: user.attributes.get(API_TOKEN).map(String::from),
                },
            ));
        }
        // Postgres leaves ties unordered; user id keeps the fake deterministic.
        rows.sort_by_key(|(tenant_id, user_id, _)| (*tenant_id, *user_id));
        Ok(rows.into_iter().map(|(_, _, row)| row).collect())
    }

    async fn close(self) -> Result<(), StoreError> {
        self.tables.lock().open_connections -= 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryConfigStore {
    current: Mutex<ForwarderConfig>,
    saved: Mutex<Vec<ForwarderConfig>>,
    fail: Mutex<bool>,
}

impl MemoryConfigStore {
    pub fn with_config(config: ForwarderConfig) -> Self {
        MemoryConfigStore {
            current: Mutex::new(config),
            ..Default::default()
        }
    }

    pub fn saved(&self) -> Vec<ForwarderConfig> {
        self.saved.lock().clone()
    }

    pub fn fail_saves(&self) {
        *self.fail.lock() = true;
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<ForwarderConfig, ConfigError> {
        Ok(self.current.lock().clone())
    }

    fn store(&self, config: &ForwarderConfig) -> Result<(), ConfigError> {
        if *self.fail.lock() {
            return Err(ConfigError::Io {
                path: "memory".into(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        *self.current.lock() = config.clone();
        self.saved.lock().push(config.clone());
        Ok(())
    }
}
