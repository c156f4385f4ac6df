use crate::forwarder_config::{ConfigError, ConfigStore, ForwarderConfig};
use crate::metrics_defs::{CREDENTIALS_FOUND, DEVICES_UPDATED, RUN_DURATION, RUN_FAILURE, RUN_SUCCESS};
use crate::routing::{AlertTarget, RouteMode};
use crate::store::{Connection, Connector, Role, StoreError};
use crate::types::{CredentialSnapshot, DecodeError};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileError {
    #[error("database error: {0}")]
    Store(#[from] StoreError),
    #[error("could not decode credential row: {0}")]
    Decode(#[from] DecodeError),
    #[error("could not save forwarder config: {0}")]
    Config(#[from] ConfigError),
    #[error("run was cancelled")]
    Cancelled,
}

/// Progress of a single run. A run only ever moves forward, or to `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Disconnected,
    ConnectedRo,
    ConnectedRw,
    AlertsUpdated,
    CredentialsLoaded,
    ConfigSaved,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug)]
pub struct ReconcileSettings {
    pub target: AlertTarget,
    pub route_mode: RouteMode,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub devices_updated: u64,
    pub credentials_found: usize,
    pub tenants_mapped: usize,
    pub elapsed: Duration,
    /// The config as saved by this run.
    pub config: ForwarderConfig,
}

/// Runs one reconciliation pass: point sentinel devices at the target, then
/// rebuild the forwarder credentials from the database and save them.
pub struct Reconciler<C: Connector> {
    connector: C,
    config_store: Arc<dyn ConfigStore>,
    settings: ReconcileSettings,
    state: RunState,
}

impl<C: Connector> Reconciler<C> {
    pub fn new(connector: C, config_store: Arc<dyn ConfigStore>, settings: ReconcileSettings) -> Self {
        Reconciler {
            connector,
            config_store,
            settings,
            state: RunState::Disconnected,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn advance(&mut self, next: RunState) {
        debug!(from = %self.state, to = %next, "run state");
        self.state = next;
    }

    /// Runs every step once against `current` and returns the config that was
    /// saved. `current` itself is never modified, so on any error the caller
    /// still holds the last good config.
    ///
    /// Both connections are closed before this returns, whatever the outcome.
    /// Cancelling `cancel` abandons the current step and fails the run with
    /// [`ReconcileError::Cancelled`]; the config is not saved after that.
    pub async fn run(
        &mut self,
        current: &ForwarderConfig,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, ReconcileError> {
        let started = Instant::now();
        self.state = RunState::Disconnected;

        let result = self.run_steps(current, cancel, started).await;

        match &result {
            Ok(summary) => {
                self.advance(RunState::Done);
                crate::counter!(RUN_SUCCESS).increment(1);
                crate::gauge!(DEVICES_UPDATED).set(summary.devices_updated as f64);
                crate::gauge!(CREDENTIALS_FOUND).set(summary.credentials_found as f64);
            }
            Err(e) => {
                error!(state = %self.state, error = %e, "Reconciliation failed");
                self.advance(RunState::Failed);
                crate::counter!(RUN_FAILURE).increment(1);
            }
        }
        crate::histogram!(RUN_DURATION).record(started.elapsed().as_secs_f64());

        result
    }

    async fn run_steps(
        &mut self,
        current: &ForwarderConfig,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<RunSummary, ReconcileError> {
        let mut ro = cancellable(cancel, self.connector.connect(Role::ReadOnly)).await?;
        info!("Connected to PG");
        self.advance(RunState::ConnectedRo);

        let mut rw = match cancellable(cancel, self.connector.connect(Role::ReadWrite)).await {
            Ok(conn) => conn,
            Err(e) => {
                release(Role::ReadOnly, ro).await;
                return Err(e);
            }
        };
        info!("Connected to PG RW");
        self.advance(RunState::ConnectedRw);

        let result = self
            .reconcile(&mut ro, &mut rw, current, cancel, started)
            .await;

        release(Role::ReadWrite, rw).await;
        release(Role::ReadOnly, ro).await;

        result
    }

    async fn reconcile(
        &mut self,
        ro: &mut C::Conn,
        rw: &mut C::Conn,
        current: &ForwarderConfig,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<RunSummary, ReconcileError> {
        let devices_updated = cancellable(cancel, self.update_alerts(rw)).await?;
        self.advance(RunState::AlertsUpdated);

        let snapshot = cancellable(cancel, self.load_credentials(ro)).await?;
        self.advance(RunState::CredentialsLoaded);

        let credentials_found = snapshot.kentik_creds.len();
        let tenants_mapped = snapshot.cred_map.len();
        let next = current.with_credentials(snapshot);
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        self.config_store.store(&next)?;
        self.advance(RunState::ConfigSaved);

        Ok(RunSummary {
            devices_updated,
            credentials_found,
            tenants_mapped,
            elapsed: started.elapsed(),
            config: next,
        })
    }

    /// Sends alerts from every out-of-date sentinel device to the target host.
    async fn update_alerts(&self, rw: &mut C::Conn) -> Result<u64, ReconcileError> {
        let target = &self.settings.target;
        let count = rw
            .update_alert_routes(target, self.settings.route_mode)
            .await?;
        info!(count, %target, mode = %self.settings.route_mode, "Updated {count} alert devices");
        Ok(count)
    }

    async fn load_credentials(&self, ro: &mut C::Conn) -> Result<CredentialSnapshot, ReconcileError> {
        let rows = ro.credential_rows().await?;
        let snapshot = CredentialSnapshot::from_rows(rows)?;
        info!(
            count = snapshot.kentik_creds.len(),
            "Found {} creds to map",
            snapshot.kentik_creds.len()
        );
        Ok(snapshot)
    }
}

/// Drives `step` unless `cancel` fires first, in which case `step` is dropped.
async fn cancellable<T, E, F>(cancel: &CancellationToken, step: F) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ReconcileError>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
        result = step => result.map_err(Into::into),
    }
}

async fn release<T: Connection>(role: Role, conn: T) {
    if let Err(e) = conn.close().await {
        warn!(%role, error = %e, "Failed to close connection");
    }
}
