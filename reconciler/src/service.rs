use crate::forwarder_config::ForwarderConfig;
use crate::reconcile::{ReconcileError, Reconciler, RunSummary};
use crate::store::Connector;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{Semaphore, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("a reconciliation run is already in progress")]
    AlreadyRunning,
    #[error("the runner has already been started")]
    AlreadyStarted,
    #[error("the runner is stopped")]
    Stopped,
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

type RunResult = Result<RunSummary, RunnerError>;

struct RunnerInner<C: Connector> {
    reconciler: tokio::sync::Mutex<Reconciler<C>>,
    // The last config that was saved, or the one loaded at startup.
    config: RwLock<Arc<ForwarderConfig>>,
    // Only one run may touch the connections at a time.
    run_lock: Semaphore,
}

impl<C: Connector> RunnerInner<C> {
    async fn run_once(&self, cancel: &CancellationToken) -> RunResult {
        let _permit = self
            .run_lock
            .try_acquire()
            .map_err(|_| RunnerError::AlreadyRunning)?;

        let current = self.config.read().clone();
        let summary = self.reconciler.lock().await.run(&current, cancel).await?;
        *self.config.write() = Arc::new(summary.config.clone());

        Ok(summary)
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

/// Lifecycle wrapper around a [`Reconciler`]. Scheduling is left to whatever
/// starts the process; the runner never repeats a run on its own.
pub struct Runner<C: Connector + 'static> {
    inner: Arc<RunnerInner<C>>,
    worker: Mutex<Option<Worker>>,
}

impl<C: Connector + 'static> Runner<C> {
    pub fn new(reconciler: Reconciler<C>, config: ForwarderConfig) -> Self {
        Runner {
            inner: Arc::new(RunnerInner {
                reconciler: tokio::sync::Mutex::new(reconciler),
                config: RwLock::new(Arc::new(config)),
                run_lock: Semaphore::new(1),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> Arc<ForwarderConfig> {
        self.inner.config.read().clone()
    }

    /// Runs reconciliation on the caller's task. On success the in-memory
    /// config is swapped for the saved one.
    pub async fn run_once(&self) -> RunResult {
        self.inner.run_once(&CancellationToken::new()).await
    }

    /// Spawns one run in the background without waiting for it. The returned
    /// receiver yields that run's result; dropping it is fine.
    pub fn start(&self) -> Result<oneshot::Receiver<RunResult>, RunnerError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(RunnerError::AlreadyStarted);
        }

        let cancel = CancellationToken::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        let handle = tokio::spawn({
            let inner = self.inner.clone();
            let cancel = cancel.clone();
            async move {
                let result = inner.run_once(&cancel).await;
                report(result, reply_tx);
            }
        });

        *worker = Some(Worker { cancel, handle });
        Ok(reply_rx)
    }

    /// Cancels any in-flight run and waits for it to release its
    /// connections. Safe to call more than once, or before `start`.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(Worker { cancel, handle }) = worker {
            if !handle.is_finished() {
                warn!("Stopping during a run, cancelling it");
            }
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Runner worker panicked");
            }
        }
    }
}

fn report(result: RunResult, reply: oneshot::Sender<RunResult>) {
    if let Ok(summary) = &result {
        info!(
            devices_updated = summary.devices_updated,
            credentials = summary.credentials_found,
            tenants = summary.tenants_mapped,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Reconciliation finished"
        );
    }

    // Nobody is waiting on fire-and-forget runs, so their failures end up here.
    if let Err(Err(e)) = reply.send(result) {
        warn!(error = %e, "Reconciliation run did not complete");
    }
}
