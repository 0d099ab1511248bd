use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use common::{EngineConfig, ExchangeGateway, OrderLedger, RunRepository, Validator};

use crate::reconcile::ReconciliationLoop;
use crate::scheduler::ExecutionScheduler;

/// Cloneable handle passed to the operator API.
#[derive(Clone)]
pub struct EngineHandle {
    scheduler: ExecutionScheduler,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl EngineHandle {
    pub fn scheduler(&self) -> &ExecutionScheduler {
        &self.scheduler
    }

    /// Ask the engine to stop. `Engine::run` returns once every worker exited.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// The execution engine: resumes interrupted runs, then reconciles the
/// ledger against the venue until shut down.
pub struct Engine {
    scheduler: ExecutionScheduler,
    reconciler: ReconciliationLoop,
    shutdown_rx: watch::Receiver<bool>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn ExchangeGateway>,
        validator: Arc<dyn Validator>,
        ledger: Arc<dyn OrderLedger>,
        runs: Arc<dyn RunRepository>,
    ) -> (Self, EngineHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler = ExecutionScheduler::new(config, gateway, validator, ledger, runs);

        let handle = EngineHandle {
            scheduler: scheduler.clone(),
            shutdown_tx: Arc::new(shutdown_tx),
        };

        let engine = Engine {
            reconciler: ReconciliationLoop::new(scheduler.clone()),
            scheduler,
            shutdown_rx,
        };

        (engine, handle)
    }

    /// Run the engine. Call from `tokio::spawn`.
    pub async fn run(self) {
        match self.scheduler.resume().await {
            Ok(resumed) => info!(resumed, "Engine started"),
            Err(e) => error!(error = %e, "Failed to resume runs from the ledger"),
        }

        self.reconciler.run(self.shutdown_rx).await;

        info!("Engine stopping, waiting for run workers");
        self.scheduler.shutdown().await;
        info!("Engine stopped");
    }
}
