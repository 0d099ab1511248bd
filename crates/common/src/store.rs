use async_trait::async_trait;

use crate::{ChildOrder, ChildOrderSpec, ChildStatus, Result, RunState, StrategyRun};

/// Durable record of every child order of every run.
///
/// Updates are compare-and-set per `(run_id, index)`: an update is applied
/// only if the status it read is still current, so a terminal status can
/// never be overwritten by a concurrent writer.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Insert a slot as `Pending`. Fails with `DuplicateChildOrder` if the
    /// slot already has a record.
    async fn record(&self, run_id: &str, index: u32, spec: &ChildOrderSpec) -> Result<ChildOrder>;

    /// Move a slot to `status`. `venue_order_id` may only be set once.
    async fn update_status(
        &self,
        run_id: &str,
        index: u32,
        status: ChildStatus,
        venue_order_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<ChildOrder>;

    async fn get(&self, run_id: &str, index: u32) -> Result<ChildOrder>;

    /// All recorded slots of a run, ordered by index.
    async fn query(&self, run_id: &str) -> Result<Vec<ChildOrder>>;
}

/// Registry of strategy runs. Runs are never deleted by the engine.
#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn insert_run(&self, run: &StrategyRun) -> Result<()>;

    /// `RunNotFound` if unknown.
    async fn get_run(&self, run_id: &str) -> Result<StrategyRun>;

    async fn list_runs(&self, state: Option<RunState>) -> Result<Vec<StrategyRun>>;

    /// Compare-and-set on the run state. Fails with `AlreadyTerminal` if the
    /// run already reached a terminal state.
    async fn transition_run(
        &self,
        run_id: &str,
        to: RunState,
        reason: Option<&str>,
    ) -> Result<StrategyRun>;
}
