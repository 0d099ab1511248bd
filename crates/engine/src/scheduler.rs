use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use common::{
    CancelSummary, ChildCounts, ChildOrder, ChildStatus, EngineConfig, Error, ExchangeGateway,
    OrderAck, OrderLedger, OrderRef, OrderRequest, OrderType, Result, RunRepository, RunState,
    RunStatus, StrategyKind, StrategyParams, StrategyRun, Validator,
};

use crate::executor::{ChildOrderExecutor, SlotOutcome};

/// Trailing-stop callback rate bounds accepted by USDT-M Futures, in percent.
const CALLBACK_RATE_MIN: f64 = 0.1;
const CALLBACK_RATE_MAX: f64 = 10.0;

/// Owns the lifecycle of every run: validation, planning, the per-run
/// worker that fires slots, cancellation and terminal-state evaluation.
///
/// Cheap to clone; all clones drive the same set of workers.
#[derive(Clone)]
pub struct ExecutionScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    gateway: Arc<dyn ExchangeGateway>,
    validator: Arc<dyn Validator>,
    ledger: Arc<dyn OrderLedger>,
    runs: Arc<dyn RunRepository>,
    executor: ChildOrderExecutor,
    workers: Mutex<HashMap<String, RunWorker>>,
    /// One lock per live run, held by cancel sweeps and terminal-state
    /// evaluation. Only one of them decides how a run ends.
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

struct RunWorker {
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExecutionScheduler {
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn ExchangeGateway>,
        validator: Arc<dyn Validator>,
        ledger: Arc<dyn OrderLedger>,
        runs: Arc<dyn RunRepository>,
    ) -> Self {
        let executor = ChildOrderExecutor::new(gateway.clone(), ledger.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                gateway,
                validator,
                ledger,
                runs,
                executor,
                workers: Mutex::new(HashMap::new()),
                run_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn ExchangeGateway> {
        &self.inner.gateway
    }

    pub(crate) fn ledger(&self) -> &Arc<dyn OrderLedger> {
        &self.inner.ledger
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    /// Validate, plan and launch a run. Returns the new run id.
    ///
    /// Nothing is persisted when validation or planning fails.
    pub async fn start(&self, params: StrategyParams) -> Result<String> {
        let params = normalize(params);

        let errors = strategy::check_params(&params);
        if !errors.is_empty() {
            return Err(Error::InvalidParameters(errors));
        }
        let errors = self.venue_checks(&params);
        if !errors.is_empty() {
            return Err(Error::InvalidParameters(errors));
        }

        let precision = self.inner.validator.price_precision(params.symbol());
        let plan = strategy::build_plan(&params, Utc::now(), Some(precision))?;
        let run = StrategyRun::new(params, plan, Utc::now());

        self.inner.runs.insert_run(&run).await?;
        for spec in &run.plan {
            self.inner.ledger.record(&run.run_id, spec.index, spec).await?;
        }
        let run = self
            .inner
            .runs
            .transition_run(&run.run_id, RunState::Running, None)
            .await?;

        info!(
            run_id = %run.run_id,
            kind = %run.kind,
            symbol = %run.symbol(),
            slots = run.plan.len(),
            "Run started"
        );

        let run_id = run.run_id.clone();
        self.spawn_worker(run).await;
        Ok(run_id)
    }

    /// Stop a run: withdraw slots that have not fired, cancel acknowledged
    /// orders at the venue and mark the run CANCELLED.
    ///
    /// Slots caught mid-submission are left to their worker, which cancels
    /// them as soon as the acknowledgement arrives.
    ///
    /// Concurrent cancels of the same run queue on the run lock; the first
    /// sweeps, the others see the run CANCELLED and get `AlreadyTerminal`
    /// without touching the venue.
    pub async fn cancel(&self, run_id: &str) -> Result<CancelSummary> {
        // Unknown ids must not leave a lock entry behind.
        self.inner.runs.get_run(run_id).await?;

        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let run = self.inner.runs.get_run(run_id).await?;
        if run.state.is_terminal() {
            self.forget_run_lock(run_id).await;
            return Err(Error::AlreadyTerminal {
                run_id: run.run_id,
                state: run.state,
            });
        }

        let result = self.sweep(&run).await;
        if result.is_ok() {
            self.forget_run_lock(run_id).await;
        }
        result
    }

    async fn sweep(&self, run: &StrategyRun) -> Result<CancelSummary> {
        let run_id = run.run_id.as_str();
        self.signal_worker(run_id).await;

        let mut summary = CancelSummary {
            run_id: run_id.to_string(),
            ..Default::default()
        };

        for child in self.inner.ledger.query(run_id).await? {
            match child.status {
                ChildStatus::Pending => {
                    match self
                        .inner
                        .ledger
                        .update_status(run_id, child.index(), ChildStatus::Cancelled, None, Some("withdrawn"))
                        .await
                    {
                        Ok(_) => summary.withdrawn += 1,
                        Err(Error::InvalidTransition { from, .. }) => {
                            debug!(run_id, index = child.index(), status = %from, "Slot claimed before withdrawal");
                        }
                        Err(e) => return Err(e),
                    }
                }
                ChildStatus::Acked if child.venue_order_id.is_some() => {
                    summary.cancel_requests += 1;
                    if self.cancel_child(run, &child).await {
                        summary.cancelled += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                _ => {}
            }
        }

        self.inner
            .runs
            .transition_run(run_id, RunState::Cancelled, Some("cancelled by operator"))
            .await?;

        info!(
            run_id,
            withdrawn = summary.withdrawn,
            cancelled = summary.cancelled,
            failed = summary.failed,
            "Run cancelled"
        );
        Ok(summary)
    }

    pub async fn status(&self, run_id: &str) -> Result<RunStatus> {
        let run = self.inner.runs.get_run(run_id).await?;
        let children = self.inner.ledger.query(run_id).await?;
        let counts = ChildCounts::tally(&children);
        Ok(RunStatus {
            run,
            children,
            counts,
        })
    }

    pub async fn list(&self, state: Option<RunState>) -> Result<Vec<StrategyRun>> {
        self.inner.runs.list_runs(state).await
    }

    /// Validate and submit a single order outside any run.
    pub async fn place_order(&self, mut request: OrderRequest) -> Result<OrderAck> {
        request.symbol = request.symbol.trim().to_uppercase();

        let mut errors = Vec::new();
        match request.order_type {
            OrderType::Market => {}
            OrderType::Limit if request.price.is_none() => {
                errors.push("limit orders require a price".to_string());
            }
            OrderType::Stop if request.price.is_none() || request.stop_price.is_none() => {
                errors.push("stop-limit orders require a stop price and a limit price".to_string());
            }
            OrderType::TrailingStopMarket => {
                if request.activation_price.is_none() {
                    errors.push("trailing stops require an activation price".to_string());
                }
                match request.callback_rate {
                    None => errors.push("trailing stops require a callback rate".to_string()),
                    Some(rate) if !(CALLBACK_RATE_MIN..=CALLBACK_RATE_MAX).contains(&rate) => {
                        errors.push(format!(
                            "callback rate must be between {CALLBACK_RATE_MIN} and {CALLBACK_RATE_MAX} percent"
                        ));
                    }
                    Some(_) => {}
                }
            }
            _ => {}
        }
        let v = &self.inner.validator;
        if let Err(mut e) = v.validate(&request.symbol, request.quantity, request.price) {
            errors.append(&mut e);
        }
        if let Some(stop) = request.stop_price {
            if let Err(e) = v.validate(&request.symbol, request.quantity, Some(stop)) {
                errors.extend(e.into_iter().map(|m| format!("stop price: {m}")));
            }
        }
        if let Some(activation) = request.activation_price {
            if let Err(e) = v.validate(&request.symbol, request.quantity, Some(activation)) {
                errors.extend(e.into_iter().map(|m| format!("activation price: {m}")));
            }
        }
        if !errors.is_empty() {
            dedup(&mut errors);
            return Err(Error::InvalidParameters(errors));
        }

        self.inner.executor.place_one_shot(&request).await
    }

    // ── Recovery ─────────────────────────────────────────────────────────────

    /// Pick up runs left RUNNING by a previous process.
    ///
    /// Slots stuck in SUBMITTED are looked up at the venue by client order
    /// id: found means acknowledged, not found means the submission never
    /// landed. Workers are respawned for runs with slots still PENDING.
    pub async fn resume(&self) -> Result<usize> {
        for run in self.inner.runs.list_runs(Some(RunState::Created)).await? {
            warn!(run_id = %run.run_id, "Run was interrupted during setup, marking FAILED");
            self.finish(&run.run_id, RunState::Failed, "interrupted during setup").await;
        }

        let mut resumed = 0;
        for run in self.inner.runs.list_runs(Some(RunState::Running)).await? {
            let children = self.inner.ledger.query(&run.run_id).await?;

            for child in children.iter().filter(|c| c.status == ChildStatus::Submitted) {
                self.recover_submitted(&run, child).await;
            }

            let children = self.inner.ledger.query(&run.run_id).await?;
            let has_pending = children.iter().any(|c| c.status == ChildStatus::Pending);
            info!(run_id = %run.run_id, kind = %run.kind, has_pending, "Resuming run");

            if self.evaluate_run(&run.run_id).await?.is_terminal() {
                continue;
            }
            if has_pending {
                self.spawn_worker(run).await;
            }
            resumed += 1;
        }
        Ok(resumed)
    }

    async fn recover_submitted(&self, run: &StrategyRun, child: &ChildOrder) {
        let run_id = run.run_id.as_str();
        let lookup = OrderRef::Client(child.client_order_id.clone());
        match self.inner.gateway.query_order(run.symbol(), &lookup).await {
            Ok(Some(ack)) => {
                match self.inner.executor.record_ack(run_id, child.index(), &ack).await {
                    Ok(c) => info!(run_id, index = child.index(), status = %c.status, "Recovered submitted slot"),
                    Err(e) => error!(run_id, index = child.index(), error = %e, "Failed to record recovered slot"),
                }
            }
            Ok(None) => {
                let result = self
                    .inner
                    .ledger
                    .update_status(
                        run_id,
                        child.index(),
                        ChildStatus::Rejected,
                        None,
                        Some("not found at venue after restart"),
                    )
                    .await;
                if let Err(e) = result {
                    error!(run_id, index = child.index(), error = %e, "Failed to reject lost slot");
                }
            }
            Err(e) => {
                warn!(run_id, index = child.index(), error = %e, "Venue lookup failed, leaving slot SUBMITTED");
            }
        }
    }

    /// Stop every worker and wait for them to exit. Venue orders are left
    /// untouched.
    pub async fn shutdown(&self) {
        let workers: Vec<(String, RunWorker)> = self.inner.workers.lock().await.drain().collect();
        for (_, worker) in &workers {
            let _ = worker.cancel_tx.send(true);
        }
        for (run_id, worker) in workers {
            if let Err(e) = worker.handle.await {
                error!(run_id, error = %e, "Run worker panicked");
            }
        }
    }

    // ── Terminal-state evaluation ────────────────────────────────────────────

    /// Move a RUNNING run to its terminal state once the ledger warrants it.
    /// Returns the run's state afterwards.
    ///
    /// Waits for a cancel sweep in progress on the same run, then sees its
    /// outcome.
    pub async fn evaluate_run(&self, run_id: &str) -> Result<RunState> {
        let lock = self.run_lock(run_id).await;
        let _guard = lock.lock().await;

        let run = self.inner.runs.get_run(run_id).await?;
        if run.state != RunState::Running {
            return Ok(run.state);
        }

        let counts = ChildCounts::tally(&self.inner.ledger.query(run_id).await?);
        let slots = run.plan.len();

        if counts.rejected as f64 > self.inner.config.failure_threshold * slots as f64 {
            warn!(
                run_id,
                rejected = counts.rejected,
                slots,
                "Rejection threshold exceeded; orders already working at the venue are left in place"
            );
            self.signal_worker(run_id).await;
            let reason = format!("{}/{} child orders rejected", counts.rejected, slots);
            return Ok(self.finish(run_id, RunState::Failed, &reason).await);
        }

        if counts.terminal() == slots {
            let state = if counts.filled > 0 {
                self.finish(run_id, RunState::Completed, "").await
            } else {
                self.finish(run_id, RunState::Failed, "no child order filled").await
            };
            return Ok(state);
        }

        Ok(RunState::Running)
    }

    /// Attempt a terminal transition, returning whatever state the run ends
    /// up in if another writer got there first.
    async fn finish(&self, run_id: &str, to: RunState, reason: &str) -> RunState {
        let reason = (!reason.is_empty()).then_some(reason);
        match self.inner.runs.transition_run(run_id, to, reason).await {
            Ok(run) => {
                info!(run_id, state = %run.state, reason = ?run.failure_reason, "Run finished");
                self.forget_run_lock(run_id).await;
                run.state
            }
            Err(Error::AlreadyTerminal { state, .. }) => {
                self.forget_run_lock(run_id).await;
                state
            }
            Err(e) => {
                error!(run_id, error = %e, "Failed to record run outcome");
                RunState::Running
            }
        }
    }

    async fn run_lock(&self, run_id: &str) -> Arc<Mutex<()>> {
        self.inner
            .run_locks
            .lock()
            .await
            .entry(run_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the lock entry of a run that reached a terminal state. Later
    /// callers build a fresh lock and find the run terminal.
    async fn forget_run_lock(&self, run_id: &str) {
        self.inner.run_locks.lock().await.remove(run_id);
    }

    // ── Workers ──────────────────────────────────────────────────────────────

    async fn spawn_worker(&self, run: StrategyRun) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let run_id = run.run_id.clone();
        let mut workers = self.inner.workers.lock().await;
        let handle = tokio::spawn(self.clone().drive(run, cancel_rx));
        workers.insert(run_id, RunWorker { cancel_tx, handle });
    }

    async fn signal_worker(&self, run_id: &str) {
        if let Some(worker) = self.inner.workers.lock().await.get(run_id) {
            let _ = worker.cancel_tx.send(true);
        }
    }

    /// Fire the run's pending slots in schedule order until the plan is
    /// exhausted, the run is cancelled, or it reaches a terminal state.
    async fn drive(self, run: StrategyRun, mut cancel_rx: watch::Receiver<bool>) {
        let run_id = run.run_id.clone();
        let mut slots = run.plan.clone();
        slots.sort_by(|a, b| a.scheduled_time.cmp(&b.scheduled_time).then(a.index.cmp(&b.index)));

        let mut fired = 0usize;
        for spec in &slots {
            match self.inner.ledger.get(&run_id, spec.index).await {
                Ok(child) if child.status != ChildStatus::Pending => continue,
                Ok(_) => {}
                Err(e) => {
                    error!(run_id, index = spec.index, error = %e, "Ledger read failed, stopping worker");
                    break;
                }
            }

            let wait = match spec.scheduled_time {
                Some(at) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
                None if fired > 0 => self.inner.config.grid_submit_delay,
                None => Duration::ZERO,
            };
            if sleep_or_cancel(wait, &mut cancel_rx).await {
                debug!(run_id, "Worker cancelled");
                break;
            }

            fired += 1;
            let outcome = self.inner.executor.fire(&run, spec).await;
            let cancelled = *cancel_rx.borrow();
            match outcome {
                Ok(SlotOutcome::Acked(child)) if cancelled && !child.status.is_terminal() => {
                    info!(run_id, index = spec.index, "Run cancelled during submission, cancelling order");
                    self.cancel_child(&run, &child).await;
                }
                Ok(_) => {}
                Err(e) => error!(run_id, index = spec.index, error = %e, "Slot submission failed"),
            }

            match self.evaluate_run(&run_id).await {
                Ok(state) if state.is_terminal() => break,
                Ok(_) => {}
                Err(e) => warn!(run_id, error = %e, "Run evaluation failed"),
            }
            if cancelled {
                break;
            }
        }

        if run.kind == StrategyKind::Grid {
            debug!(run_id, "Grid setup finished, levels rest at the venue");
        }
        self.inner.workers.lock().await.remove(&run_id);
    }

    /// Cancel one acknowledged child at the venue and record it. Returns
    /// whether the venue accepted the cancel.
    async fn cancel_child(&self, run: &StrategyRun, child: &ChildOrder) -> bool {
        let Some(venue_order_id) = child.venue_order_id.as_deref() else {
            return false;
        };
        let run_id = run.run_id.as_str();
        match self.inner.gateway.cancel_order(run.symbol(), venue_order_id).await {
            Ok(_) => {
                if let Err(e) = self
                    .inner
                    .ledger
                    .update_status(run_id, child.index(), ChildStatus::Cancelled, None, None)
                    .await
                {
                    warn!(run_id, index = child.index(), error = %e, "Cancelled at venue but ledger moved on");
                }
                true
            }
            Err(e) => {
                warn!(run_id, index = child.index(), venue_order_id, error = %e, "Venue cancel failed");
                false
            }
        }
    }

    fn venue_checks(&self, params: &StrategyParams) -> Vec<String> {
        let v = &self.inner.validator;
        let mut errors = Vec::new();
        match params {
            StrategyParams::Twap(p) => {
                if let Err(mut e) = v.validate(&p.symbol, p.total_quantity, None) {
                    errors.append(&mut e);
                }
                let slice = round_quantity(p.total_quantity / p.chunks as f64);
                if let Err(e) = v.validate(&p.symbol, slice, None) {
                    errors.extend(e.into_iter().map(|m| format!("per-chunk quantity: {m}")));
                }
            }
            StrategyParams::Grid(p) => {
                for bound in [p.lower_bound, p.upper_bound] {
                    if let Err(mut e) = v.validate(&p.symbol, p.quantity_per_level, Some(bound)) {
                        errors.append(&mut e);
                    }
                }
            }
        }
        dedup(&mut errors);
        errors
    }
}

fn normalize(params: StrategyParams) -> StrategyParams {
    match params {
        StrategyParams::Twap(mut p) => {
            p.symbol = p.symbol.trim().to_uppercase();
            StrategyParams::Twap(p)
        }
        StrategyParams::Grid(mut p) => {
            p.symbol = p.symbol.trim().to_uppercase();
            StrategyParams::Grid(p)
        }
    }
}

fn round_quantity(quantity: f64) -> f64 {
    (quantity * 1e8).round() / 1e8
}

fn dedup(errors: &mut Vec<String>) {
    let mut seen = HashSet::new();
    errors.retain(|e| seen.insert(e.clone()));
}

/// Sleep for `duration` unless the cancel flag goes up first. Returns true
/// when cancelled.
async fn sleep_or_cancel(duration: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
    if *cancel_rx.borrow() {
        return true;
    }
    if duration.is_zero() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        changed = cancel_rx.changed() => {
            if changed.is_err() {
                return true;
            }
        }
    }
    let cancelled = *cancel_rx.borrow();
    cancelled
}
