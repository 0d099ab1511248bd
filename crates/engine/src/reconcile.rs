use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use common::{ChildStatus, Error, OpenOrder, OrderRef, Result, RunState, StrategyRun};

use crate::executor::settled_status;
use crate::scheduler::ExecutionScheduler;

/// Counters from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub runs_checked: usize,
    /// Ledger transitions applied.
    pub transitions: usize,
    /// Disagreements with the venue that were logged but not applied.
    pub drift: usize,
    pub errors: usize,
}

/// Periodically compares the ledger of every RUNNING run with the venue's
/// open-order list and applies the transitions the venue proves.
///
/// Never re-submits anything and never moves a slot out of a terminal
/// status, so repeated passes over an unchanged venue are no-ops.
pub struct ReconciliationLoop {
    scheduler: ExecutionScheduler,
    interval: Duration,
    confirm_fills: bool,
}

impl ReconciliationLoop {
    pub fn new(scheduler: ExecutionScheduler) -> Self {
        let config = scheduler.config();
        Self {
            interval: config.reconcile_interval,
            confirm_fills: config.confirm_fills,
            scheduler,
        }
    }

    /// Run until `shutdown_rx` flips to true. Call from `tokio::spawn`.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.interval, confirm_fills = self.confirm_fills, "ReconciliationLoop running");
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let report = self.reconcile_once().await;
                    if report.transitions > 0 || report.drift > 0 || report.errors > 0 {
                        info!(?report, "Reconciliation pass");
                    } else {
                        debug!(?report, "Reconciliation pass");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("ReconciliationLoop stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over every RUNNING run. The open-order list is fetched once
    /// per symbol.
    pub async fn reconcile_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let runs = match self.scheduler.list(Some(RunState::Running)).await {
            Ok(runs) => runs,
            Err(e) => {
                error!(error = %e, "Failed to list running runs");
                report.errors += 1;
                return report;
            }
        };

        let mut open_by_symbol: HashMap<String, Vec<OpenOrder>> = HashMap::new();
        for run in runs {
            report.runs_checked += 1;
            let symbol = run.symbol().to_string();

            if !open_by_symbol.contains_key(&symbol) {
                match self.scheduler.gateway().list_open_orders(&symbol).await {
                    Ok(open) => {
                        open_by_symbol.insert(symbol.clone(), open);
                    }
                    Err(e) => {
                        warn!(symbol, error = %e, "Open-order query failed, skipping run this pass");
                        report.errors += 1;
                        continue;
                    }
                }
            }
            let open = open_by_symbol.get(&symbol).map(Vec::as_slice).unwrap_or_default();

            if let Err(e) = self.reconcile_run(&run, open, &mut report).await {
                error!(run_id = %run.run_id, error = %e, "Reconciliation of run failed");
                report.errors += 1;
            }
            if let Err(e) = self.scheduler.evaluate_run(&run.run_id).await {
                warn!(run_id = %run.run_id, error = %e, "Run evaluation failed");
            }
        }

        report
    }

    async fn reconcile_run(
        &self,
        run: &StrategyRun,
        open: &[OpenOrder],
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let run_id = run.run_id.as_str();
        let open_ids: HashSet<&str> = open.iter().map(|o| o.venue_order_id.as_str()).collect();
        let open_by_client: HashMap<&str, &OpenOrder> = open
            .iter()
            .filter_map(|o| o.client_order_id.as_deref().map(|c| (c, o)))
            .collect();
        let ledger = self.scheduler.ledger();

        for child in ledger.query(run_id).await? {
            let index = child.index();
            let (next, venue_order_id) = match child.status {
                ChildStatus::Acked => {
                    let Some(venue_order_id) = child.venue_order_id.as_deref() else {
                        continue;
                    };
                    if open_ids.contains(venue_order_id) {
                        continue;
                    }
                    let next = if self.confirm_fills {
                        match self.confirm(run, venue_order_id).await {
                            Ok(Some(next)) => next,
                            Ok(None) => {
                                report.drift += 1;
                                continue;
                            }
                            Err(e) => {
                                warn!(run_id, index, error = %e, "Order lookup failed");
                                report.errors += 1;
                                continue;
                            }
                        }
                    } else {
                        ChildStatus::Filled
                    };
                    (next, None)
                }
                ChildStatus::Submitted => match open_by_client.get(child.client_order_id.as_str()) {
                    Some(order) => (ChildStatus::Acked, Some(order.venue_order_id.clone())),
                    None => continue,
                },
                status if status.is_terminal() => {
                    if open_by_client.contains_key(child.client_order_id.as_str()) {
                        warn!(run_id, index, %status, "Venue still shows an order for a settled slot");
                        report.drift += 1;
                    }
                    continue;
                }
                _ => continue,
            };

            match ledger
                .update_status(run_id, index, next, venue_order_id.as_deref(), None)
                .await
            {
                Ok(updated) => {
                    info!(run_id, index, from = %child.status, to = %updated.status, "Reconciled child order");
                    report.transitions += 1;
                }
                Err(Error::InvalidTransition { from, .. }) => {
                    debug!(run_id, index, status = %from, "Slot moved during reconciliation");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Ask the venue what became of an order missing from the open list.
    /// `None` means the venue disagrees with the ledger in a way that cannot
    /// be applied; it is logged as drift.
    async fn confirm(&self, run: &StrategyRun, venue_order_id: &str) -> Result<Option<ChildStatus>> {
        let lookup = OrderRef::Venue(venue_order_id.to_string());
        match self.scheduler.gateway().query_order(run.symbol(), &lookup).await? {
            Some(ack) => match settled_status(ack.status) {
                Some(status) => Ok(Some(status)),
                None => {
                    warn!(run_id = %run.run_id, venue_order_id, "Order live at venue but missing from open orders");
                    Ok(None)
                }
            },
            None => {
                warn!(run_id = %run.run_id, venue_order_id, "Acknowledged order unknown to venue");
                Ok(None)
            }
        }
    }
}
