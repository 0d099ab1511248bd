use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use common::{
    ChildOrder, ChildOrderSpec, ChildStatus, Error, OrderLedger, Result, RunRepository, RunState,
    StrategyRun,
};

use super::{new_child, next_child, next_run};

/// Process-local store. Every update happens under a single write lock, which
/// makes the read-check-write of a transition atomic.
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<String, StrategyRun>>,
    children: RwLock<HashMap<String, BTreeMap<u32, ChildOrder>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderLedger for MemoryStore {
    async fn record(&self, run_id: &str, index: u32, spec: &ChildOrderSpec) -> Result<ChildOrder> {
        let mut children = self.children.write().await;
        let slots = children.entry(run_id.to_string()).or_default();
        if slots.contains_key(&index) {
            return Err(Error::DuplicateChildOrder {
                run_id: run_id.to_string(),
                index,
            });
        }
        let child = new_child(run_id, &ChildOrderSpec { index, ..spec.clone() }, Utc::now());
        slots.insert(index, child.clone());
        Ok(child)
    }

    async fn update_status(
        &self,
        run_id: &str,
        index: u32,
        status: ChildStatus,
        venue_order_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<ChildOrder> {
        let mut children = self.children.write().await;
        let slot = children
            .get_mut(run_id)
            .and_then(|slots| slots.get_mut(&index))
            .ok_or_else(|| Error::UnknownChildOrder {
                run_id: run_id.to_string(),
                index,
            })?;
        let next = next_child(slot, status, venue_order_id, error, Utc::now())?;
        *slot = next.clone();
        Ok(next)
    }

    async fn get(&self, run_id: &str, index: u32) -> Result<ChildOrder> {
        self.children
            .read()
            .await
            .get(run_id)
            .and_then(|slots| slots.get(&index))
            .cloned()
            .ok_or_else(|| Error::UnknownChildOrder {
                run_id: run_id.to_string(),
                index,
            })
    }

    async fn query(&self, run_id: &str) -> Result<Vec<ChildOrder>> {
        Ok(self
            .children
            .read()
            .await
            .get(run_id)
            .map(|slots| slots.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl RunRepository for MemoryStore {
    async fn insert_run(&self, run: &StrategyRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.run_id) {
            return Err(Error::Other(format!("run {} already exists", run.run_id)));
        }
        runs.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<StrategyRun> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
    }

    async fn list_runs(&self, state: Option<RunState>) -> Result<Vec<StrategyRun>> {
        let mut runs: Vec<StrategyRun> = self
            .runs
            .read()
            .await
            .values()
            .filter(|r| state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    async fn transition_run(
        &self,
        run_id: &str,
        to: RunState,
        reason: Option<&str>,
    ) -> Result<StrategyRun> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))?;
        let next = next_run(run, to, reason, Utc::now())?;
        *run = next.clone();
        Ok(next)
    }
}
