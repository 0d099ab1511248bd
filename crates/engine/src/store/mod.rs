//! Ledger and run registry backends.
//!
//! Both backends share the transition rules below, so a slot or run moves
//! through exactly the same state machine whichever one is in use.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use common::{
    client_order_id, ChildOrder, ChildOrderSpec, ChildStatus, Error, Result, RunState, StrategyRun,
};

pub(crate) fn new_child(run_id: &str, spec: &ChildOrderSpec, now: DateTime<Utc>) -> ChildOrder {
    ChildOrder {
        run_id: run_id.to_string(),
        spec: spec.clone(),
        client_order_id: client_order_id(run_id, spec.index),
        status: ChildStatus::Pending,
        venue_order_id: None,
        last_error: None,
        updated_at: now,
    }
}

/// Apply a status update to `current`, enforcing the ledger state machine and
/// the write-once venue order id.
pub(crate) fn next_child(
    current: &ChildOrder,
    to: ChildStatus,
    venue_order_id: Option<&str>,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ChildOrder> {
    let illegal = || Error::InvalidTransition {
        run_id: current.run_id.clone(),
        index: current.index(),
        from: current.status,
        to,
    };

    if !current.status.can_transition_to(to) {
        return Err(illegal());
    }

    let venue_order_id = match (current.venue_order_id.as_deref(), venue_order_id) {
        (Some(old), Some(new)) if old != new => return Err(illegal()),
        (Some(old), _) => Some(old.to_string()),
        (None, new) => new.map(str::to_string),
    };

    Ok(ChildOrder {
        status: to,
        venue_order_id,
        last_error: error.map(str::to_string).or_else(|| current.last_error.clone()),
        updated_at: now,
        ..current.clone()
    })
}

pub(crate) fn next_run(
    current: &StrategyRun,
    to: RunState,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<StrategyRun> {
    if current.state.is_terminal() {
        return Err(Error::AlreadyTerminal {
            run_id: current.run_id.clone(),
            state: current.state,
        });
    }
    if !current.state.can_transition_to(to) {
        return Err(Error::InvalidRunTransition {
            run_id: current.run_id.clone(),
            from: current.state,
            to,
        });
    }

    Ok(StrategyRun {
        state: to,
        failure_reason: reason.map(str::to_string).or_else(|| current.failure_reason.clone()),
        completed_at: if to.is_terminal() { Some(now) } else { None },
        ..current.clone()
    })
}
