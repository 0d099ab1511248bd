//! Plan computation for time-sliced (TWAP) and price-leveled (grid) runs.
//!
//! Pure functions only: building a plan never touches the network.

pub mod config;
pub mod grid;
pub mod twap;

pub use config::{StrategyConfig, StrategyFileConfig};

use chrono::{DateTime, Utc};

use common::{ChildOrderSpec, Error, Result, StrategyParams};

/// Upper bound on plan slots for a single run. Compiled-in safeguard against
/// a typo flooding the venue with orders.
pub const MAX_PLAN_SLOTS: u32 = 1_000;

/// Shape checks that need no venue knowledge. Returns every failure.
pub fn check_params(params: &StrategyParams) -> Vec<String> {
    let mut errors = Vec::new();

    if params.symbol().trim().is_empty() {
        errors.push("symbol cannot be empty".to_string());
    }

    match params {
        StrategyParams::Twap(p) => {
            if !(p.total_quantity.is_finite() && p.total_quantity > 0.0) {
                errors.push(format!("total_quantity must be > 0, got {}", p.total_quantity));
            }
            if p.chunks < 1 {
                errors.push("chunks must be at least 1".to_string());
            }
            if p.chunks > MAX_PLAN_SLOTS {
                errors.push(format!("chunks must be at most {MAX_PLAN_SLOTS}"));
            }
            if !(p.duration_hours.is_finite() && p.duration_hours >= 0.0) {
                errors.push(format!(
                    "duration_hours must be a non-negative number, got {}",
                    p.duration_hours
                ));
            }
        }
        StrategyParams::Grid(p) => {
            if !(p.quantity_per_level.is_finite() && p.quantity_per_level > 0.0) {
                errors.push(format!(
                    "quantity_per_level must be > 0, got {}",
                    p.quantity_per_level
                ));
            }
            if p.level_count < 2 {
                errors.push("level_count must be at least 2".to_string());
            }
            if p.level_count > MAX_PLAN_SLOTS {
                errors.push(format!("level_count must be at most {MAX_PLAN_SLOTS}"));
            }
            if !(p.lower_bound.is_finite() && p.lower_bound > 0.0) {
                errors.push(format!("lower_bound must be > 0, got {}", p.lower_bound));
            }
            if !p.upper_bound.is_finite() || p.lower_bound >= p.upper_bound {
                errors.push(format!(
                    "lower_bound ({}) must be below upper_bound ({})",
                    p.lower_bound, p.upper_bound
                ));
            }
        }
    }

    errors
}

/// Compute the immutable plan of a run.
///
/// `price_precision` rounds grid levels to the venue tick; TWAP ignores it.
pub fn build_plan(
    params: &StrategyParams,
    start: DateTime<Utc>,
    price_precision: Option<u32>,
) -> Result<Vec<ChildOrderSpec>> {
    let errors = check_params(params);
    if !errors.is_empty() {
        return Err(Error::InvalidParameters(errors));
    }

    match params {
        StrategyParams::Twap(p) => Ok(twap::plan(p, start)),
        StrategyParams::Grid(p) => grid::plan(p, price_precision).map_err(Error::invalid),
    }
}
