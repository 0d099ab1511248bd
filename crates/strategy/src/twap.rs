use chrono::{DateTime, Duration, Utc};

use common::{ChildOrderSpec, TwapParams};

/// Split `total_quantity` into `chunks` equal market slices spread evenly over
/// `duration_hours`, the first firing at `start`.
///
/// The last slice takes whatever the others left so the plan sums to the
/// requested total without accumulating float error.
pub fn plan(params: &TwapParams, start: DateTime<Utc>) -> Vec<ChildOrderSpec> {
    let chunks = params.chunks.max(1);
    let chunk_qty = params.total_quantity / chunks as f64;
    let interval_us = (params.duration_hours * 3_600_000_000.0 / chunks as f64).round() as i64;

    let mut allocated = 0.0;
    (0..chunks)
        .map(|index| {
            let quantity = if index == chunks - 1 {
                params.total_quantity - allocated
            } else {
                chunk_qty
            };
            allocated += quantity;

            ChildOrderSpec {
                index,
                side: params.side,
                target_price: None,
                quantity,
                scheduled_time: Some(start + Duration::microseconds(interval_us * index as i64)),
            }
        })
        .collect()
}
