use common::{ChildOrderSpec, GridParams, OrderSide, SpacingMode};

/// Price of every level from `lower` to `upper` inclusive. Endpoints are
/// exact; interior levels follow the spacing mode.
pub fn ladder(lower: f64, upper: f64, levels: u32, mode: SpacingMode) -> Vec<f64> {
    if levels < 2 {
        return vec![lower];
    }
    let last = levels - 1;
    (0..levels)
        .map(|i| {
            if i == 0 {
                return lower;
            }
            if i == last {
                return upper;
            }
            let t = i as f64 / last as f64;
            match mode {
                SpacingMode::Arithmetic => lower + (upper - lower) * t,
                SpacingMode::Geometric => lower * (upper / lower).powf(t),
            }
        })
        .collect()
}

pub fn round_price(price: f64, precision: u32) -> f64 {
    let scale = 10f64.powi(precision as i32);
    (price * scale).round() / scale
}

/// Alternating BUY (even index) / SELL (odd index) limit levels across the
/// ladder. Fails if rounding to `price_precision` makes two levels collide.
pub fn plan(params: &GridParams, price_precision: Option<u32>) -> Result<Vec<ChildOrderSpec>, String> {
    let mut prices = ladder(
        params.lower_bound,
        params.upper_bound,
        params.level_count,
        params.spacing_mode,
    );
    if let Some(precision) = price_precision {
        for price in prices.iter_mut() {
            *price = round_price(*price, precision);
        }
    }

    if prices.windows(2).any(|w| w[1] <= w[0]) {
        return Err(format!(
            "{} levels between {} and {} are closer than the price tick",
            params.level_count, params.lower_bound, params.upper_bound
        ));
    }

    Ok(prices
        .into_iter()
        .enumerate()
        .map(|(i, price)| ChildOrderSpec {
            index: i as u32,
            side: if i % 2 == 0 { OrderSide::Buy } else { OrderSide::Sell },
            target_price: Some(price),
            quantity: params.quantity_per_level,
            scheduled_time: None,
        })
        .collect())
}
