/// Pre-trade input checks consulted before any run or order is created.
pub trait Validator: Send + Sync {
    /// `Err` carries every failed rule, not just the first.
    fn validate(&self, symbol: &str, quantity: f64, price: Option<f64>) -> Result<(), Vec<String>>;

    /// Number of decimals the venue accepts for prices on `symbol`.
    fn price_precision(&self, symbol: &str) -> u32;
}
