use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use common::Validator;

/// Base asset followed by one of the quote assets listed on USDT-M Futures.
static SYMBOL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3,10}(USDT|BUSD|BTC|ETH)$").unwrap());

/// Minimum order quantity per symbol.
const MIN_QUANTITIES: [(&str, f64); 5] = [
    ("BTCUSDT", 0.001),
    ("ETHUSDT", 0.01),
    ("BNBUSDT", 0.1),
    ("ADAUSDT", 1.0),
    ("XRPUSDT", 1.0),
];
const DEFAULT_MIN_QUANTITY: f64 = 0.001;

/// Price decimals per symbol.
const PRICE_PRECISIONS: [(&str, u32); 5] = [
    ("BTCUSDT", 2),
    ("ETHUSDT", 2),
    ("BNBUSDT", 3),
    ("ADAUSDT", 5),
    ("XRPUSDT", 4),
];
const DEFAULT_PRICE_PRECISION: u32 = 2;

/// Maximum decimals accepted on a quantity.
pub const MAX_QUANTITY_DECIMALS: usize = 8;

/// Static rule-table validator for Binance USDT-M Futures orders.
///
/// Every order the engine or the operator API places goes through
/// `validate` first; nothing here talks to the network.
#[derive(Debug, Clone, Default)]
pub struct OrderValidator;

impl OrderValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn min_quantity(&self, symbol: &str) -> f64 {
        MIN_QUANTITIES
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, q)| *q)
            .unwrap_or(DEFAULT_MIN_QUANTITY)
    }

    pub fn check_symbol(&self, symbol: &str) -> Result<(), String> {
        if symbol.is_empty() {
            return Err("Symbol cannot be empty".to_string());
        }
        if SYMBOL_PATTERN.is_match(symbol) {
            Ok(())
        } else {
            Err(format!(
                "Invalid symbol format: {symbol}. Expected format like BTCUSDT, ETHUSDT"
            ))
        }
    }

    pub fn check_quantity(&self, symbol: &str, quantity: f64) -> Result<(), String> {
        if !quantity.is_finite() || quantity <= 0.0 {
            return Err("Quantity must be greater than 0".to_string());
        }
        let min_qty = self.min_quantity(symbol);
        if quantity < min_qty {
            return Err(format!("Minimum quantity for {symbol} is {min_qty}"));
        }
        if decimals(quantity) > MAX_QUANTITY_DECIMALS {
            return Err(format!(
                "Quantity cannot have more than {MAX_QUANTITY_DECIMALS} decimal places"
            ));
        }
        Ok(())
    }

    pub fn check_price(&self, symbol: &str, price: f64) -> Result<(), String> {
        if !price.is_finite() || price <= 0.0 {
            return Err("Price must be greater than 0".to_string());
        }
        let precision = self.price_precision(symbol);
        if decimals(price) > precision as usize {
            return Err(format!(
                "Price precision for {symbol} is {precision} decimal places"
            ));
        }
        Ok(())
    }
}

impl Validator for OrderValidator {
    fn validate(&self, symbol: &str, quantity: f64, price: Option<f64>) -> Result<(), Vec<String>> {
        let errors: Vec<String> = [
            self.check_symbol(symbol),
            self.check_quantity(symbol, quantity),
            price.map_or(Ok(()), |p| self.check_price(symbol, p)),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            debug!(symbol, quantity, ?price, ?errors, "Validation failed");
            Err(errors)
        }
    }

    fn price_precision(&self, symbol: &str) -> u32 {
        PRICE_PRECISIONS
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, p)| *p)
            .unwrap_or(DEFAULT_PRICE_PRECISION)
    }
}

/// Decimal places in the shortest round-trip representation of `value`.
fn decimals(value: f64) -> usize {
    let repr = format!("{value}");
    repr.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_symbols() {
        let v = OrderValidator::new();
        for s in ["BTCUSDT", "ETHUSDT", "DOGEBUSD", "ETHBTC", "SOLETH"] {
            assert!(v.check_symbol(s).is_ok(), "{s} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_symbols() {
        let v = OrderValidator::new();
        for s in [
            "", "btcusdt", "BTC", "XYUSDT", "BTCEUR", "BTC-USDT", "ABCDEFGHIJKUSDT", "BTCUSDT\n",
            "ÄBCUSDT",
        ] {
            assert!(v.check_symbol(s).is_err(), "{s} should be invalid");
        }
    }

    #[test]
    fn enforces_symbol_minimum_quantity() {
        let v = OrderValidator::new();
        assert!(v.check_quantity("ETHUSDT", 0.005).is_err());
        assert!(v.check_quantity("ETHUSDT", 0.01).is_ok());
        assert!(v.check_quantity("SOLUSDT", 0.001).is_ok());
        assert!(v.check_quantity("BTCUSDT", 0.0).is_err());
        assert!(v.check_quantity("BTCUSDT", f64::NAN).is_err());
    }

    #[test]
    fn enforces_quantity_decimals() {
        let v = OrderValidator::new();
        assert!(v.check_quantity("BTCUSDT", 0.123456789).is_err());
        assert!(v.check_quantity("BTCUSDT", 0.12345678).is_ok());
    }

    #[test]
    fn enforces_price_precision_per_symbol() {
        let v = OrderValidator::new();
        assert!(v.check_price("BTCUSDT", 50_000.12).is_ok());
        assert!(v.check_price("BTCUSDT", 50_000.123).is_err());
        assert!(v.check_price("ADAUSDT", 0.45678).is_ok());
        assert!(v.check_price("BTCUSDT", -1.0).is_err());
        assert_eq!(v.price_precision("BNBUSDT"), 3);
        assert_eq!(v.price_precision("SOLUSDT"), DEFAULT_PRICE_PRECISION);
    }

    #[test]
    fn validate_collects_every_error() {
        let v = OrderValidator::new();
        let errors = v.validate("bad", 0.0, Some(0.0)).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(v.validate("BTCUSDT", 0.01, Some(50_000.0)).is_ok());
    }
}
