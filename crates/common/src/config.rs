use std::time::Duration;

use crate::TradingMode;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials (live mode only)
    pub binance_api_key: String,
    pub binance_secret: String,
    pub binance_testnet: bool,

    // Operator API
    pub api_token: String,
    pub api_port: u16,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,
    /// Symbols whose mark price is streamed into the paper venue.
    pub paper_symbols: Vec<String>,

    // Database
    pub database_url: String,

    pub engine: EngineConfig,
}

/// Tunables of the execution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the reconciliation loop.
    pub reconcile_interval: Duration,
    /// Fraction of REJECTED slots above which a run is marked FAILED.
    pub failure_threshold: f64,
    /// Query each order that vanished from the open set instead of assuming
    /// it filled.
    pub confirm_fills: bool,
    /// Pause between successive grid level submissions.
    pub grid_submit_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(5),
            failure_threshold: 0.5,
            confirm_fills: true,
            grid_submit_delay: Duration::from_millis(100),
        }
    }
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = match optional_env("TRADING_MODE")
            .unwrap_or_else(|| "paper".to_string())
            .to_lowercase()
            .as_str()
        {
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => panic!("ERROR: TRADING_MODE must be 'paper' or 'live', got: '{other}'"),
        };

        // Credentials are only mandatory when real orders can be sent.
        let (binance_api_key, binance_secret) = match trading_mode {
            TradingMode::Live => (required_env("BINANCE_API_KEY"), required_env("BINANCE_SECRET")),
            TradingMode::Paper => (
                optional_env("BINANCE_API_KEY").unwrap_or_default(),
                optional_env("BINANCE_SECRET").unwrap_or_default(),
            ),
        };

        let failure_threshold: f64 = parsed_env("FAILURE_THRESHOLD", 0.5);
        if !(0.0..=1.0).contains(&failure_threshold) {
            panic!("FAILURE_THRESHOLD must be within [0, 1], got {failure_threshold}");
        }

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            reconcile_interval: Duration::from_secs(parsed_env(
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval.as_secs(),
            )),
            failure_threshold,
            confirm_fills: parsed_env("CONFIRM_FILLS", defaults.confirm_fills),
            grid_submit_delay: Duration::from_millis(parsed_env(
                "GRID_SUBMIT_DELAY_MS",
                defaults.grid_submit_delay.as_millis() as u64,
            )),
        };

        Config {
            binance_api_key,
            binance_secret,
            binance_testnet: parsed_env("BINANCE_TESTNET", false),
            api_token: required_env("API_TOKEN"),
            api_port: parsed_env("API_PORT", 8080),
            trading_mode,
            paper_slippage_bps: parsed_env("PAPER_SLIPPAGE_BPS", 10.0),
            paper_symbols: optional_env("PAPER_SYMBOLS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|| vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]),
            database_url: optional_env("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://gridtwap.db?mode=rwc".to_string()),
            engine,
        }
    }
}

/// Settings the CLI needs to reach a running daemon.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub api_token: String,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        ClientConfig {
            api_url: optional_env("GRIDTWAP_API_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8080".to_string()),
            api_token: required_env("API_TOKEN"),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("Environment variable '{key}' has an invalid value: '{raw}'")),
        None => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
