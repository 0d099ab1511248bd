use serde::{Deserialize, Serialize};

use common::{Error, Result, StrategyParams};

/// Preset file of runs to start in one go (TOML).
///
/// Example `config/runs.toml`:
/// ```toml
/// [[strategy]]
/// name = "BTC accumulation"
/// kind = "TWAP"
/// symbol = "BTCUSDT"
/// side = "BUY"
/// total_quantity = 0.1
/// duration_hours = 2.0
/// chunks = 8
///
/// [[strategy]]
/// name = "ETH range"
/// kind = "GRID"
/// symbol = "ETHUSDT"
/// lower_bound = 3000.0
/// upper_bound = 3400.0
/// level_count = 9
/// spacing_mode = "GEOMETRIC"
/// quantity_per_level = 0.05
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy")]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Human-readable name shown in logs.
    pub name: String,
    #[serde(flatten)]
    pub params: StrategyParams,
}

impl StrategyFileConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read preset file '{path}': {e}")))?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("failed to parse preset file '{path}': {e}")))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
