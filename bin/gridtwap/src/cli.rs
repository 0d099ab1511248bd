use clap::{Parser, Subcommand};

use common::{OrderSide, RunState, SpacingMode};

#[derive(Parser)]
#[command(name = "gridtwap")]
#[command(about = "TWAP and grid execution for Binance USDT-M Futures", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the execution engine and the operator API
    Serve,

    /// Split a quantity into equal market slices over a duration
    StartTwap {
        /// Trading symbol (e.g., BTCUSDT)
        symbol: String,

        /// BUY or SELL
        #[arg(long)]
        side: OrderSide,

        #[arg(long)]
        total_quantity: f64,

        #[arg(long)]
        duration_hours: f64,

        #[arg(long)]
        chunks: u32,
    },

    /// Place a ladder of limit orders between two prices
    StartGrid {
        symbol: String,

        #[arg(long)]
        lower: f64,

        #[arg(long)]
        upper: f64,

        #[arg(long)]
        levels: u32,

        /// arithmetic or geometric
        #[arg(long, default_value = "arithmetic")]
        spacing: SpacingMode,

        #[arg(long)]
        quantity_per_level: f64,
    },

    /// Start every run listed in a TOML preset file
    StartFile { path: String },

    /// Show a run and its child orders
    Status {
        run_id: String,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// List runs, optionally filtered by state
    List {
        #[arg(long)]
        state: Option<RunState>,
    },

    /// Cancel a run and its live orders
    Cancel { run_id: String },

    /// Place a single order outside any run
    Order {
        #[command(subcommand)]
        order: OrderCommand,
    },
}

#[derive(Subcommand)]
pub enum OrderCommand {
    Market {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        #[arg(long)]
        reduce_only: bool,
    },
    Limit {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        price: f64,
        #[arg(long)]
        reduce_only: bool,
    },
    /// Limit order that activates once the stop price trades
    StopLimit {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        price: f64,
        stop_price: f64,
        #[arg(long)]
        reduce_only: bool,
    },
    /// Reduce-only market exit that trails the price once activated
    TrailingStop {
        symbol: String,
        side: OrderSide,
        quantity: f64,
        activation_price: f64,
        /// Pull-back from the best price that fires the order, in percent
        #[arg(long, default_value_t = 1.0)]
        callback_rate: f64,
    },
}
