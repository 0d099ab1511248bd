use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest mark price for a symbol, emitted by the futures price stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("side must be BUY or SELL, got '{other}'")),
        }
    }
}

/// Order types accepted by the USDT-M Futures order endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    /// Stop-limit: becomes a limit order at `price` once `stop_price` trades.
    Stop,
    /// Market order that trails the price by `callback_rate` percent once
    /// `activation_price` trades.
    TrailingStopMarket,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::Stop => write!(f, "STOP"),
            OrderType::TrailingStopMarket => write!(f, "TRAILING_STOP_MARKET"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
    Gtx,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
            TimeInForce::Gtx => write!(f, "GTX"),
        }
    }
}

/// An order to be submitted to the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Limit price. Required for `Limit` and `Stop`.
    pub price: Option<f64>,
    /// Trigger price. Required for `Stop`.
    pub stop_price: Option<f64>,
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub reduce_only: bool,
    /// Price that arms a trailing stop. Required for `TrailingStopMarket`.
    #[serde(default)]
    pub activation_price: Option<f64>,
    /// Trailing distance in percent (1.0 = 1%). Required for `TrailingStopMarket`.
    #[serde(default)]
    pub callback_rate: Option<f64>,
    /// Caller-chosen id echoed back by the venue; lets a lost acknowledgement
    /// be looked up later.
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            activation_price: None,
            callback_rate: None,
            client_order_id: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            stop_price: None,
            time_in_force: Some(TimeInForce::Gtc),
            reduce_only: false,
            activation_price: None,
            callback_rate: None,
            client_order_id: None,
        }
    }

    pub fn stop_limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Stop,
            quantity,
            price: Some(limit_price),
            stop_price: Some(stop_price),
            time_in_force: Some(TimeInForce::Gtc),
            reduce_only: false,
            activation_price: None,
            callback_rate: None,
            client_order_id: None,
        }
    }

    /// Reduce-only trailing stop, closing a position once the price pulls
    /// back `callback_rate` percent from its best level after activation.
    pub fn trailing_stop(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        activation_price: f64,
        callback_rate: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::TrailingStopMarket,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: true,
            activation_price: Some(activation_price),
            callback_rate: Some(callback_rate),
            client_order_id: None,
        }
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }
}

/// Order status as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl VenueOrderStatus {
    /// Still working on the book.
    pub fn is_live(self) -> bool {
        matches!(self, VenueOrderStatus::New | VenueOrderStatus::PartiallyFilled)
    }
}

/// Acknowledgement returned by the venue for a placed or queried order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub venue_order_id: String,
    pub client_order_id: Option<String>,
    pub status: VenueOrderStatus,
}

/// One entry of the venue's open-order list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub venue_order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
}

/// Key used to look an order up at the venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderRef {
    Venue(String),
    Client(String),
}

/// Whether the daemon is running against the real exchange or simulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    Live,
    Paper,
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradingMode::Live => write!(f, "live"),
            TradingMode::Paper => write!(f, "paper"),
        }
    }
}

// ─── Strategy runs ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum StrategyKind {
    Twap,
    Grid,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Twap => write!(f, "TWAP"),
            StrategyKind::Grid => write!(f, "GRID"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpacingMode {
    /// Uniform price step between levels.
    #[default]
    Arithmetic,
    /// Uniform price ratio between levels.
    Geometric,
}

impl std::str::FromStr for SpacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "arithmetic" => Ok(SpacingMode::Arithmetic),
            "geometric" => Ok(SpacingMode::Geometric),
            other => Err(format!("spacing must be arithmetic or geometric, got '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TwapParams {
    pub symbol: String,
    pub side: OrderSide,
    pub total_quantity: f64,
    pub duration_hours: f64,
    pub chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridParams {
    pub symbol: String,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub level_count: u32,
    #[serde(default)]
    pub spacing_mode: SpacingMode,
    pub quantity_per_level: f64,
}

/// Parameters of a user-initiated execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "UPPERCASE")]
pub enum StrategyParams {
    Twap(TwapParams),
    Grid(GridParams),
}

impl StrategyParams {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyParams::Twap(_) => StrategyKind::Twap,
            StrategyParams::Grid(_) => StrategyKind::Grid,
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            StrategyParams::Twap(p) => &p.symbol,
            StrategyParams::Grid(p) => &p.symbol,
        }
    }

    /// Quantity the whole plan must add up to.
    pub fn total_quantity(&self) -> f64 {
        match self {
            StrategyParams::Twap(p) => p.total_quantity,
            StrategyParams::Grid(p) => p.quantity_per_level * p.level_count as f64,
        }
    }
}

/// One slot of a run's plan. Computed once at creation, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChildOrderSpec {
    pub index: u32,
    pub side: OrderSide,
    /// Grid level price; `None` for TWAP slices, which go out at market.
    pub target_price: Option<f64>,
    pub quantity: f64,
    /// TWAP fire time; `None` for grid levels, which go out at setup.
    pub scheduled_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum ChildStatus {
    Pending,
    Submitted,
    Acked,
    Filled,
    Cancelled,
    Rejected,
}

impl ChildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChildStatus::Filled | ChildStatus::Cancelled | ChildStatus::Rejected
        )
    }

    /// Legal ledger transitions. Terminal statuses are sinks.
    pub fn can_transition_to(self, next: ChildStatus) -> bool {
        use ChildStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Cancelled)
                | (Submitted, Acked)
                | (Submitted, Rejected)
                | (Acked, Filled)
                | (Acked, Cancelled)
                | (Acked, Rejected)
        )
    }
}

impl std::fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChildStatus::Pending => "PENDING",
            ChildStatus::Submitted => "SUBMITTED",
            ChildStatus::Acked => "ACKED",
            ChildStatus::Filled => "FILLED",
            ChildStatus::Cancelled => "CANCELLED",
            ChildStatus::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ChildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(ChildStatus::Pending),
            "SUBMITTED" => Ok(ChildStatus::Submitted),
            "ACKED" => Ok(ChildStatus::Acked),
            "FILLED" => Ok(ChildStatus::Filled),
            "CANCELLED" => Ok(ChildStatus::Cancelled),
            "REJECTED" => Ok(ChildStatus::Rejected),
            other => Err(format!("unknown child status '{other}'")),
        }
    }
}

/// Ledger record of one plan slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChildOrder {
    pub run_id: String,
    pub spec: ChildOrderSpec,
    pub client_order_id: String,
    pub status: ChildStatus,
    /// Assigned once on acknowledgement, never reassigned.
    pub venue_order_id: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ChildOrder {
    pub fn index(&self) -> u32 {
        self.spec.index
    }
}

/// Client order id sent to the venue for a plan slot. Deterministic so a
/// slot can be found again after a restart. Fits Binance's 36 char limit.
pub fn client_order_id(run_id: &str, index: u32) -> String {
    let prefix: String = run_id.chars().filter(|c| c.is_ascii_alphanumeric()).take(24).collect();
    format!("gt{prefix}-{index}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum RunState {
    Created,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }

    pub fn can_transition_to(self, next: RunState) -> bool {
        match self {
            RunState::Created => matches!(
                next,
                RunState::Running | RunState::Cancelled | RunState::Failed
            ),
            RunState::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Created => "CREATED",
            RunState::Running => "RUNNING",
            RunState::Completed => "COMPLETED",
            RunState::Cancelled => "CANCELLED",
            RunState::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CREATED" => Ok(RunState::Created),
            "RUNNING" => Ok(RunState::Running),
            "COMPLETED" => Ok(RunState::Completed),
            "CANCELLED" => Ok(RunState::Cancelled),
            "FAILED" => Ok(RunState::Failed),
            other => Err(format!("unknown run state '{other}'")),
        }
    }
}

/// Aggregate root for one user-initiated execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyRun {
    pub run_id: String,
    pub kind: StrategyKind,
    pub params: StrategyParams,
    pub plan: Vec<ChildOrderSpec>,
    pub state: RunState,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StrategyRun {
    pub fn new(params: StrategyParams, plan: Vec<ChildOrderSpec>, created_at: DateTime<Utc>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            kind: params.kind(),
            params,
            plan,
            state: RunState::Created,
            failure_reason: None,
            created_at,
            completed_at: None,
        }
    }

    pub fn symbol(&self) -> &str {
        self.params.symbol()
    }
}

/// Per-status child counts for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChildCounts {
    pub pending: usize,
    pub submitted: usize,
    pub acked: usize,
    pub filled: usize,
    pub cancelled: usize,
    pub rejected: usize,
}

impl ChildCounts {
    pub fn tally(children: &[ChildOrder]) -> Self {
        let mut counts = Self::default();
        for child in children {
            match child.status {
                ChildStatus::Pending => counts.pending += 1,
                ChildStatus::Submitted => counts.submitted += 1,
                ChildStatus::Acked => counts.acked += 1,
                ChildStatus::Filled => counts.filled += 1,
                ChildStatus::Cancelled => counts.cancelled += 1,
                ChildStatus::Rejected => counts.rejected += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.submitted + self.acked + self.filled + self.cancelled + self.rejected
    }

    pub fn terminal(&self) -> usize {
        self.filled + self.cancelled + self.rejected
    }
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub run: StrategyRun,
    pub children: Vec<ChildOrder>,
    pub counts: ChildCounts,
}

/// Outcome of a cancel sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancelSummary {
    pub run_id: String,
    /// PENDING slots withdrawn before they fired.
    pub withdrawn: usize,
    pub cancel_requests: usize,
    pub cancelled: usize,
    pub failed: usize,
}
