use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    Error, ExchangeGateway, OpenOrder, OrderAck, OrderRef, OrderRequest, OrderSide, OrderType,
    Result, VenueOrderStatus,
};

/// A working order on the simulated book.
#[derive(Debug, Clone)]
struct PaperOrder {
    venue_order_id: String,
    client_order_id: Option<String>,
    request: OrderRequest,
    status: VenueOrderStatus,
    /// Stop orders become limit orders once their trigger trades; trailing
    /// stops start following the price once their activation price trades.
    triggered: bool,
    /// Best price seen since a trailing stop activated.
    extreme: Option<f64>,
    fill_price: Option<f64>,
}

impl PaperOrder {
    /// Feed a price to an armed or arming trailing stop. Returns true when
    /// the pull-back from the best price reaches the callback rate.
    fn trail(&mut self, price: f64) -> bool {
        let (Some(activation), Some(rate)) = (self.request.activation_price, self.request.callback_rate)
        else {
            return false;
        };
        if !self.triggered {
            // A SELL stop protects a long and arms on the way up; a BUY stop the reverse.
            let armed = match self.request.side {
                OrderSide::Sell => price >= activation,
                OrderSide::Buy => price <= activation,
            };
            if !armed {
                return false;
            }
            self.triggered = true;
        }

        let callback = rate / 100.0;
        match self.request.side {
            OrderSide::Sell => {
                let peak = self.extreme.map_or(price, |p| p.max(price));
                self.extreme = Some(peak);
                price <= peak * (1.0 - callback)
            }
            OrderSide::Buy => {
                let trough = self.extreme.map_or(price, |p| p.min(price));
                self.extreme = Some(trough);
                price >= trough * (1.0 + callback)
            }
        }
    }
}

/// Simulated USDT-M Futures venue for paper trading.
///
/// Market orders fill at the latest known price with configurable slippage.
/// Limit orders rest until the price crosses them; stop-limit orders rest
/// until the stop price trades, then behave as limits. Trailing stops arm at
/// their activation price and fill at market once the price pulls back by
/// the callback rate.
/// No real orders are ever sent to Binance.
pub struct PaperGateway {
    /// Latest known price per symbol, updated via `update_price`.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    /// Every order ever accepted, keyed by venue order id.
    orders: Arc<RwLock<HashMap<String, PaperOrder>>>,
    next_id: AtomicU64,
    /// Slippage in basis points applied to market fills.
    slippage_bps: f64,
}

impl PaperGateway {
    pub fn new(slippage_bps: f64) -> Self {
        info!(slippage_bps = slippage_bps, "PaperGateway initialized");
        Self {
            prices: Arc::new(RwLock::new(HashMap::new())),
            orders: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            slippage_bps,
        }
    }

    /// Update the latest price for a symbol and match resting orders against it.
    pub async fn update_price(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_string(), price);

        let mut orders = self.orders.write().await;
        for order in orders.values_mut() {
            if order.request.symbol != symbol || !order.status.is_live() {
                continue;
            }
            if order.request.order_type == OrderType::TrailingStopMarket {
                if order.trail(price) {
                    let fill = self.slipped(order.request.side, price);
                    debug!(symbol, id = %order.venue_order_id, price, fill, "Paper trailing stop filled");
                    order.status = VenueOrderStatus::Filled;
                    order.fill_price = Some(fill);
                }
                continue;
            }
            if order.request.order_type == OrderType::Stop && !order.triggered {
                let Some(stop) = order.request.stop_price else { continue };
                let hit = match order.request.side {
                    OrderSide::Buy => price >= stop,
                    OrderSide::Sell => price <= stop,
                };
                if !hit {
                    continue;
                }
                debug!(symbol, id = %order.venue_order_id, stop, "Paper stop triggered");
                order.triggered = true;
            }
            let Some(limit) = order.request.price else { continue };
            let crossed = match order.request.side {
                OrderSide::Buy => price <= limit,
                OrderSide::Sell => price >= limit,
            };
            if crossed {
                debug!(symbol, id = %order.venue_order_id, limit, price, "Paper limit filled");
                order.status = VenueOrderStatus::Filled;
                order.fill_price = Some(limit);
            }
        }
    }

    fn next_order_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn slipped(&self, side: OrderSide, mid: f64) -> f64 {
        // Buys pay more, sells receive less
        match side {
            OrderSide::Buy => mid * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => mid * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    /// Fill price of an order, if it filled.
    pub async fn fill_price(&self, venue_order_id: &str) -> Option<f64> {
        self.orders
            .read()
            .await
            .get(venue_order_id)
            .and_then(|o| o.fill_price)
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        if let Some(client_id) = &order.client_order_id {
            let orders = self.orders.read().await;
            if orders.values().any(|o| o.client_order_id.as_ref() == Some(client_id)) {
                return Err(Error::Gateway(format!(
                    "Duplicate clientOrderId '{client_id}'"
                )));
            }
        }

        let venue_order_id = self.next_order_id();
        let mut paper = PaperOrder {
            venue_order_id: venue_order_id.clone(),
            client_order_id: order.client_order_id.clone(),
            request: order.clone(),
            status: VenueOrderStatus::New,
            triggered: false,
            extreme: None,
            fill_price: None,
        };

        match order.order_type {
            OrderType::Market => {
                let mid = self.get_reference_price(&order.symbol).await?;
                let fill = self.slipped(order.side, mid);
                debug!(
                    symbol = %order.symbol,
                    side = %order.side,
                    mid = mid,
                    fill = fill,
                    qty = order.quantity,
                    "Paper fill simulated"
                );
                paper.status = VenueOrderStatus::Filled;
                paper.fill_price = Some(fill);
            }
            OrderType::Limit | OrderType::Stop => {
                if order.price.is_none() {
                    return Err(Error::Gateway(format!("{} order requires a price", order.order_type)));
                }
                if order.order_type == OrderType::Stop && order.stop_price.is_none() {
                    return Err(Error::Gateway("STOP order requires a stop price".into()));
                }
            }
            OrderType::TrailingStopMarket => {
                if order.activation_price.is_none() || order.callback_rate.is_none() {
                    return Err(Error::Gateway(
                        "TRAILING_STOP_MARKET order requires an activation price and a callback rate".into(),
                    ));
                }
            }
        }

        let ack = OrderAck {
            venue_order_id: venue_order_id.clone(),
            client_order_id: order.client_order_id.clone(),
            status: paper.status,
        };
        self.orders.write().await.insert(venue_order_id, paper);

        // A limit placed through the current price fills straight away; a
        // trailing stop may arm straight away.
        if matches!(order.order_type, OrderType::Limit | OrderType::TrailingStopMarket) {
            let last = self.prices.read().await.get(&order.symbol).copied();
            if let Some(last) = last {
                self.update_price(&order.symbol, last).await;
                if let Some(o) = self.orders.read().await.get(&ack.venue_order_id) {
                    return Ok(OrderAck { status: o.status, ..ack });
                }
            }
        }
        Ok(ack)
    }

    async fn cancel_order(&self, symbol: &str, venue_order_id: &str) -> Result<String> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(venue_order_id) {
            Some(o) if o.request.symbol == symbol && o.status.is_live() => {
                o.status = VenueOrderStatus::Canceled;
                Ok(venue_order_id.to_string())
            }
            Some(o) => Err(Error::Gateway(format!(
                "Order {venue_order_id} cannot be cancelled in status {:?}",
                o.status
            ))),
            None => Err(Error::Gateway(format!("Unknown order {venue_order_id}"))),
        }
    }

    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        let orders = self.orders.read().await;
        let mut open: Vec<OpenOrder> = orders
            .values()
            .filter(|o| o.request.symbol == symbol && o.status.is_live())
            .map(|o| OpenOrder {
                venue_order_id: o.venue_order_id.clone(),
                client_order_id: o.client_order_id.clone(),
                symbol: o.request.symbol.clone(),
                side: o.request.side,
                price: o.request.price.unwrap_or(0.0),
                quantity: o.request.quantity,
            })
            .collect();
        open.sort_by(|a, b| a.venue_order_id.cmp(&b.venue_order_id));
        Ok(open)
    }

    async fn get_reference_price(&self, symbol: &str) -> Result<f64> {
        self.prices.read().await.get(symbol).copied().ok_or_else(|| {
            Error::Gateway(format!(
                "PaperGateway has no price for '{symbol}'. Ensure the price stream is running."
            ))
        })
    }

    async fn query_order(&self, symbol: &str, order: &OrderRef) -> Result<Option<OrderAck>> {
        let orders = self.orders.read().await;
        let found = orders.values().find(|o| {
            o.request.symbol == symbol
                && match order {
                    OrderRef::Venue(id) => &o.venue_order_id == id,
                    OrderRef::Client(id) => o.client_order_id.as_ref() == Some(id),
                }
        });
        Ok(found.map(|o| OrderAck {
            venue_order_id: o.venue_order_id.clone(),
            client_order_id: o.client_order_id.clone(),
            status: o.status,
        }))
    }
}
