use async_trait::async_trait;

use crate::{OpenOrder, OrderAck, OrderRef, OrderRequest, Result};

/// Abstraction over the exchange connection.
///
/// `BinanceFuturesClient` implements this for live trading.
/// `PaperGateway` implements this for simulation.
///
/// `place_order` is at-most-once: a call that errors locally may still have
/// reached the venue. Reconciliation against `list_open_orders` and
/// `query_order` is authoritative, not the local result.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Submit an order and return the venue acknowledgement.
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck>;

    /// Cancel a working order. Returns the venue order id on success.
    async fn cancel_order(&self, symbol: &str, venue_order_id: &str) -> Result<String>;

    /// Orders currently working on the book for `symbol`.
    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>>;

    /// Latest reference (mark) price for a symbol.
    async fn get_reference_price(&self, symbol: &str) -> Result<f64>;

    /// Look a single order up. `Ok(None)` when the venue does not know it.
    async fn query_order(&self, symbol: &str, order: &OrderRef) -> Result<Option<OrderAck>>;
}
