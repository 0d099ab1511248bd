use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use common::{
    Error, ExchangeGateway, OpenOrder, OrderAck, OrderRef, OrderRequest, OrderSide, Result,
    VenueOrderStatus,
};

const BASE_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";

/// Venue error code for "Order does not exist".
const UNKNOWN_ORDER: i64 = -2013;

/// REST client for Binance USDT-M Futures. Used for order placement,
/// cancellation and order/price queries.
pub struct BinanceFuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: Client,
}

impl BinanceFuturesClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: if testnet { TESTNET_URL } else { BASE_URL }.to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sign(&self, query: &str) -> String {
        sign(&self.secret, query)
    }

    /// Send a signed request. Parameters go in the query string for GET and
    /// DELETE, in a form body for POST.
    async fn signed(&self, method: Method, path: &str, params: &str) -> Result<(StatusCode, String)> {
        let ts = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signed = format!("{query}&signature={}", self.sign(&query));

        let request = if method == Method::POST {
            self.http
                .post(format!("{}{path}", self.base_url))
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(signed)
        } else {
            self.http.request(method, format!("{}{path}?{signed}", self.base_url))
        };

        let resp = request
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        Ok((status, body))
    }

    async fn signed_ok(&self, method: Method, path: &str, params: &str) -> Result<String> {
        let (status, body) = self.signed(method, path, params).await?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl ExchangeGateway for BinanceFuturesClient {
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let params = order_params(order);
        debug!(symbol = %order.symbol, side = %order.side, order_type = %order.order_type, "Submitting order to Binance");
        let body = self.signed_ok(Method::POST, "/fapi/v1/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body).map_err(|e| Error::Gateway(e.to_string()))?;
        Ok(resp.into_ack())
    }

    async fn cancel_order(&self, symbol: &str, venue_order_id: &str) -> Result<String> {
        let params = format!("symbol={symbol}&orderId={venue_order_id}");
        let body = self.signed_ok(Method::DELETE, "/fapi/v1/order", &params).await?;
        let resp: OrderResponse = serde_json::from_str(&body).map_err(|e| Error::Gateway(e.to_string()))?;
        Ok(resp.order_id.to_string())
    }

    async fn list_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        let params = format!("symbol={symbol}");
        let body = self.signed_ok(Method::GET, "/fapi/v1/openOrders", &params).await?;
        let orders: Vec<OpenOrderResponse> =
            serde_json::from_str(&body).map_err(|e| Error::Gateway(e.to_string()))?;
        Ok(orders.into_iter().map(OpenOrderResponse::into_open_order).collect())
    }

    async fn get_reference_price(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/fapi/v1/ticker/price?symbol={symbol}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        let ticker: PriceTicker = serde_json::from_str(&body).map_err(|e| Error::Gateway(e.to_string()))?;
        ticker
            .price
            .parse::<f64>()
            .map_err(|e| Error::Gateway(e.to_string()))
    }

    async fn query_order(&self, symbol: &str, order: &OrderRef) -> Result<Option<OrderAck>> {
        let params = match order {
            OrderRef::Venue(id) => format!("symbol={symbol}&orderId={id}"),
            OrderRef::Client(id) => format!("symbol={symbol}&origClientOrderId={id}"),
        };
        let (status, body) = self.signed(Method::GET, "/fapi/v1/order", &params).await?;
        if !status.is_success() {
            if error_code(&body) == Some(UNKNOWN_ORDER) {
                return Ok(None);
            }
            return Err(api_error(status, &body));
        }
        let resp: OrderResponse = serde_json::from_str(&body).map_err(|e| Error::Gateway(e.to_string()))?;
        Ok(Some(resp.into_ack()))
    }
}

// ─── Request building ─────────────────────────────────────────────────────────

pub(crate) fn sign(secret: &str, query: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(query.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Decimal rendering without exponent or trailing zeros.
pub(crate) fn format_decimal(value: f64) -> String {
    let s = format!("{value:.8}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

pub(crate) fn order_params(order: &OrderRequest) -> String {
    let mut params = format!(
        "symbol={}&side={}&type={}&quantity={}",
        order.symbol,
        order.side,
        order.order_type,
        format_decimal(order.quantity)
    );
    if let Some(price) = order.price {
        params.push_str(&format!("&price={}", format_decimal(price)));
    }
    if let Some(stop) = order.stop_price {
        params.push_str(&format!("&stopPrice={}", format_decimal(stop)));
    }
    if let Some(activation) = order.activation_price {
        params.push_str(&format!("&activationPrice={}", format_decimal(activation)));
    }
    if let Some(rate) = order.callback_rate {
        params.push_str(&format!("&callbackRate={}", format_decimal(rate)));
    }
    if let Some(tif) = order.time_in_force {
        params.push_str(&format!("&timeInForce={tif}"));
    }
    if order.reduce_only {
        params.push_str("&reduceOnly=true");
    }
    if let Some(id) = &order.client_order_id {
        params.push_str(&format!("&newClientOrderId={id}"));
    }
    params.push_str("&newOrderRespType=RESULT");
    params
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

fn error_code(body: &str) -> Option<i64> {
    serde_json::from_str::<ApiErrorBody>(body).ok().map(|e| e.code)
}

fn api_error(status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(e) => Error::Gateway(format!("HTTP {status}: [{}] {}", e.code, e.msg)),
        Err(_) => Error::Gateway(format!("HTTP {status}: {body}")),
    }
}

pub(crate) fn parse_status(raw: &str) -> VenueOrderStatus {
    match raw {
        "PARTIALLY_FILLED" => VenueOrderStatus::PartiallyFilled,
        "FILLED" => VenueOrderStatus::Filled,
        "CANCELED" => VenueOrderStatus::Canceled,
        "REJECTED" => VenueOrderStatus::Rejected,
        "EXPIRED" | "EXPIRED_IN_MATCH" => VenueOrderStatus::Expired,
        // NEW, NEW_INSURANCE, NEW_ADL
        _ => VenueOrderStatus::New,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    client_order_id: String,
    status: String,
}

impl OrderResponse {
    fn into_ack(self) -> OrderAck {
        OrderAck {
            venue_order_id: self.order_id.to_string(),
            client_order_id: Some(self.client_order_id),
            status: parse_status(&self.status),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderResponse {
    order_id: i64,
    client_order_id: String,
    symbol: String,
    side: OrderSide,
    price: String,
    orig_qty: String,
}

impl OpenOrderResponse {
    fn into_open_order(self) -> OpenOrder {
        OpenOrder {
            venue_order_id: self.order_id.to_string(),
            client_order_id: Some(self.client_order_id),
            symbol: self.symbol,
            side: self.side,
            price: self.price.parse().unwrap_or(0.0),
            quantity: self.orig_qty.parse().unwrap_or(0.0),
        }
    }
}

#[derive(Deserialize)]
struct PriceTicker {
    price: String,
}
