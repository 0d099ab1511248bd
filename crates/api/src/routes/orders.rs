use axum::{extract::rejection::JsonRejection, extract::State, routing::post, Json, Router};
use serde::Deserialize;

use common::{OrderAck, OrderRequest, OrderSide, OrderType, TimeInForce};

use super::ApiError;
use crate::AppState;

pub fn orders_router() -> Router<AppState> {
    Router::new().route("/api/orders", post(place_order))
}

/// One-shot order outside any run.
#[derive(Debug, Deserialize)]
struct PlaceOrderBody {
    symbol: String,
    side: OrderSide,
    order_type: OrderType,
    quantity: f64,
    price: Option<f64>,
    stop_price: Option<f64>,
    time_in_force: Option<TimeInForce>,
    activation_price: Option<f64>,
    callback_rate: Option<f64>,
    #[serde(default)]
    reduce_only: bool,
}

impl From<PlaceOrderBody> for OrderRequest {
    fn from(body: PlaceOrderBody) -> Self {
        let time_in_force = match body.order_type {
            OrderType::Market | OrderType::TrailingStopMarket => None,
            OrderType::Limit | OrderType::Stop => body.time_in_force.or(Some(TimeInForce::Gtc)),
        };
        OrderRequest {
            symbol: body.symbol,
            side: body.side,
            order_type: body.order_type,
            quantity: body.quantity,
            price: body.price,
            stop_price: body.stop_price,
            time_in_force,
            activation_price: body.activation_price,
            callback_rate: body.callback_rate,
            reduce_only: body.reduce_only,
            client_order_id: None,
        }
    }
}

async fn place_order(
    State(state): State<AppState>,
    payload: Result<Json<PlaceOrderBody>, JsonRejection>,
) -> Result<Json<OrderAck>, ApiError> {
    let Json(body) = payload?;
    let ack = state.handle.scheduler().place_order(body.into()).await?;
    Ok(Json(ack))
}
