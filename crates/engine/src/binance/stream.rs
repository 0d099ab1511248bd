use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tracing::{info, warn};
use url::Url;

use common::{Error, PriceTick, Result};

const STREAM_URL: &str = "wss://fstream.binance.com/ws";
const TESTNET_STREAM_URL: &str = "wss://stream.binancefuture.com/ws";

/// Binance Futures mark-price WebSocket stream for a single symbol.
///
/// Parses `markPriceUpdate` events into `PriceTick` and publishes them on a
/// broadcast channel. Reconnects automatically with exponential backoff.
pub struct MarkPriceStream {
    symbol: String,
    testnet: bool,
    tick_tx: broadcast::Sender<PriceTick>,
}

impl MarkPriceStream {
    pub fn new(symbol: impl Into<String>, testnet: bool, tick_tx: broadcast::Sender<PriceTick>) -> Self {
        Self {
            symbol: symbol.into(),
            testnet,
            tick_tx,
        }
    }

    /// Run the stream loop forever, reconnecting on failure.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(60);

        loop {
            info!(symbol = %self.symbol, "Connecting to mark price stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "Mark price stream closed cleanly");
                    // The venue ends sessions after 24h.
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, backoff = ?backoff, "Mark price stream error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    fn url(&self) -> Result<Url> {
        let base = if self.testnet { TESTNET_STREAM_URL } else { STREAM_URL };
        Url::parse(&format!("{base}/{}@markPrice@1s", self.symbol.to_lowercase()))
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    async fn connect_once(&self) -> Result<()> {
        let (ws_stream, _) = connect_async(self.url()?)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;

            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_mark_price(&text) {
                    Ok(Some(tick)) => {
                        // No receivers is fine.
                        let _ = self.tick_tx.send(tick);
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to parse mark price event"),
                }
            }
        }

        Ok(())
    }
}

#[derive(Deserialize)]
struct MarkPriceEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    event_time_ms: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    mark_price: String,
}

fn parse_mark_price(text: &str) -> Result<Option<PriceTick>> {
    let event: MarkPriceEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        // Subscription acks and other frames carry no mark price.
        Err(_) => return Ok(None),
    };
    if event.event_type != "markPriceUpdate" {
        return Ok(None);
    }

    let price: f64 = event
        .mark_price
        .parse()
        .map_err(|_| Error::WebSocket(format!("bad mark price '{}'", event.mark_price)))?;

    let timestamp: DateTime<Utc> = Utc
        .timestamp_millis_opt(event.event_time_ms)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(Some(PriceTick {
        symbol: event.symbol,
        price,
        timestamp,
    }))
}
