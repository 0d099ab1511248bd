use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use common::{Config, ExchangeGateway, PriceTick, TradingMode};
use engine::{BinanceFuturesClient, Engine, MarkPriceStream, SqliteStore};
use paper::PaperGateway;
use validator::OrderValidator;

/// Run the engine and the operator API until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let cfg = Config::from_env();
    info!(mode = %cfg.trading_mode, port = cfg.api_port, "GridTwap starting");

    let store = Arc::new(
        SqliteStore::connect(&cfg.database_url)
            .await
            .with_context(|| format!("failed to open database {}", cfg.database_url))?,
    );

    let gateway: Arc<dyn ExchangeGateway> = match cfg.trading_mode {
        TradingMode::Live => {
            info!(testnet = cfg.binance_testnet, "Live trading mode, using BinanceFuturesClient");
            Arc::new(
                BinanceFuturesClient::new(&cfg.binance_api_key, &cfg.binance_secret, cfg.binance_testnet)
                    .context("failed to build the Binance client")?,
            )
        }
        TradingMode::Paper => {
            info!(
                slippage_bps = cfg.paper_slippage_bps,
                symbols = ?cfg.paper_symbols,
                "Paper trading mode, using PaperGateway"
            );
            let paper = Arc::new(PaperGateway::new(cfg.paper_slippage_bps));
            spawn_price_feed(paper.clone(), &cfg.paper_symbols, cfg.binance_testnet);
            paper
        }
    };

    let (engine, handle) = Engine::new(
        cfg.engine.clone(),
        gateway,
        Arc::new(OrderValidator::new()),
        store.clone(),
        store.clone(),
    );
    let engine_task = tokio::spawn(engine.run());

    let state = api::AppState {
        handle: handle.clone(),
        trading_mode: cfg.trading_mode,
        api_token: cfg.api_token.clone(),
    };
    let served = api::serve(state, cfg.api_port, shutdown_signal()).await;

    handle.shutdown();
    engine_task.await.context("engine task panicked")?;
    store.pool().close().await;

    served.context("operator API failed")?;
    info!("GridTwap stopped");
    Ok(())
}

/// Stream mark prices for `symbols` into the paper venue.
fn spawn_price_feed(paper: Arc<PaperGateway>, symbols: &[String], testnet: bool) {
    let (tick_tx, mut tick_rx) = broadcast::channel::<PriceTick>(1024);
    for symbol in symbols {
        tokio::spawn(MarkPriceStream::new(symbol.clone(), testnet, tick_tx.clone()).run());
    }

    tokio::spawn(async move {
        loop {
            match tick_rx.recv().await {
                Ok(tick) => paper.update_price(&tick.symbol, tick.price).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Paper price feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
