mod cli;
mod client;
mod serve;

use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use common::{ClientConfig, GridParams, OrderSide, TwapParams};
use strategy::StrategyFileConfig;

use cli::{Cli, Command, OrderCommand};
use client::{exit_code, ApiClient, ApiFailure};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli.command).await {
        eprintln!("error: {err:#}");
        if let Some(failure) = err.downcast_ref::<ApiFailure>() {
            for detail in &failure.details {
                eprintln!("  - {detail}");
            }
        }
        std::process::exit(exit_code(&err));
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    if let Command::Serve = command {
        return serve::run().await;
    }

    // Everything else talks to a running daemon.
    let api = ApiClient::new(ClientConfig::from_env());
    match command {
        Command::Serve => unreachable!("serve is handled above"),
        Command::StartTwap {
            symbol,
            side,
            total_quantity,
            duration_hours,
            chunks,
        } => {
            let params = TwapParams {
                symbol,
                side,
                total_quantity,
                duration_hours,
                chunks,
            };
            let body = api.post("/api/runs/twap", Some(&json!(params))).await?;
            println!("{}", body["run_id"].as_str().unwrap_or_default());
        }
        Command::StartGrid {
            symbol,
            lower,
            upper,
            levels,
            spacing,
            quantity_per_level,
        } => {
            let params = GridParams {
                symbol,
                lower_bound: lower,
                upper_bound: upper,
                level_count: levels,
                spacing_mode: spacing,
                quantity_per_level,
            };
            let body = api.post("/api/runs/grid", Some(&json!(params))).await?;
            println!("{}", body["run_id"].as_str().unwrap_or_default());
        }
        Command::StartFile { path } => {
            let file = StrategyFileConfig::load(&path).context("could not load presets")?;
            for entry in file.strategies {
                let body = api
                    .post("/api/runs", Some(&json!(entry.params)))
                    .await
                    .with_context(|| format!("preset '{}' was refused", entry.name))?;
                println!("{}\t{}", body["run_id"].as_str().unwrap_or_default(), entry.name);
            }
        }
        Command::Status { run_id, json } => {
            let body = api.get(&format!("/api/runs/{run_id}")).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&body)?);
            } else {
                print_status(&body);
            }
        }
        Command::List { state } => {
            let path = match state {
                Some(state) => format!("/api/runs?state={state}"),
                None => "/api/runs".to_string(),
            };
            let body = api.get(&path).await?;
            for run in body.as_array().into_iter().flatten() {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    run["run_id"].as_str().unwrap_or_default(),
                    run["kind"].as_str().unwrap_or_default(),
                    run["params"]["symbol"].as_str().unwrap_or_default(),
                    run["state"].as_str().unwrap_or_default(),
                    run["created_at"].as_str().unwrap_or_default(),
                );
            }
        }
        Command::Cancel { run_id } => {
            let body = api.post(&format!("/api/runs/{run_id}/cancel"), None).await?;
            println!(
                "run {run_id} cancelled: {} withdrawn, {} of {} venue cancels confirmed, {} failed",
                body["withdrawn"], body["cancelled"], body["cancel_requests"], body["failed"],
            );
        }
        Command::Order { order } => {
            let body = api.post("/api/orders", Some(&order_body(order))).await?;
            println!(
                "{}\t{}",
                body["venue_order_id"].as_str().unwrap_or_default(),
                body["status"].as_str().unwrap_or_default(),
            );
        }
    }
    Ok(())
}

fn order_body(order: OrderCommand) -> Value {
    fn body(
        symbol: String,
        side: OrderSide,
        order_type: &str,
        quantity: f64,
        price: Option<f64>,
        stop_price: Option<f64>,
        reduce_only: bool,
    ) -> Value {
        json!({
            "symbol": symbol,
            "side": side,
            "order_type": order_type,
            "quantity": quantity,
            "price": price,
            "stop_price": stop_price,
            "reduce_only": reduce_only,
        })
    }

    match order {
        OrderCommand::Market {
            symbol,
            side,
            quantity,
            reduce_only,
        } => body(symbol, side, "MARKET", quantity, None, None, reduce_only),
        OrderCommand::Limit {
            symbol,
            side,
            quantity,
            price,
            reduce_only,
        } => body(symbol, side, "LIMIT", quantity, Some(price), None, reduce_only),
        OrderCommand::StopLimit {
            symbol,
            side,
            quantity,
            price,
            stop_price,
            reduce_only,
        } => body(symbol, side, "STOP", quantity, Some(price), Some(stop_price), reduce_only),
        OrderCommand::TrailingStop {
            symbol,
            side,
            quantity,
            activation_price,
            callback_rate,
        } => {
            let mut order = body(symbol, side, "TRAILING_STOP_MARKET", quantity, None, None, true);
            order["activation_price"] = json!(activation_price);
            order["callback_rate"] = json!(callback_rate);
            order
        }
    }
}

fn print_status(body: &Value) {
    let run = &body["run"];
    println!("run      {}", run["run_id"].as_str().unwrap_or_default());
    println!(
        "kind     {} {}",
        run["kind"].as_str().unwrap_or_default(),
        run["params"]["symbol"].as_str().unwrap_or_default()
    );
    println!("state    {}", run["state"].as_str().unwrap_or_default());
    if let Some(reason) = run["failure_reason"].as_str() {
        println!("reason   {reason}");
    }
    let c = &body["counts"];
    println!(
        "children pending {} submitted {} acked {} filled {} cancelled {} rejected {}",
        c["pending"], c["submitted"], c["acked"], c["filled"], c["cancelled"], c["rejected"],
    );
    for child in body["children"].as_array().into_iter().flatten() {
        let spec = &child["spec"];
        let price = spec["target_price"]
            .as_f64()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "market".to_string());
        println!(
            "  #{:<4} {:<4} {:<12} @ {:<12} {:<9} {}",
            spec["index"],
            spec["side"].as_str().unwrap_or_default(),
            spec["quantity"],
            price,
            child["status"].as_str().unwrap_or_default(),
            child["last_error"].as_str().unwrap_or_default(),
        );
    }
}
