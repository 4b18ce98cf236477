mod analysis;
mod api;
mod client;
mod config;
mod db;
mod error;
mod scan;
mod sources;
mod types;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::config::Config;
use crate::db::{MarketVerdict, ScanStore};
use crate::error::Result;
use crate::scan::{RunOutcome, ScanOrchestrator, Upstreams};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "scan".to_string());
    let result = match command.as_str() {
        "scan" => scan(cfg).await,
        "serve" => serve(cfg).await.map(|()| true),
        other => {
            eprintln!("Unknown command {other:?}. Usage: scanner [scan|serve]");
            std::process::exit(2);
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Fatal error: {e}");
            std::process::exit(1);
        }
    }
}

/// Run one scan. Returns whether the run reached `Completed`.
async fn scan(cfg: Config) -> Result<bool> {
    let store = ScanStore::open(&cfg.db_path).await?;
    let upstreams = Upstreams::from_config(&cfg)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling scan");
            let _ = shutdown_tx.send(true);
        }
    });

    let orchestrator = ScanOrchestrator::new(cfg.scan.clone(), store.clone(), upstreams);
    let outcome = orchestrator.run(shutdown_rx).await?;
    report(&store, &outcome).await?;
    Ok(outcome.succeeded())
}

async fn report(store: &ScanStore, outcome: &RunOutcome) -> Result<()> {
    for skip in &outcome.summary.skips {
        info!(
            market_id = %skip.market_id,
            stage = %skip.stage,
            "[SKIP] {}",
            skip.reason
        );
    }
    if !outcome.succeeded() {
        warn!(run_id = outcome.run_id, "Run did not complete; results are partial");
        return Ok(());
    }

    let flagged = store.flagged_for_run(outcome.run_id).await?;
    info!(run_id = outcome.run_id, "{} markets flagged", flagged.len());
    for entry in &flagged {
        log_flagged(entry);
    }
    Ok(())
}

fn log_flagged(entry: &MarketVerdict) {
    let v = &entry.verdict;
    let Some(side) = v.flagged_side else {
        return;
    };
    let winner = v.metrics(side);
    let loser = v.metrics(side.opposite());
    info!(
        event = "FLAGGED",
        market_id = %entry.market.id,
        side = %side,
        score = v.imbalance_score,
        "FLAGGED {side} | score: {:.1} | profitable: {:.0}% vs {:.0}% | avg pnl: ${:.0} vs ${:.0} | yes/no: {:.2}/{:.2} | {}",
        v.imbalance_score,
        winner.profitable_fraction * 100.0,
        loser.profitable_fraction * 100.0,
        winner.avg_pnl,
        loser.avg_pnl,
        entry.market.yes_price,
        entry.market.no_price,
        entry.market.question,
    );
}

/// Serve the read-only results API until the process is stopped.
async fn serve(cfg: Config) -> Result<()> {
    let store = ScanStore::open(&cfg.db_path).await?;
    let app = router(ApiState { store });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
