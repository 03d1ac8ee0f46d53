//! signal-engine — real-time market-signal engine for perpetual
//! futures. Composition root: loads configuration, wires the Raw
//! Store, Update Bus, Event Queue, Tracker, Persistence Sink and
//! Metrics registry, spawns every cooperative task on a single
//! current-thread runtime, and serves the presentation bridge.
//!
//! Grounded on the teacher's `main.rs` (`load_env`, `init_tracing`,
//! `tokio::spawn` wiring pattern, axum router assembly).

mod bridge;
mod config;
mod error;
mod event_engine;
mod feature_engine;
mod ingestion;
mod metrics;
mod models;
mod persistence;
mod raw_store;
mod signal_engine;
mod tracker;
mod update_bus;

use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use event_engine::{event_queue, EventEngine};
use feature_engine::FeatureEngine;
use ingestion::{build_stream_chunks, run_liquidation_session, run_stream_session, IngestionContext};
use persistence::SqliteRepository;
use raw_store::RawStore;
use signal_engine::SignalEngine;
use tracker::Tracker;
use update_bus::update_bus;

fn load_env() {
    if dotenv::dotenv().is_err() {
        // No .env file is fine; configuration falls back to defaults/env vars.
    }
}

fn init_tracing(log_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    load_env();
    let cfg = Config::from_env();
    init_tracing(&cfg.log_filter);

    tracing::info!(symbols = cfg.symbols.len(), "starting signal engine");

    let shutdown = Arc::new(AtomicBool::new(false));

    let store = Arc::new(RawStore::new(
        cfg.structure_lookback,
        cfg.atr_period,
        cfg.oi_delta_window,
        cfg.funding_zscore_window,
    ));
    let (bus, bus_rx) = update_bus(cfg.event_queue_maxsize);
    let (event_tx, event_rx) = event_queue(cfg.event_queue_maxsize);
    let tracker = Arc::new(Tracker::new(&cfg));
    let repository = Arc::new(
        SqliteRepository::open(&cfg.sqlite_db_path).context("opening persistence sink")?,
    );
    let (broadcast_tx, _) = broadcast::channel(1024);

    let (closed_tx, mut closed_rx) = tokio::sync::mpsc::unbounded_channel();
    tracker.set_close_notifier(closed_tx);

    if let Ok(open) = repository.list_open().await {
        if !open.is_empty() {
            tracing::info!(count = open.len(), "restoring open signals from persistence");
            tracker.restore_open(open);
        }
    }

    let metrics_addr: SocketAddr = cfg
        .metrics_bind_addr
        .parse()
        .context("parsing metrics bind address")?;
    let metrics_handle = metrics::install_recorder(metrics_addr)?;

    let mut tasks = Vec::new();

    // --- Ingestion ---
    let http_client = Client::builder()
        .build()
        .context("building reqwest client")?;
    let ingestion_ctx = Arc::new(IngestionContext {
        store: store.clone(),
        bus: bus.clone_sender(),
    });

    for (i, chunk) in build_stream_chunks(&cfg).into_iter().enumerate() {
        let ctx = ingestion_ctx.clone();
        let base_ws = cfg.binance_futures_ws.clone();
        let ping_interval = cfg.ws_ping_interval;
        let reconnect_delay = cfg.ws_reconnect_delay;
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            run_stream_session(i as u64, base_ws, chunk, ctx, ping_interval, reconnect_delay, shutdown).await;
        }));
    }

    {
        let ctx = ingestion_ctx.clone();
        let base_ws = cfg.binance_futures_ws.clone();
        let ping_interval = cfg.ws_ping_interval;
        let reconnect_delay = cfg.ws_reconnect_delay;
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            run_liquidation_session(9999, base_ws, ctx, ping_interval, reconnect_delay, shutdown).await;
        }));
    }

    {
        let client = http_client.clone();
        let base_url = cfg.binance_futures_rest.clone();
        let symbols = cfg.symbols.clone();
        let store = store.clone();
        let bus = bus.clone_sender();
        let interval = cfg.funding_poll_interval;
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            ingestion::rest::run_open_interest_poller(client, base_url, symbols, store, bus, interval, shutdown).await;
        }));
    }
    {
        let client = http_client.clone();
        let base_url = cfg.binance_futures_rest.clone();
        let symbols = cfg.symbols.clone();
        let store = store.clone();
        let bus = bus.clone_sender();
        let interval = cfg.funding_poll_interval;
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            ingestion::rest::run_funding_poller(client, base_url, symbols, store, bus, interval, shutdown).await;
        }));
    }

    // --- Feature engine ---
    let feature_engine = Arc::new(FeatureEngine::new(store.clone(), cfg.clone()));
    {
        let engine = feature_engine.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            engine.run_reactive(bus_rx, shutdown).await;
        }));
    }
    {
        let engine = feature_engine.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            engine.run_staleness_sweep(shutdown).await;
        }));
    }

    // --- Event engine ---
    {
        let engine = EventEngine::new(store.clone(), cfg.clone(), event_tx);
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            engine.run(shutdown).await;
        }));
    }

    // --- Signal engine ---
    {
        let engine = Arc::new(SignalEngine::new(
            store.clone(),
            cfg.clone(),
            tracker.clone(),
            repository.clone(),
            broadcast_tx.clone(),
            None,
        ));
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            engine.run(event_rx, shutdown).await;
        }));
    }

    // --- Tracker price monitor ---
    {
        let tracker = tracker.clone();
        let store = store.clone();
        let interval = cfg.price_check_interval;
        let symbols = cfg.symbols.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            while !shutdown.load(std::sync::atomic::Ordering::Relaxed) {
                tick.tick().await;
                for symbol in &symbols {
                    if let Some(mark) = store.get_mark_price(symbol) {
                        tracker.check_price(symbol, mark.mark);
                    }
                }
            }
        }));
    }

    // --- Persistence flush loop ---
    {
        let repository = repository.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            repository.run_flush_loop(shutdown).await;
        }));
    }

    // --- Tracker close-event persistence ---
    {
        let repository = repository.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(closed) = closed_rx.recv().await {
                let _ = repository.record_performance(closed).await;
            }
        }));
    }

    // --- Presentation bridge ---
    let bridge_state = bridge::BridgeState {
        repository: repository.clone(),
        broadcast_tx: broadcast_tx.clone(),
        metrics_handle,
    };
    let router = bridge::build_router(bridge_state);
    let http_addr: SocketAddr = cfg.http_bind_addr.parse().context("parsing http bind address")?;
    let listener = TcpListener::bind(http_addr).await.context("binding http listener")?;
    tracing::info!(%http_addr, "presentation bridge listening");

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "presentation bridge server error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    Ok(())
}
