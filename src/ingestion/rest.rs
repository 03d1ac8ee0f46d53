//! REST polling loops for open interest and funding rate, grounded on
//! `original_source/app/collectors/handlers.py::poll_open_interest` /
//! `poll_funding_rate`: sweep the symbol universe with a short pause
//! between requests, log and continue on a single symbol's failure
//! rather than aborting the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::models::{now_ts, FundingPoint, OiPoint};
use crate::raw_store::RawStore;
use crate::update_bus::{DataKind, UpdateBus};

use super::validation::{validate_funding, validate_open_interest};

const PER_SYMBOL_PACING: Duration = Duration::from_millis(50);

pub async fn run_open_interest_poller(
    client: Client,
    base_url: String,
    symbols: Vec<String>,
    store: Arc<RawStore>,
    bus: UpdateBus,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut tick = tokio::time::interval(interval);
    while !shutdown.load(Ordering::Relaxed) {
        tick.tick().await;
        for symbol in &symbols {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let url = format!("{base_url}/fapi/v1/openInterest?symbol={symbol}");
            match client.get(&url).send().await {
                Ok(resp) => match resp.json::<serde_json::Value>().await {
                    Ok(body) => match validate_open_interest(&body) {
                        Some(oi) => {
                            store.push_oi(symbol, OiPoint { oi, ts: now_ts() });
                            bus.publish(symbol, DataKind::OpenInterest);
                        }
                        None => {
                            metrics::counter!("ingest_invalid_total", "kind" => "open_interest").increment(1);
                        }
                    },
                    Err(e) => tracing::warn!(symbol, error = %e, "open interest decode failed"),
                },
                Err(e) => tracing::warn!(symbol, error = %e, "open interest request failed"),
            }
            tokio::time::sleep(PER_SYMBOL_PACING).await;
        }
    }
}

pub async fn run_funding_poller(
    client: Client,
    base_url: String,
    symbols: Vec<String>,
    store: Arc<RawStore>,
    bus: UpdateBus,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    let mut tick = tokio::time::interval(interval);
    while !shutdown.load(Ordering::Relaxed) {
        tick.tick().await;
        for symbol in &symbols {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let url = format!("{base_url}/fapi/v1/premiumIndex?symbol={symbol}");
            match client.get(&url).send().await {
                Ok(resp) => match resp.json::<serde_json::Value>().await {
                    Ok(body) => match validate_funding(&body) {
                        Some((funding_rate, mark, index, next_funding_time)) => {
                            store.push_funding(
                                symbol,
                                FundingPoint {
                                    funding_rate,
                                    mark,
                                    index,
                                    next_funding_time,
                                    ts: now_ts(),
                                },
                            );
                            bus.publish(symbol, DataKind::Funding);
                        }
                        None => {
                            metrics::counter!("ingest_invalid_total", "kind" => "funding").increment(1);
                        }
                    },
                    Err(e) => tracing::warn!(symbol, error = %e, "funding decode failed"),
                },
                Err(e) => tracing::warn!(symbol, error = %e, "funding request failed"),
            }
            tokio::time::sleep(PER_SYMBOL_PACING).await;
        }
    }
}
