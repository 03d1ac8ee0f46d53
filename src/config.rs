//! Single immutable configuration record, loaded once at startup via
//! [`Config::from_env`] and threaded through the composition root —
//! no global singleton, matching the teacher's `models.rs::Config`
//! idiom and the field list of `original_source/app/core/config.py`.

use std::env;
use std::time::Duration;

use crate::models::Timeframe;

#[derive(Debug, Clone)]
pub struct Config {
    // Networking
    pub binance_futures_ws: String,
    pub binance_futures_rest: String,
    pub ws_max_streams_per_conn: usize,
    pub ws_reconnect_delay: Duration,
    pub ws_ping_interval: Duration,

    // Universe
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub primary_timeframe: Timeframe,

    // MTF alignment
    pub mtf_alignment_required: bool,
    pub mtf_min_aligned: usize,

    // Feature windows
    pub atr_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub vwap_period: usize,
    pub funding_zscore_window: usize,
    pub oi_delta_window: usize,
    pub liq_ratio_window: usize,
    pub structure_lookback: usize,
    pub orderbook_imbalance_threshold: f64,
    pub wall_pressure_threshold: f64,

    // Event engine
    pub event_queue_maxsize: usize,
    pub liq_spike_threshold: f64,
    pub oi_expansion_threshold: f64,
    pub atr_expansion_threshold: f64,
    pub funding_extreme_threshold: f64,
    pub imbalance_flip_threshold: f64,

    // Signal engine
    pub signal_score_threshold: f64,
    pub signal_cooldown_seconds: i64,
    pub ai_overlay_enabled: bool,
    pub ai_confidence_threshold: f64,

    // Tracker
    pub tracker_enabled: bool,
    pub tp_atr_multiplier: f64,
    pub sl_atr_multiplier: f64,
    pub signal_max_ttl: i64,
    pub price_check_interval: Duration,

    // REST pollers
    pub funding_poll_interval: Duration,

    // Persistence
    pub sqlite_db_path: String,

    // Observability / bridge
    pub metrics_bind_addr: String,
    pub http_bind_addr: String,
    pub log_filter: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        let symbols = env::var("SYMBOLS")
            .ok()
            .map(|v| {
                v.split(',')
                    .map(|s| crate::models::canonical_symbol(s))
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_symbol_universe);

        let timeframes = env::var("TIMEFRAMES")
            .ok()
            .map(|v| {
                v.split(',')
                    .filter_map(|s| Timeframe::parse(s.trim()))
                    .collect::<Vec<_>>()
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| vec![Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1]);

        let primary_timeframe = env::var("PRIMARY_TIMEFRAME")
            .ok()
            .and_then(|s| Timeframe::parse(&s))
            .unwrap_or(Timeframe::M5);

        Config {
            binance_futures_ws: env_or(
                "BINANCE_FUTURES_WS",
                "wss://fstream.binance.com/stream",
            ),
            binance_futures_rest: env_or(
                "BINANCE_FUTURES_REST",
                "https://fapi.binance.com",
            ),
            ws_max_streams_per_conn: env_parse("WS_MAX_STREAMS_PER_CONN", 200),
            ws_reconnect_delay: Duration::from_secs_f64(env_parse("WS_RECONNECT_DELAY", 3.0)),
            ws_ping_interval: Duration::from_secs_f64(env_parse("WS_PING_INTERVAL", 20.0)),

            symbols,
            timeframes,
            primary_timeframe,

            mtf_alignment_required: env_parse("MTF_ALIGNMENT_REQUIRED", true),
            mtf_min_aligned: env_parse("MTF_MIN_ALIGNED", 2usize),

            atr_period: env_parse("ATR_PERIOD", 14usize),
            ema_fast: env_parse("EMA_FAST", 9usize),
            ema_slow: env_parse("EMA_SLOW", 21usize),
            vwap_period: env_parse("VWAP_PERIOD", 20usize),
            funding_zscore_window: env_parse("FUNDING_ZSCORE_WINDOW", 50usize),
            oi_delta_window: env_parse("OI_DELTA_WINDOW", 10usize),
            liq_ratio_window: env_parse("LIQ_RATIO_WINDOW", 20usize),
            structure_lookback: env_parse("STRUCTURE_LOOKBACK", 20usize),
            orderbook_imbalance_threshold: env_parse("ORDERBOOK_IMBALANCE_THRESHOLD", 0.3),
            wall_pressure_threshold: env_parse("WALL_PRESSURE_THRESHOLD", 5.0),

            event_queue_maxsize: env_parse("EVENT_QUEUE_MAXSIZE", 10_000usize),
            liq_spike_threshold: env_parse("LIQ_SPIKE_THRESHOLD", 2.0),
            oi_expansion_threshold: env_parse("OI_EXPANSION_THRESHOLD", 1.5),
            atr_expansion_threshold: env_parse("ATR_EXPANSION_THRESHOLD", 1.5),
            funding_extreme_threshold: env_parse("FUNDING_EXTREME_THRESHOLD", 2.5),
            imbalance_flip_threshold: env_parse("IMBALANCE_FLIP_THRESHOLD", 0.2),

            signal_score_threshold: env_parse("SIGNAL_SCORE_THRESHOLD", 0.50),
            signal_cooldown_seconds: env_parse("SIGNAL_COOLDOWN_SECONDS", 300i64),
            ai_overlay_enabled: env_parse("AI_OVERLAY_ENABLED", false),
            ai_confidence_threshold: env_parse("AI_CONFIDENCE_THRESHOLD", 0.50),

            tracker_enabled: env_parse("TRACKER_ENABLED", true),
            tp_atr_multiplier: env_parse("TP_ATR_MULTIPLIER", 2.0),
            sl_atr_multiplier: env_parse("SL_ATR_MULTIPLIER", 1.0),
            signal_max_ttl: env_parse("SIGNAL_MAX_TTL", 3600i64),
            price_check_interval: Duration::from_secs_f64(env_parse("PRICE_CHECK_INTERVAL", 1.0)),

            funding_poll_interval: Duration::from_secs_f64(env_parse("FUNDING_POLL_INTERVAL", 120.0)),

            sqlite_db_path: env_or("SQLITE_DB_PATH", "signal_engine.db"),

            metrics_bind_addr: env_or("METRICS_BIND_ADDR", "0.0.0.0:9898"),
            http_bind_addr: env_or("HTTP_BIND_ADDR", "0.0.0.0:3000"),
            log_filter: env_or("LOG_FILTER", "signal_engine=info,tower_http=info"),
        }
    }
}

fn default_symbol_universe() -> Vec<String> {
    [
        "BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT", "DOGEUSDT", "ADAUSDT", "AVAXUSDT",
        "LINKUSDT", "LTCUSDT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_env() {
        let cfg = Config::from_env();
        assert!(!cfg.symbols.is_empty());
        assert_eq!(cfg.primary_timeframe, Timeframe::M5);
        assert!(cfg.signal_score_threshold > 0.0 && cfg.signal_score_threshold < 1.0);
        assert_eq!(cfg.signal_max_ttl, 3600);
    }
}
