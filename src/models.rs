//! Core data model: identifiers, raw market data shapes, derived
//! features, events, and the signal/tracked-signal lifecycle records.
//!
//! Feature snapshots and events are modeled as closed, typed Rust
//! values rather than stringified maps — the in-process store has no
//! wire-format constraint forcing everything through text, unlike the
//! Redis-backed system this engine's behavior is grounded on.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonicalize a symbol to the upper-case form used as a store key.
pub fn canonical_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
        }
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        match s {
            "1m" => Some(Timeframe::M1),
            "5m" => Some(Timeframe::M5),
            "15m" => Some(Timeframe::M15),
            "1h" => Some(Timeframe::H1),
            _ => None,
        }
    }

    /// Candle period in seconds, used to size the latest-kline TTL.
    pub fn period_secs(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3600,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub base_vol: f64,
    pub quote_vol: f64,
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Depth {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarkPriceInfo {
    pub mark: f64,
    pub index: f64,
    pub funding_rate: f64,
    pub next_funding_time: i64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiqSide {
    /// A long position was force-closed.
    Sell,
    /// A short position was force-closed.
    Buy,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Liquidation {
    pub side: LiqSide,
    pub price: f64,
    pub qty: f64,
    pub trade_time: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OiPoint {
    pub oi: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FundingPoint {
    pub funding_rate: f64,
    pub mark: f64,
    pub index: f64,
    pub next_funding_time: i64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureState {
    Uptrend,
    Downtrend,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Breakout {
    Bullish,
    Bearish,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bias {
    Bullish,
    Bearish,
}

impl Bias {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bias::Bullish => "bullish",
            Bias::Bearish => "bearish",
        }
    }
}

/// Per-symbol, per-timeframe derived features (§4.3 of SPEC_FULL.md).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub structure_state: StructureState,
    pub breakout: Breakout,
    pub breakout_level: f64,
    pub atr: f64,
    pub range_expansion: f64,
    pub ema_slope: f64,
    pub vwap_distance: f64,
    pub oi_delta: f64,
    pub funding_zscore: f64,
    pub liq_long: u32,
    pub liq_short: u32,
    pub liq_ratio: f64,
    pub liq_total_usd: f64,
    pub ob_imbalance: f64,
    pub bid_wall: bool,
    pub ask_wall: bool,
    pub ts: i64,
}

impl Default for FeatureSnapshot {
    fn default() -> Self {
        FeatureSnapshot {
            structure_state: StructureState::Neutral,
            breakout: Breakout::None,
            breakout_level: 0.0,
            atr: 0.0,
            range_expansion: 1.0,
            ema_slope: 0.0,
            vwap_distance: 0.0,
            oi_delta: 0.0,
            funding_zscore: 0.0,
            liq_long: 0,
            liq_short: 0,
            liq_ratio: 1.0,
            liq_total_usd: 0.0,
            ob_imbalance: 0.0,
            bid_wall: false,
            ask_wall: false,
            ts: 0,
        }
    }
}

/// A discrete market event (§3.4, §4.4). Consumers pattern-match; the
/// tagged variants replace the original ad-hoc string+dict shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    LiquidationSpike {
        symbol: String,
        total_usd: f64,
        ratio: f64,
        bias: Bias,
        ts: i64,
    },
    OiExpansion {
        symbol: String,
        oi_delta_pct: f64,
        ts: i64,
    },
    AtrExpansion {
        symbol: String,
        range_expansion: f64,
        ts: i64,
    },
    StructureBreakout {
        symbol: String,
        direction: Breakout,
        level: f64,
        ts: i64,
    },
    ImbalanceFlip {
        symbol: String,
        from: f64,
        to: f64,
        bias: Bias,
        ts: i64,
    },
    FundingExtreme {
        symbol: String,
        zscore: f64,
        bias: Bias,
        ts: i64,
    },
}

impl Event {
    pub fn symbol(&self) -> &str {
        match self {
            Event::LiquidationSpike { symbol, .. }
            | Event::OiExpansion { symbol, .. }
            | Event::AtrExpansion { symbol, .. }
            | Event::StructureBreakout { symbol, .. }
            | Event::ImbalanceFlip { symbol, .. }
            | Event::FundingExtreme { symbol, .. } => symbol,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Event::LiquidationSpike { .. } => "liquidation_spike",
            Event::OiExpansion { .. } => "oi_expansion",
            Event::AtrExpansion { .. } => "atr_expansion",
            Event::StructureBreakout { .. } => "structure_breakout",
            Event::ImbalanceFlip { .. } => "imbalance_flip",
            Event::FundingExtreme { .. } => "funding_extreme",
        }
    }

    pub fn bias(&self) -> Option<Bias> {
        match self {
            Event::LiquidationSpike { bias, .. }
            | Event::ImbalanceFlip { bias, .. }
            | Event::FundingExtreme { bias, .. } => Some(*bias),
            Event::StructureBreakout { direction, .. } => match direction {
                Breakout::Bullish => Some(Bias::Bullish),
                Breakout::Bearish => Some(Bias::Bearish),
                Breakout::None => None,
            },
            Event::OiExpansion { .. } | Event::AtrExpansion { .. } => None,
        }
    }

    pub fn ts(&self) -> i64 {
        match self {
            Event::LiquidationSpike { ts, .. }
            | Event::OiExpansion { ts, .. }
            | Event::AtrExpansion { ts, .. }
            | Event::StructureBreakout { ts, .. }
            | Event::ImbalanceFlip { ts, .. }
            | Event::FundingExtreme { ts, .. } => *ts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Open,
    TpHit,
    SlHit,
    Expired,
    Manual,
    Reversed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Open => "open",
            Outcome::TpHit => "tp_hit",
            Outcome::SlHit => "sl_hit",
            Outcome::Expired => "expired",
            Outcome::Manual => "manual",
            Outcome::Reversed => "reversed",
        }
    }
}

/// Tracker-owned lifecycle record (§3.3). Exactly one `Outcome::Open`
/// entry may exist per symbol at any time; the Tracker is the sole
/// writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedSignal {
    pub symbol: String,
    pub direction: Direction,
    pub score: f64,
    pub entry_price: f64,
    pub tp_price: f64,
    pub sl_price: f64,
    pub atr_at_entry: f64,
    pub opened_at: i64,
    pub ttl: i64,
    pub outcome: Outcome,
    pub closed_at: Option<i64>,
    pub close_price: Option<f64>,
    pub pnl_pct: Option<f64>,
    pub trigger_events: Vec<String>,
}

/// A produced signal (§3.5), pre- or post-arming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub score: f64,
    pub mtf_score: f64,
    pub mtf_aligned: bool,
    pub trigger_events: Vec<String>,
    pub features_snapshot: FeatureSnapshot,
    pub timestamp: i64,
    pub entry_price: Option<f64>,
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub atr: Option<f64>,
}

/// Value emitted to the presentation bridge's WebSocket fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WsEvent {
    Signal(Signal),
    Event(Event),
}

/// Narrow interface for the optional AI overlay (§4.5.2). No
/// implementation ships in this repository; the seam exists so the
/// Signal Engine's overlay gate is exercisable with a stub.
pub struct Prediction {
    pub probability_long: f64,
    pub probability_short: f64,
    pub confidence: f64,
}

pub trait DirectionalPredictor: Send + Sync {
    fn predict(&self, features: &FeatureSnapshot) -> Prediction;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_symbols() {
        assert_eq!(canonical_symbol(" btcusdt "), "BTCUSDT");
    }

    #[test]
    fn timeframe_roundtrips() {
        for tf in Timeframe::ALL {
            assert_eq!(Timeframe::parse(tf.as_str()), Some(tf));
        }
    }

    #[test]
    fn event_accessors() {
        let e = Event::FundingExtreme {
            symbol: "BTCUSDT".into(),
            zscore: 3.0,
            bias: Bias::Bearish,
            ts: 1,
        };
        assert_eq!(e.symbol(), "BTCUSDT");
        assert_eq!(e.event_type(), "funding_extreme");
        assert_eq!(e.bias(), Some(Bias::Bearish));
    }
}
