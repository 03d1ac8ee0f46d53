//! Weighted composite scorer and direction vote, ported from
//! `original_source/app/signals/scoring.py`. Component weights sum to
//! 1.0 exactly.

use crate::models::{Bias, Breakout, Direction, Event, FeatureSnapshot, StructureState};

const W_TREND: f64 = 0.20;
const W_LIQUIDATION: f64 = 0.15;
const W_VOLATILITY: f64 = 0.15;
const W_VWAP: f64 = 0.10;
const W_OI: f64 = 0.15;
const W_STRUCTURE: f64 = 0.15;
const W_EVENT_QUALITY: f64 = 0.10;

pub struct Scored {
    pub score: f64,
    pub direction: Direction,
    pub components: ScoreComponents,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreComponents {
    pub trend: f64,
    pub liquidation: f64,
    pub volatility: f64,
    pub vwap: f64,
    pub oi: f64,
    pub structure: f64,
    pub event_quality: f64,
}

pub fn score_signal(features: &FeatureSnapshot, events: &[Event]) -> Scored {
    let direction = vote_direction(features, events);

    let trend_score = if features.ema_slope.abs() < 0.001 {
        0.0
    } else {
        (features.ema_slope.abs() / 0.01).min(1.0)
    };

    let liq_score = if features.liq_ratio > 1.3 {
        ((features.liq_ratio - 1.0) / 2.0).min(1.0)
    } else if features.liq_ratio < 0.7 {
        ((1.0 - features.liq_ratio) / 0.7).min(1.0)
    } else {
        0.2
    };

    let volatility_score = ((features.range_expansion - 1.0) / 2.0).max(0.0).min(1.0);

    let vwap_score = (features.vwap_distance.abs() / 0.02).min(1.0);

    let mut oi_score = features.oi_delta.abs().min(1.0) * 10.0;
    oi_score = oi_score.min(1.0);
    if features.oi_delta < -0.02 {
        oi_score *= 0.5;
    }

    let structure_score = match (features.structure_state, direction) {
        (StructureState::Uptrend, Direction::Long) | (StructureState::Downtrend, Direction::Short) => 1.0,
        (StructureState::Neutral, _) => 0.3,
        _ => 0.0,
    };
    let structure_score = match (features.breakout, direction) {
        (Breakout::Bullish, Direction::Long) | (Breakout::Bearish, Direction::Short) => (structure_score + 0.3).min(1.0),
        _ => structure_score,
    };

    let unique_event_types = {
        let mut kinds: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        kinds.len()
    };
    let event_quality_score = (unique_event_types as f64 / 4.0).min(1.0);

    let score = trend_score * W_TREND
        + liq_score * W_LIQUIDATION
        + volatility_score * W_VOLATILITY
        + vwap_score * W_VWAP
        + oi_score * W_OI
        + structure_score * W_STRUCTURE
        + event_quality_score * W_EVENT_QUALITY;

    Scored {
        score: score.clamp(0.0, 1.0),
        direction,
        components: ScoreComponents {
            trend: trend_score,
            liquidation: liq_score,
            volatility: volatility_score,
            vwap: vwap_score,
            oi: oi_score,
            structure: structure_score,
            event_quality: event_quality_score,
        },
    }
}

/// Bull/bear tally across trend, vwap, liquidation, structure,
/// breakout, plus event-level bias/direction hints. Ties break long.
fn vote_direction(features: &FeatureSnapshot, events: &[Event]) -> Direction {
    let mut bull = 0i32;
    let mut bear = 0i32;

    if features.ema_slope > 0.0 {
        bull += 1;
    } else if features.ema_slope < 0.0 {
        bear += 1;
    }

    if features.vwap_distance > 0.0 {
        bull += 1;
    } else if features.vwap_distance < 0.0 {
        bear += 1;
    }

    if features.liq_long > features.liq_short {
        bear += 1;
    } else if features.liq_short > features.liq_long {
        bull += 1;
    }

    match features.structure_state {
        StructureState::Uptrend => bull += 1,
        StructureState::Downtrend => bear += 1,
        StructureState::Neutral => {}
    }

    match features.breakout {
        Breakout::Bullish => bull += 2,
        Breakout::Bearish => bear += 2,
        Breakout::None => {}
    }

    for event in events {
        match event.bias() {
            Some(Bias::Bullish) => bull += 1,
            Some(Bias::Bearish) => bear += 1,
            None => {}
        }
    }

    if bear > bull {
        Direction::Short
    } else {
        Direction::Long
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_snapshot_scores_low_but_defaults_long() {
        let features = FeatureSnapshot::default();
        let scored = score_signal(&features, &[]);
        assert!(scored.score < 0.5);
        assert_eq!(scored.direction, Direction::Long);
    }

    #[test]
    fn bearish_confluence_votes_short() {
        let mut features = FeatureSnapshot::default();
        features.ema_slope = -0.05;
        features.vwap_distance = -0.02;
        features.structure_state = StructureState::Downtrend;
        features.breakout = Breakout::Bearish;
        let scored = score_signal(&features, &[]);
        assert_eq!(scored.direction, Direction::Short);
    }

    #[test]
    fn oi_score_halves_on_strong_contraction() {
        let mut features = FeatureSnapshot::default();
        features.oi_delta = -0.05;
        let scored = score_signal(&features, &[]);
        assert!(scored.components.oi <= 0.5 + 1e-9);
    }

    #[test]
    fn liquidation_neutral_fallback_without_liquidations() {
        let features = FeatureSnapshot::default();
        let scored = score_signal(&features, &[]);
        assert_eq!(scored.components.liquidation, 0.2);
    }
}
