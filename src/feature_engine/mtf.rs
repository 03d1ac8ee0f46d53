//! Multi-timeframe alignment, ported from
//! `original_source/app/features/mtf.py`: each timeframe casts a
//! weighted direction vote, alignment requires a minimum number of
//! timeframes agreeing with a strict majority over the opposite side.

use crate::config::Config;
use crate::models::{Breakout, Direction, FeatureSnapshot, StructureState};

const EMA_SLOPE_THRESHOLD: f64 = 0.001;
const VWAP_DISTANCE_THRESHOLD: f64 = 0.005;

/// Per-timeframe vote: EMA slope sign (+-1, only past `EMA_SLOPE_THRESHOLD`),
/// VWAP distance sign (+-1, only past `VWAP_DISTANCE_THRESHOLD`), structure
/// state (+-1), breakout direction (+-2). Returns `None` when the vote nets
/// to zero (no lean either way).
pub fn timeframe_direction(features: &FeatureSnapshot) -> Option<Direction> {
    let mut score = 0i32;
    score += sign_past(features.ema_slope, EMA_SLOPE_THRESHOLD);
    score += sign_past(features.vwap_distance, VWAP_DISTANCE_THRESHOLD);
    score += match features.structure_state {
        StructureState::Uptrend => 1,
        StructureState::Downtrend => -1,
        StructureState::Neutral => 0,
    };
    score += match features.breakout {
        Breakout::Bullish => 2,
        Breakout::Bearish => -2,
        Breakout::None => 0,
    };
    if score > 0 {
        Some(Direction::Long)
    } else if score < 0 {
        Some(Direction::Short)
    } else {
        None
    }
}

fn sign_past(v: f64, threshold: f64) -> i32 {
    if v > threshold {
        1
    } else if v < -threshold {
        -1
    } else {
        0
    }
}

pub struct MtfResult {
    pub aligned: bool,
    pub score: f64,
    pub aligned_count: usize,
    pub total: usize,
}

/// Evaluates alignment of `per_timeframe` votes toward `candidate`.
/// Requires at least `cfg.mtf_min_aligned` timeframes to agree with
/// `candidate` and a strict majority over the opposite direction.
pub fn evaluate_alignment(per_timeframe: &[Option<Direction>], candidate: Direction, cfg: &Config) -> MtfResult {
    let total = per_timeframe.len();
    let aligned_count = per_timeframe.iter().filter(|d| **d == Some(candidate)).count();
    let opposite_count = per_timeframe
        .iter()
        .filter(|d| **d == Some(candidate.opposite()))
        .count();

    let aligned = aligned_count >= cfg.mtf_min_aligned && aligned_count > opposite_count;

    let mut score = if total == 0 { 0.0 } else { aligned_count as f64 / total as f64 };
    if total >= 3 && aligned_count == total {
        score += 0.2;
    }
    let score = score.min(1.0);

    MtfResult {
        aligned,
        score,
        aligned_count,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features_with(ema_slope: f64, structure: StructureState) -> FeatureSnapshot {
        FeatureSnapshot {
            ema_slope,
            structure_state: structure,
            ..Default::default()
        }
    }

    #[test]
    fn direction_votes_toward_uptrend() {
        let f = features_with(0.01, StructureState::Uptrend);
        assert_eq!(timeframe_direction(&f), Some(Direction::Long));
    }

    #[test]
    fn zero_net_vote_is_unaligned() {
        let f = FeatureSnapshot::default();
        assert_eq!(timeframe_direction(&f), None);
    }

    #[test]
    fn alignment_requires_min_aligned_and_majority() {
        let mut cfg = Config::from_env();
        cfg.mtf_min_aligned = 2;
        let votes = vec![Some(Direction::Long), Some(Direction::Long), Some(Direction::Short)];
        let result = evaluate_alignment(&votes, Direction::Long, &cfg);
        assert!(result.aligned);
        assert_eq!(result.aligned_count, 2);
    }

    #[test]
    fn full_agreement_gets_bonus() {
        let mut cfg = Config::from_env();
        cfg.mtf_min_aligned = 2;
        let votes = vec![Some(Direction::Long); 4];
        let result = evaluate_alignment(&votes, Direction::Long, &cfg);
        assert_eq!(result.score, 1.0);
    }
}
