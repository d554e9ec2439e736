//! Confidence scoring for healed element locations.
//!
//! Pure and deterministic: no I/O, no clock, no randomness.

use crate::config::HealingConfig;
use crate::db::models::{ConfidenceFactors, HealingStrategy, Point, Rect, SemanticFingerprint};

const DISTANCE_WEIGHT: f64 = 0.45;
const SIZE_WEIGHT: f64 = 0.40;
const STRATEGY_WEIGHT: f64 = 0.15;

/// Share of the size score driven by area; the rest is aspect ratio.
const AREA_SHARE: f64 = 0.7;

/// Score lost across the tolerance band before the steep decay starts.
const IN_TOLERANCE_PENALTY: f64 = 10.0;

const NORMAL_STRATEGY_SCORE: u8 = 100;
const DEEP_THINK_STRATEGY_SCORE: u8 = 70;

/// Confidence plus the factors it was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfidenceScore {
    pub confidence: u8,
    pub factors: ConfidenceFactors,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceCalculator {
    distance_tolerance_px: f64,
    max_distance_px: f64,
}

impl Default for ConfidenceCalculator {
    fn default() -> Self {
        Self::from_config(&HealingConfig::default())
    }
}

impl ConfidenceCalculator {
    /// Callers are expected to pass `0 < tolerance < max_distance`; out-of-range
    /// values are clamped into a usable band.
    pub fn new(distance_tolerance_px: f64, max_distance_px: f64) -> Self {
        let tolerance = if distance_tolerance_px.is_finite() && distance_tolerance_px > 0.0 {
            distance_tolerance_px
        } else {
            1.0
        };
        let max_distance = if max_distance_px.is_finite() && max_distance_px > tolerance {
            max_distance_px
        } else {
            tolerance * 2.0
        };
        Self {
            distance_tolerance_px: tolerance,
            max_distance_px: max_distance,
        }
    }

    pub fn from_config(config: &HealingConfig) -> Self {
        Self::new(config.distance_tolerance_px, config.max_distance_px)
    }

    pub fn calculate(
        &self,
        candidate_center: Point,
        candidate_rect: Rect,
        fingerprint: &SemanticFingerprint,
        strategy: HealingStrategy,
    ) -> ConfidenceScore {
        let distance = self.distance_score(&candidate_center, &fingerprint.last_known_center);
        let size = size_score(&candidate_rect, &fingerprint.last_known_rect);
        let strategy_score = strategy_score(strategy);

        let combined = DISTANCE_WEIGHT * distance
            + SIZE_WEIGHT * size
            + STRATEGY_WEIGHT * f64::from(strategy_score);

        ConfidenceScore {
            confidence: to_percent(combined),
            factors: ConfidenceFactors {
                distance_score: to_percent(distance),
                size_score: to_percent(size),
                strategy_score,
            },
        }
    }

    /// 100 at zero displacement, 90 at the tolerance edge, then linear down to 0
    /// at `max_distance_px`.
    fn distance_score(&self, candidate: &Point, last_known: &Point) -> f64 {
        if !candidate.is_finite() || !last_known.is_finite() {
            return 0.0;
        }
        let d = candidate.distance_to(last_known);
        let edge = 100.0 - IN_TOLERANCE_PENALTY;
        if d <= self.distance_tolerance_px {
            100.0 - IN_TOLERANCE_PENALTY * d / self.distance_tolerance_px
        } else {
            let span = self.max_distance_px - self.distance_tolerance_px;
            (edge * (1.0 - (d - self.distance_tolerance_px) / span)).max(0.0)
        }
    }
}

/// Area similarity blended with aspect-ratio similarity, each as `min / max`.
fn size_score(candidate: &Rect, last_known: &Rect) -> f64 {
    let (a, b) = (candidate.area(), last_known.area());
    if !a.is_finite() || !b.is_finite() {
        return 0.0;
    }
    if a == 0.0 && b == 0.0 {
        return 100.0;
    }
    if a == 0.0 || b == 0.0 {
        return 0.0;
    }
    let area_ratio = a.min(b) / a.max(b);

    let aspect_ratio = match (candidate.aspect_ratio(), last_known.aspect_ratio()) {
        (Some(x), Some(y)) => x.min(y) / x.max(y),
        _ => 0.0,
    };

    100.0 * (AREA_SHARE * area_ratio + (1.0 - AREA_SHARE) * aspect_ratio)
}

pub fn strategy_score(strategy: HealingStrategy) -> u8 {
    match strategy {
        HealingStrategy::Normal => NORMAL_STRATEGY_SCORE,
        HealingStrategy::DeepThink => DEEP_THINK_STRATEGY_SCORE,
    }
}

fn to_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}
