//! Routing strategy engine.
//!
//! # Responsibilities
//! - Score every candidate for one routing decision (higher is better)
//! - Pick the winner, breaking ties by input order
//!
//! # Design Decisions
//! - Strategies are a tagged enum dispatched to pure functions
//! - Operates on caller-owned candidate lists; no shared state
//! - Unknown strategy names deserialize to `Fallback` so routing never stalls
//! - Non-finite or negative inputs are sanitized so scores stay finite

use serde::{Deserialize, Serialize};

use crate::backends::BackendCandidate;
use crate::error::GatewayError;

/// Guards the inverse terms against free or instantaneous backends.
pub const EPSILON: f64 = 0.001;

pub const COST_WEIGHT: f64 = 0.3;
pub const LATENCY_WEIGHT: f64 = 0.5;
pub const HEALTH_WEIGHT: f64 = 0.2;

/// How candidates are scored for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// `1 / (cost + ε)`.
    CostOptimized,
    /// `1 / (latency + ε)`.
    LatencyBased,
    /// Min-max normalized blend of cost, latency and health.
    #[default]
    Intelligent,
    /// Un-normalized blend with the same weights. Used for unrecognized names.
    #[serde(other)]
    Fallback,
}

impl RoutingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::CostOptimized => "cost_optimized",
            RoutingStrategy::LatencyBased => "latency_based",
            RoutingStrategy::Intelligent => "intelligent",
            RoutingStrategy::Fallback => "fallback",
        }
    }
}

impl std::str::FromStr for RoutingStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "cost_optimized" => RoutingStrategy::CostOptimized,
            "latency_based" => RoutingStrategy::LatencyBased,
            "intelligent" => RoutingStrategy::Intelligent,
            _ => RoutingStrategy::Fallback,
        })
    }
}

impl std::fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn metric(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else if value.is_infinite() {
        f64::MAX
    } else {
        value
    }
}

fn health(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn inverse(value: f64) -> f64 {
    1.0 / (metric(value) + EPSILON)
}

/// `(min, range)` of a metric, with range 1.0 when the set is degenerate.
fn spread(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let range = if max > min { max - min } else { 1.0 };
    (min, range)
}

/// Compute `score` for every candidate.
pub fn score(candidates: &mut [BackendCandidate], strategy: RoutingStrategy) {
    match strategy {
        RoutingStrategy::CostOptimized => {
            for c in candidates.iter_mut() {
                c.score = inverse(c.cost);
            }
        }
        RoutingStrategy::LatencyBased => {
            for c in candidates.iter_mut() {
                c.score = inverse(c.latency_ms);
            }
        }
        RoutingStrategy::Intelligent => {
            if candidates.is_empty() {
                return;
            }
            let (min_cost, cost_range) = spread(candidates.iter().map(|c| metric(c.cost)));
            let (min_latency, latency_range) =
                spread(candidates.iter().map(|c| metric(c.latency_ms)));

            for c in candidates.iter_mut() {
                let norm_cost = (metric(c.cost) - min_cost) / cost_range;
                let norm_latency = (metric(c.latency_ms) - min_latency) / latency_range;
                c.score = (1.0 - norm_cost) * COST_WEIGHT
                    + (1.0 - norm_latency) * LATENCY_WEIGHT
                    + health(c.health_score) * HEALTH_WEIGHT;
            }
        }
        RoutingStrategy::Fallback => {
            for c in candidates.iter_mut() {
                c.score = inverse(c.cost) * COST_WEIGHT
                    + inverse(c.latency_ms) * LATENCY_WEIGHT
                    + health(c.health_score) * HEALTH_WEIGHT;
            }
        }
    }
}

/// Score the candidates and return the best one.
///
/// Ties go to the candidate seen first. Fails with
/// [`GatewayError::NoCandidates`] on an empty list.
pub fn select(
    mut candidates: Vec<BackendCandidate>,
    strategy: RoutingStrategy,
) -> Result<BackendCandidate, GatewayError> {
    if candidates.is_empty() {
        return Err(GatewayError::NoCandidates);
    }

    score(&mut candidates, strategy);

    let mut best = 0;
    for (i, c) in candidates.iter().enumerate().skip(1) {
        if c.score > candidates[best].score {
            best = i;
        }
    }

    tracing::trace!(
        strategy = %strategy,
        candidates = candidates.len(),
        winner = %candidates[best].identity,
        score = candidates[best].score,
        "Backend selected"
    );

    Ok(candidates.swap_remove(best))
}
