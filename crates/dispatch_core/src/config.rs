//! Dispatch configuration: match radii, candidate limits, retry bounds.

use serde::Deserialize;

/// Default search radius around a pickup point for auto-matching (meters).
const DEFAULT_MATCH_RADIUS_M: f64 = 5_000.0;

/// Default radius for the rider-facing nearby-drivers query (meters).
const DEFAULT_NEARBY_RADIUS_M: f64 = 1_000.0;

/// Default bound on assignment attempts when a claim races and loses.
const DEFAULT_MAX_MATCH_ATTEMPTS: usize = 3;

/// Default cap on results returned by the nearby-drivers query.
const DEFAULT_NEARBY_LIMIT: usize = 5;

/// Parameters for the dispatch engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Auto-match search radius around the pickup point, in meters.
    pub match_radius_m: f64,
    /// Max candidates tried per auto-match call; also bounds the CAS retry
    /// loop when a claim loses a race.
    pub max_match_attempts: usize,
    /// Radius for the nearby-drivers projection, in meters.
    pub nearby_radius_m: f64,
    /// Max drivers returned by the nearby-drivers projection.
    pub nearby_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            match_radius_m: DEFAULT_MATCH_RADIUS_M,
            max_match_attempts: DEFAULT_MAX_MATCH_ATTEMPTS,
            nearby_radius_m: DEFAULT_NEARBY_RADIUS_M,
            nearby_limit: DEFAULT_NEARBY_LIMIT,
        }
    }
}

impl DispatchConfig {
    pub fn with_match_radius_m(mut self, radius_m: f64) -> Self {
        self.match_radius_m = radius_m;
        self
    }

    pub fn with_max_match_attempts(mut self, attempts: usize) -> Self {
        self.max_match_attempts = attempts;
        self
    }

    pub fn with_nearby_radius_m(mut self, radius_m: f64) -> Self {
        self.nearby_radius_m = radius_m;
        self
    }

    pub fn with_nearby_limit(mut self, limit: usize) -> Self {
        self.nearby_limit = limit;
        self
    }
}
