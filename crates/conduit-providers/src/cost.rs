//! Token usage to USD, and the running session total

use conduit_protocol::{ModelTier, TokenUsage};
use parking_lot::Mutex;

/// USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRates {
    pub input: f64,
    pub output: f64,
    pub cache_write: f64,
    pub cache_read: f64,
}

pub const SMALL_MODEL_RATES: ModelRates = ModelRates {
    input: 0.8,
    output: 4.0,
    cache_write: 1.0,
    cache_read: 0.08,
};

pub const LARGE_MODEL_RATES: ModelRates = ModelRates {
    input: 3.0,
    output: 15.0,
    cache_write: 3.75,
    cache_read: 0.3,
};

pub fn rates_for(tier: ModelTier) -> &'static ModelRates {
    match tier {
        ModelTier::Small => &SMALL_MODEL_RATES,
        ModelTier::Large => &LARGE_MODEL_RATES,
    }
}

const PER_MILLION: f64 = 1_000_000.0;

pub fn calculate_cost(usage: &TokenUsage, rates: &ModelRates) -> f64 {
    (usage.input_tokens as f64 / PER_MILLION) * rates.input
        + (usage.output_tokens as f64 / PER_MILLION) * rates.output
        + (usage.cache_read_tokens as f64 / PER_MILLION) * rates.cache_read
        + (usage.cache_creation_tokens as f64 / PER_MILLION) * rates.cache_write
}

/// Receives the cost of every completed call
pub trait CostTracker: Send + Sync {
    fn add_cost(&self, cost_usd: f64, duration_ms: u64);
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostTotals {
    pub total_cost_usd: f64,
    pub total_api_duration_ms: u64,
    pub calls: u64,
}

/// In-process running total
#[derive(Debug, Default)]
pub struct SessionCostTracker {
    totals: Mutex<CostTotals>,
}

impl SessionCostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self) -> CostTotals {
        *self.totals.lock()
    }
}

impl CostTracker for SessionCostTracker {
    fn add_cost(&self, cost_usd: f64, duration_ms: u64) {
        let mut totals = self.totals.lock();
        totals.total_cost_usd += cost_usd;
        totals.total_api_duration_ms += duration_ms;
        totals.calls += 1;
    }
}
