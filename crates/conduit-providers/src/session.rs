//! Session-wide credential and error state
//!
//! One instance lives for the whole process and is shared by every query.
//! Credentials marked failed stay failed until the process exits.

use chrono::{DateTime, Utc};
use conduit_protocol::ModelTier;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Most recent API failure, kept for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct ApiErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    pub base_url: String,
    pub message: String,
    pub status: Option<u16>,
    /// Raw error text as returned by the provider
    pub details: String,
}

#[derive(Debug, Default)]
struct TierKeys {
    current: Option<usize>,
    failed: BTreeSet<usize>,
}

#[derive(Debug, Default)]
struct SessionInner {
    small: TierKeys,
    large: TierKeys,
    last_api_error: Option<ApiErrorRecord>,
}

impl SessionInner {
    fn tier_mut(&mut self, tier: ModelTier) -> &mut TierKeys {
        match tier {
            ModelTier::Small => &mut self.small,
            ModelTier::Large => &mut self.large,
        }
    }

    fn tier(&self, tier: ModelTier) -> &TierKeys {
        match tier {
            ModelTier::Small => &self.small,
            ModelTier::Large => &self.large,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<SessionInner>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the credential to use for `tier`.
    ///
    /// Starts at the current index and walks forward (wrapping) past failed
    /// entries. Returns `None` when every credential has failed.
    pub fn select_key(&self, tier: ModelTier, keys: &[String]) -> Option<(usize, SecretString)> {
        if keys.is_empty() {
            return None;
        }

        let mut inner = self.inner.lock();
        let state = inner.tier_mut(tier);
        let start = state.current.unwrap_or(0) % keys.len();

        let index = (0..keys.len())
            .map(|offset| (start + offset) % keys.len())
            .find(|index| !state.failed.contains(index));

        match index {
            Some(index) => {
                state.current = Some(index);
                Some((index, SecretString::from(keys[index].clone())))
            }
            None => {
                warn!(tier = %tier, "All configured API keys have been marked as failed");
                None
            }
        }
    }

    pub fn current_key_index(&self, tier: ModelTier) -> Option<usize> {
        self.inner.lock().tier(tier).current
    }

    /// Returns true only the first time an index is marked
    pub fn mark_key_failed(&self, tier: ModelTier, index: usize) -> bool {
        let newly_marked = self.inner.lock().tier_mut(tier).failed.insert(index);
        if newly_marked {
            debug!(tier = %tier, index, "Marked API key as failed");
        }
        newly_marked
    }

    pub fn failed_keys(&self, tier: ModelTier) -> Vec<usize> {
        self.inner.lock().tier(tier).failed.iter().copied().collect()
    }

    pub fn record_api_error(&self, record: ApiErrorRecord) {
        self.inner.lock().last_api_error = Some(record);
    }

    pub fn last_api_error(&self) -> Option<ApiErrorRecord> {
        self.inner.lock().last_api_error.clone()
    }
}
