//! Shared, swappable view of the active configuration

use parking_lot::RwLock;
use std::sync::Arc;

use crate::schema::GlobalConfig;

/// Cloneable handle to the process configuration.
///
/// Readers take a snapshot per call so a concurrent switch never produces a
/// half-updated view.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<GlobalConfig>>,
}

impl ConfigHandle {
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> GlobalConfig {
        self.inner.read().clone()
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut GlobalConfig),
    {
        let mut guard = self.inner.write();
        f(&mut guard);
    }

    pub fn replace(&self, config: GlobalConfig) {
        *self.inner.write() = config;
    }
}

impl From<GlobalConfig> for ConfigHandle {
    fn from(config: GlobalConfig) -> Self {
        Self::new(config)
    }
}
