//! Execution pools.
//!
//! Coordination runs on a single actor task, so task-state mutation is
//! serialized by construction. Network transfers and blocking file io are
//! bounded by semaphores sized from the config.

use crate::config::EngineConfig;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct Dispatchers {
    /// Permits for concurrent segment transfers.
    pub network: Arc<Semaphore>,
    /// Permits for blocking file operations.
    pub io: Arc<Semaphore>,
}

impl Dispatchers {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            network: Arc::new(Semaphore::new(cfg.network_permits())),
            io: Arc::new(Semaphore::new(cfg.io_permits())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_sized_from_config() {
        let cfg = EngineConfig::default();
        let d = Dispatchers::from_config(&cfg);
        assert_eq!(d.network.available_permits(), 12);
        assert_eq!(d.io.available_permits(), 4);
    }
}
