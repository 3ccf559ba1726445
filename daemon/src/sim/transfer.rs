//! Simulated transfer service

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::hal::TransferService;

/// Begin/poll counters, shared across clones
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    begun: Arc<AtomicU64>,
    polls: Arc<AtomicU64>,
}

#[cfg(test)]
impl TransferStats {
    pub fn begun(&self) -> u64 {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

/// Transfer service that only counts its calls
///
/// On the host the storage root is an ordinary directory, so the export
/// itself is served by the panel socket's `ListFiles`.
#[derive(Default)]
pub struct SimTransfer {
    stats: TransferStats,
}

impl SimTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn stats(&self) -> TransferStats {
        self.stats.clone()
    }
}

impl TransferService for SimTransfer {
    fn begin(&mut self) {
        let begun = self.stats.begun.fetch_add(1, Ordering::SeqCst) + 1;
        info!(begun, "transfer service initialised");
    }

    fn poll(&mut self) {
        let polls = self.stats.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls % 10_000 == 0 {
            debug!(polls, "transfer service polled");
        }
    }
}
