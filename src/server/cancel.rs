//! Cancel request routing: a concurrent map keyed by `(pid, secret)`
//! (spec §4.6, §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Handed to a connection task at startup; checked between row emissions
/// inside Execute and at message boundaries (spec §5).
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        CancelHandle {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clears the flag once a cancellation has been observed and reported,
    /// so the connection can keep serving subsequent queries normally.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

pub type CancelRegistry = Arc<DashMap<(i32, i32), CancelHandle>>;

pub fn new_registry() -> CancelRegistry {
    Arc::new(DashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_round_trips_a_cancel_handle() {
        let registry = new_registry();
        let handle = CancelHandle::new();
        registry.insert((10, 20), handle.clone());

        assert!(!handle.is_cancelled());
        if let Some(entry) = registry.get(&(10, 20)) {
            entry.cancel();
        }
        assert!(handle.is_cancelled());
    }
}
