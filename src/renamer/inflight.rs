//! Duplicate suppression for files that are already being renamed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Tracks files currently in the rename pipeline.
#[derive(Clone)]
pub struct InFlight {
    started: Arc<Mutex<HashMap<String, Claim>>>,
    next_id: Arc<AtomicU64>,
    window: Duration,
}

#[derive(Clone, Copy)]
struct Claim {
    id: u64,
    since: Instant,
}

impl InFlight {
    pub fn new(window: Duration) -> Self {
        Self {
            started: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            window,
        }
    }

    /// Claim a file. Returns `None` when the same file was claimed less than
    /// `window` ago; the claim is released when the guard drops.
    pub fn claim(&self, file_key: &str) -> Option<InFlightGuard> {
        self.claim_at(file_key, Instant::now())
    }

    fn claim_at(&self, file_key: &str, now: Instant) -> Option<InFlightGuard> {
        let mut started = self.started.lock().expect("in-flight lock poisoned");
        if let Some(claim) = started.get(file_key)
            && now.saturating_duration_since(claim.since) < self.window
        {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        started.insert(file_key.to_string(), Claim { id, since: now });
        Some(InFlightGuard {
            started: self.started.clone(),
            key: file_key.to_string(),
            id,
        })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

/// Releases an in-flight claim on drop, unless a newer claim replaced it.
pub struct InFlightGuard {
    started: Arc<Mutex<HashMap<String, Claim>>>,
    key: String,
    id: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut started) = self.started.lock()
            && started.get(&self.key).is_some_and(|c| c.id == self.id)
        {
            started.remove(&self.key);
        }
    }
}
