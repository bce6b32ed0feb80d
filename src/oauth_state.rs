//! OAuth state store — bounded component replacing ambient module state
//!
//! Holds the `state → expiry` map consulted during the OAuth redirect
//! dance. The map is mutex-protected and swept periodically; handlers
//! receive the store by injection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct OAuthStateStore {
    ttl: Duration,
    states: Mutex<HashMap<String, Instant>>,
}

impl OAuthStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh state token
    pub fn issue(&self) -> String {
        let state = uuid::Uuid::new_v4().simple().to_string();
        self.insert(state.clone());
        state
    }

    pub fn insert(&self, state: String) {
        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        states.insert(state, Instant::now() + self.ttl);
    }

    /// Consume a state token: valid exactly once, and only before expiry.
    pub fn consume(&self, state: &str) -> bool {
        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match states.remove(state) {
            Some(expiry) => expiry > Instant::now(),
            None => false,
        }
    }

    /// Drop expired entries; returns how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut states = self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = states.len();
        states.retain(|_, expiry| *expiry > now);
        let removed = before - states.len();
        if removed > 0 {
            debug!(removed, "Expired OAuth states swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the periodic sweeper
    pub fn spawn_sweeper(store: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "OAuth state sweeper started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_is_single_use() {
        let store = OAuthStateStore::new(Duration::from_secs(60));
        let state = store.issue();
        assert!(store.consume(&state));
        assert!(!store.consume(&state));
    }

    #[test]
    fn test_expired_state_rejected_and_swept() {
        let store = OAuthStateStore::new(Duration::from_nanos(1));
        let state = store.issue();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!store.consume(&state));

        store.insert("stale".to_string());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.sweep(), 1);
        assert!(store.is_empty());
    }
}
