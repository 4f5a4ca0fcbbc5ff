//! OAuth state management for CSRF protection.
//!
//! Each authorization request gets a random single-use state token bound to
//! the service and device that started it.

use crate::providers::Service;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Pending authorization (what the callback is allowed to complete)
#[derive(Clone, Debug)]
pub struct StateEntry {
    pub service: Service,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
}

/// OAuth state manager with automatic expiration
#[derive(Clone)]
pub struct StateManager {
    states: Arc<DashMap<String, StateEntry>>,
    expiry_duration: Duration,
}

impl StateManager {
    /// Create a new state manager
    ///
    /// # Arguments
    /// * `expiry_seconds` - How long states remain valid (default: 600 = 10 minutes)
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(DashMap::new()),
            expiry_duration: Duration::seconds(expiry_seconds),
        }
    }

    /// Generate a new state token (UUID v4) and remember it
    pub fn create_state(&self, service: Service, device_id: &str) -> String {
        let state = Uuid::new_v4().to_string();
        self.states.insert(
            state.clone(),
            StateEntry {
                service,
                device_id: device_id.to_string(),
                created_at: Utc::now(),
            },
        );
        state
    }

    /// Validate and consume a state token
    ///
    /// Returns the entry if it exists and has not expired. The state is
    /// removed either way (single-use).
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        let (_, entry) = self.states.remove(state)?;

        if Utc::now() - entry.created_at > self.expiry_duration {
            return None;
        }

        Some(entry)
    }

    /// Drop expired states
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        self.states
            .retain(|_, entry| now - entry.created_at <= self.expiry_duration);
    }

    /// Number of pending states
    pub fn count(&self) -> usize {
        self.states.len()
    }
}

/// Background task to periodically clean up expired states
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(remaining = manager.count(), "OAuth state cleanup complete");
    }
}
