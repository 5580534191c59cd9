//! Request throttle for push-auth escalations.
//!
//! A device enters the pending set as soon as its escalation starts and
//! stays there until the shared tick counter passes the threshold. The
//! counter is global: when it wraps, every pending key is released at once.

use std::collections::HashSet;

/// Identity keys with an outstanding or recent escalation.
#[derive(Debug, Clone)]
pub struct RequestThrottle {
    pending: HashSet<String>,
    ticks: u32,
    threshold: u32,
}

impl RequestThrottle {
    /// Creates an empty throttle that releases keys after `threshold` ticks.
    pub fn new(threshold: u32) -> Self {
        Self {
            pending: HashSet::new(),
            ticks: 0,
            threshold,
        }
    }

    pub fn is_pending(&self, identity_key: &str) -> bool {
        self.pending.contains(identity_key)
    }

    pub fn mark_pending(&mut self, identity_key: &str) {
        self.pending.insert(identity_key.to_string());
    }

    /// Advances the counter by one poll cycle.
    ///
    /// Once the counter exceeds the threshold it resets to zero and the
    /// whole pending set is cleared.
    pub fn tick(&mut self) {
        if self.ticks > self.threshold {
            if !self.pending.is_empty() {
                tracing::debug!("Releasing {} throttled devices", self.pending.len());
            }
            self.ticks = 0;
            self.pending.clear();
        } else {
            self.ticks += 1;
        }
    }

    /// Changes the threshold, keeping pending keys and the current count.
    pub fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold;
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
