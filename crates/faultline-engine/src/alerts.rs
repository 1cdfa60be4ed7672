//! Per-fingerprint notification throttling.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug)]
pub struct AlertGate {
    min_interval: Duration,
    max_tracked: usize,
    last_notified: HashMap<String, DateTime<Utc>>,
}

impl AlertGate {
    pub fn new(min_interval: Duration, max_tracked: usize) -> Self {
        Self {
            min_interval,
            max_tracked: max_tracked.max(1),
            last_notified: HashMap::new(),
        }
    }

    /// True on first sight of `fingerprint` and once `min_interval` has
    /// passed since the last notification. Records `now` when returning true.
    pub fn should_notify(&mut self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let notify = match self.last_notified.get(fingerprint) {
            Some(last) => self.interval_elapsed(*last, now),
            None => true,
        };
        if !notify {
            return false;
        }

        if !self.last_notified.contains_key(fingerprint) && self.last_notified.len() >= self.max_tracked
        {
            self.evict(now);
        }
        self.last_notified.insert(fingerprint.to_string(), now);
        true
    }

    pub fn tracked(&self) -> usize {
        self.last_notified.len()
    }

    fn interval_elapsed(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // Negative deltas (clock moved backwards) count as not elapsed.
        (now - last)
            .to_std()
            .map_or(false, |elapsed| elapsed >= self.min_interval)
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let min_interval = self.min_interval;
        self.last_notified.retain(|_, last| {
            (now - *last)
                .to_std()
                .map_or(true, |elapsed| elapsed < min_interval)
        });
        if self.last_notified.len() < self.max_tracked {
            return;
        }
        let oldest = self
            .last_notified
            .iter()
            .min_by_key(|(_, last)| **last)
            .map(|(fingerprint, _)| fingerprint.clone());
        if let Some(fingerprint) = oldest {
            self.last_notified.remove(&fingerprint);
        }
    }
}
