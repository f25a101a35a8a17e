//! Named Counters
//!
//! A process-local registry of monotonically increasing counters (and a few
//! gauges set in place), keyed by their wire metric name such as
//! `udp.sentMessageCount`. Updates are lock-free once a name exists.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    values: DashMap<String, AtomicU64>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment `name` by one
    #[inline]
    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    /// Add `delta` to `name`
    #[inline]
    pub fn add(&self, name: &str, delta: u64) {
        if let Some(counter) = self.values.get(name) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.values
            .entry(name.to_string())
            .or_default()
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Overwrite `name`, for gauge-style values
    pub fn set(&self, name: &str, value: u64) {
        if let Some(counter) = self.values.get(name) {
            counter.store(value, Ordering::Relaxed);
            return;
        }
        self.values
            .entry(name.to_string())
            .or_default()
            .store(value, Ordering::Relaxed);
    }

    /// Current value, zero for a name never touched
    pub fn get(&self, name: &str) -> u64 {
        self.values
            .get(name)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every counter, sorted by name
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_untouched_counter_reads_zero() {
        let counters = Counters::new();
        assert_eq!(counters.get("udp.sentMessageCount"), 0);
        assert!(counters.snapshot().is_empty());
    }

    #[test]
    fn test_add_and_set() {
        let counters = Counters::new();
        counters.increment("tls.sentMessageCount");
        counters.add("tls.sentByteCount", 14);
        counters.add("tls.sentByteCount", 6);
        counters.set("sinkManager.numberOfSyslogSinks", 3);
        counters.set("sinkManager.numberOfSyslogSinks", 2);

        assert_eq!(counters.get("tls.sentMessageCount"), 1);
        assert_eq!(counters.get("tls.sentByteCount"), 20);
        assert_eq!(counters.get("sinkManager.numberOfSyslogSinks"), 2);
        assert_eq!(counters.snapshot().len(), 3);
    }

    #[test]
    fn test_concurrent_increments() {
        let counters = Arc::new(Counters::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.increment("DopplerForwarder.sentMessages");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.get("DopplerForwarder.sentMessages"), 8000);
    }
}
