//! Per-application caches kept alongside the sinks
//!
//! - [`RecentLogs`]: last N log envelopes per application, for late joiners
//! - [`ContainerMetricCache`]: latest metric per application instance, with TTL

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use types::Envelope;

#[derive(Debug)]
struct AppLogs {
    entries: VecDeque<Arc<Envelope>>,
    last_seen: Instant,
}

/// Bounded ring of recent log envelopes per application
#[derive(Debug)]
pub struct RecentLogs {
    capacity: usize,
    apps: HashMap<String, AppLogs>,
}

impl RecentLogs {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            apps: HashMap::new(),
        }
    }

    /// Append, evicting the oldest entry once the app is at capacity
    pub fn push(&mut self, app_id: &str, envelope: Arc<Envelope>) {
        let capacity = self.capacity;
        let logs = self
            .apps
            .entry(app_id.to_string())
            .or_insert_with(|| AppLogs {
                entries: VecDeque::with_capacity(capacity),
                last_seen: Instant::now(),
            });
        if logs.entries.len() == capacity {
            logs.entries.pop_front();
        }
        logs.entries.push_back(envelope);
        logs.last_seen = Instant::now();
    }

    /// Oldest first
    pub fn get(&self, app_id: &str) -> Vec<Arc<Envelope>> {
        self.apps
            .get(app_id)
            .map(|logs| logs.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop applications that have not logged for `idle`; returns how many
    pub fn evict_idle(&mut self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.apps.len();
        self.apps
            .retain(|_, logs| now.duration_since(logs.last_seen) < idle);
        before - self.apps.len()
    }

    pub fn app_count(&self) -> usize {
        self.apps.len()
    }
}

#[derive(Debug)]
struct CachedMetric {
    envelope: Arc<Envelope>,
    stored_at: Instant,
}

/// Latest container metric per (application, instance index)
#[derive(Debug)]
pub struct ContainerMetricCache {
    ttl: Duration,
    apps: HashMap<String, BTreeMap<i32, CachedMetric>>,
}

impl ContainerMetricCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            apps: HashMap::new(),
        }
    }

    /// Store a container metric envelope; older timestamps never replace newer ones.
    /// Returns false when the envelope is not a container metric.
    pub fn update(&mut self, envelope: &Arc<Envelope>) -> bool {
        let Some(metric) = envelope.container_metric() else {
            return false;
        };
        let instances = self
            .apps
            .entry(metric.application_id.clone())
            .or_default();
        let now = Instant::now();
        match instances.get_mut(&metric.instance_index) {
            Some(cached) if cached.envelope.timestamp() > envelope.timestamp() => {}
            Some(cached) => {
                cached.envelope = Arc::clone(envelope);
                cached.stored_at = now;
            }
            None => {
                instances.insert(
                    metric.instance_index,
                    CachedMetric {
                        envelope: Arc::clone(envelope),
                        stored_at: now,
                    },
                );
            }
        }
        true
    }

    /// Unexpired metrics for an application, ordered by instance index
    pub fn get(&self, app_id: &str) -> Vec<Arc<Envelope>> {
        let now = Instant::now();
        self.apps
            .get(app_id)
            .map(|instances| {
                instances
                    .values()
                    .filter(|cached| now.duration_since(cached.stored_at) < self.ttl)
                    .map(|cached| Arc::clone(&cached.envelope))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove expired entries and empty applications; returns entries removed
    pub fn purge(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut removed = 0;
        self.apps.retain(|_, instances| {
            let before = instances.len();
            instances.retain(|_, cached| now.duration_since(cached.stored_at) < ttl);
            removed += before - instances.len();
            !instances.is_empty()
        });
        removed
    }
}
