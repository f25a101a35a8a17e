//! # Sink Manager
//!
//! Owns every sink on the aggregator and the per-application caches next to
//! them. Envelopes come in through [`SinkManager::send_to`]; drains come and
//! go through registry events handled by [`SinkManager::run`].
//!
//! ## Fan-out
//!
//! `send_to` never waits. It updates the caches, then offers the envelope to
//! every sink bound to the envelope's application. A sink whose buffer is full
//! drops it and counts the drop; other sinks are unaffected.
//!
//! ## Sink lifecycle
//!
//! - Registry `add` creates the sink eagerly after a blacklist check on the
//!   resolved destination. A blacklisted drain is refused and never dialed.
//! - A drain that stays bound but lost its sink (evicted, or closed after
//!   repeated write failures) gets a fresh sink on its next envelope.
//! - Registry `remove` stops the sink and unbinds the drain.
//! - The periodic sweep evicts drains idle past the inactivity timeout,
//!   clears out finished sinks and reaps their delivery tasks.
//!
//! Rejected drains are reported to the application owner as an error log
//! line (source type `LGR`) in the app's recent logs and live streams.

use crate::caches::{ContainerMetricCache, RecentLogs};
use crate::destination::{Destination, SinkKind, StreamDestination, SyslogDrain};
use crate::registry::{DrainBindings, RegistryStreams};
use crate::sink::{
    BackoffConfig, Enqueue, Sink, SinkContext, SinkKey, SinkStats, BLACKLIST_VIOLATIONS_COUNTER,
};
use crate::writer::{SyslogWriter, WriterSettings};
use crate::SinkError;
use network::{BlacklistError, Blacklist, Counters};
use parking_lot::{Mutex, RwLock};
use relay_config::DopplerConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use types::{Envelope, LogMessage, MessageType, Payload};

pub const SYSLOG_SINKS_GAUGE: &str = "sinkManager.numberOfSyslogSinks";
pub const STREAM_SINKS_GAUGE: &str = "sinkManager.numberOfStreamSinks";
pub const EVICTED_SINKS_COUNTER: &str = "sinkManager.evictedSinks";

/// Source type on log lines the aggregator writes about an app's own drains
pub const DRAIN_ERROR_SOURCE_TYPE: &str = "LGR";

#[derive(Debug, Clone)]
pub struct SinkManagerConfig {
    /// Recent log lines kept per application
    pub max_retained_log_messages: usize,
    /// Per-sink buffer capacity
    pub buffer_size: usize,
    pub inactivity_timeout: Duration,
    pub container_metric_ttl: Duration,
    pub writer: WriterSettings,
    pub backoff: BackoffConfig,
    /// Origin stamped on drain error envelopes
    pub origin: String,
    pub sweep_interval: Duration,
}

impl SinkManagerConfig {
    pub fn from_doppler(config: &DopplerConfig) -> network::Result<Self> {
        Ok(Self {
            max_retained_log_messages: config.max_retained_log_messages as usize,
            buffer_size: config.message_drain_buffer_size,
            inactivity_timeout: config.sink_inactivity_timeout(),
            container_metric_ttl: config.container_metric_ttl(),
            writer: WriterSettings {
                dial_timeout: config.sink_dial_timeout(),
                io_timeout: config.sink_io_timeout(),
                skip_cert_verify: config.sink_skip_cert_verify,
                tls_config: network::tls::drain_client_config(config.sink_skip_cert_verify)?,
            },
            backoff: BackoffConfig::default(),
            origin: "doppler".to_string(),
            sweep_interval: Duration::from_secs(1),
        })
    }
}

type SinkIndex = HashMap<String, HashMap<String, Sink>>;

pub struct SinkManager {
    config: SinkManagerConfig,
    blacklist: Blacklist,
    counters: Arc<Counters>,
    sinks: RwLock<SinkIndex>,
    bindings: Mutex<DrainBindings>,
    recent_logs: Mutex<RecentLogs>,
    container_metrics: Mutex<ContainerMetricCache>,
    tasks: Mutex<JoinSet<()>>,
    stop: watch::Sender<bool>,
    next_stream_id: AtomicU64,
}

impl std::fmt::Debug for SinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkManager")
            .field("sinks", &self.sinks.read().values().map(HashMap::len).sum::<usize>())
            .field("bindings", &self.bindings.lock().len())
            .field("tasks", &self.task_count())
            .finish_non_exhaustive()
    }
}

impl SinkManager {
    pub fn new(config: SinkManagerConfig, blacklist: Blacklist, counters: Arc<Counters>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            recent_logs: Mutex::new(RecentLogs::new(config.max_retained_log_messages)),
            container_metrics: Mutex::new(ContainerMetricCache::new(config.container_metric_ttl)),
            config,
            blacklist,
            counters,
            sinks: RwLock::new(HashMap::new()),
            bindings: Mutex::new(DrainBindings::new()),
            tasks: Mutex::new(JoinSet::new()),
            stop,
            next_stream_id: AtomicU64::new(1),
        }
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    fn context(&self) -> SinkContext {
        SinkContext {
            buffer_size: self.config.buffer_size,
            blacklist: self.blacklist.clone(),
            counters: Arc::clone(&self.counters),
            backoff: self.config.backoff.clone(),
        }
    }

    fn spawn_sink(&self, key: SinkKey, destination: Box<dyn Destination>) -> Sink {
        Sink::spawn(key, destination, self.context(), &mut self.tasks.lock())
    }

    /// Bind `url` to `app_id` and start its sink
    ///
    /// The drain is refused without any dial when its URL is malformed, its
    /// scheme is unknown, or it resolves into the blacklist. Refusals are
    /// reported to the app's log.
    pub async fn register_drain(&self, app_id: &str, url: &str) -> Result<(), SinkError> {
        let writer = match SyslogWriter::new(url, app_id, &self.config.writer) {
            Ok(writer) => writer,
            Err(e) => {
                self.report_drain_error(app_id, url, &e);
                return Err(e);
            }
        };

        match self.blacklist.resolve(writer.host(), writer.port()).await {
            Ok(_) => {}
            Err(BlacklistError::Violation(violation)) => {
                self.counters.increment(BLACKLIST_VIOLATIONS_COUNTER);
                let err = SinkError::Blacklisted(violation);
                self.report_drain_error(app_id, url, &err);
                return Err(err);
            }
            // the sink task resolves again and retries with backoff
            Err(e) => debug!(app_id, url, error = %e, "Drain not resolvable yet"),
        }

        self.bindings.lock().bind(app_id, url);
        let mut sinks = self.sinks.write();
        let app_sinks = sinks.entry(app_id.to_string()).or_default();
        if app_sinks.get(url).is_some_and(|sink| !sink.is_finished()) {
            return Ok(());
        }
        let sink = self.spawn_sink(
            SinkKey::new(app_id, url),
            Box::new(SyslogDrain::new(writer)),
        );
        app_sinks.insert(url.to_string(), sink);
        info!(app_id, url, "Drain registered");
        self.update_gauges(&sinks);
        Ok(())
    }

    /// Unbind and stop a drain; returns false if it was not registered
    pub fn remove_drain(&self, app_id: &str, url: &str) -> bool {
        let was_bound = self.bindings.lock().unbind(app_id, url);
        let mut sinks = self.sinks.write();
        let removed = remove_sink(&mut sinks, app_id, url);
        if let Some(sink) = &removed {
            sink.stop();
        }
        self.update_gauges(&sinks);
        if was_bound {
            info!(app_id, url, "Drain removed");
        }
        was_bound || removed.is_some()
    }

    /// Attach a live-tail consumer to `app_id`
    ///
    /// The consumer sees every envelope for the app from now on. Dropping
    /// the receiver closes the stream sink.
    pub fn register_stream(&self, app_id: &str) -> mpsc::Receiver<Arc<Envelope>> {
        let (tx, rx) = mpsc::channel(self.config.buffer_size.max(1));
        let id = format!(
            "stream://{}",
            self.next_stream_id.fetch_add(1, Ordering::Relaxed)
        );
        let destination = StreamDestination::new(tx);
        self.add_destination(app_id, &id, Box::new(destination));
        rx
    }

    /// Start a sink for an arbitrary destination without binding it
    ///
    /// Returns false if a live sink already exists under `id`.
    pub fn add_destination(&self, app_id: &str, id: &str, destination: Box<dyn Destination>) -> bool {
        let mut sinks = self.sinks.write();
        let app_sinks = sinks.entry(app_id.to_string()).or_default();
        if app_sinks.get(id).is_some_and(|sink| !sink.is_finished()) {
            return false;
        }
        let sink = self.spawn_sink(SinkKey::new(app_id, id), destination);
        app_sinks.insert(id.to_string(), sink);
        self.update_gauges(&sinks);
        true
    }

    /// Fan an envelope out to every sink of its application
    ///
    /// Envelopes without an application id are ignored. Container metrics
    /// and log lines also land in their caches.
    pub fn send_to(&self, envelope: Arc<Envelope>) {
        let Some(app_id) = envelope.app_id() else {
            return;
        };

        if envelope.container_metric().is_some() {
            self.container_metrics.lock().update(&envelope);
        } else if envelope.log_message().is_some() {
            self.recent_logs.lock().push(app_id, Arc::clone(&envelope));
        }

        let needs_reconcile = {
            let sinks = self.sinks.read();
            let app_sinks = sinks.get(app_id);
            let mut stale = false;
            for sink in app_sinks.into_iter().flat_map(HashMap::values) {
                if sink.try_enqueue(&envelope) == Enqueue::Closed {
                    stale = true;
                }
            }
            stale
                || self
                    .bindings
                    .lock()
                    .urls_for(app_id)
                    .any(|url| app_sinks.map_or(true, |s| !s.contains_key(url)))
        };

        if needs_reconcile {
            self.reconcile(app_id, &envelope);
        }
    }

    /// Drop finished sinks of one app and restart bound drains that lost theirs
    fn reconcile(&self, app_id: &str, envelope: &Arc<Envelope>) {
        let mut rejected = Vec::new();
        {
            let bound: Vec<String> = self
                .bindings
                .lock()
                .urls_for(app_id)
                .map(str::to_string)
                .collect();
            let mut sinks = self.sinks.write();
            let app_sinks = sinks.entry(app_id.to_string()).or_default();

            app_sinks.retain(|id, sink| {
                if sink.is_rejected() {
                    rejected.push(id.clone());
                }
                !sink.is_finished()
            });

            for url in bound {
                if app_sinks.contains_key(&url) || rejected.contains(&url) {
                    continue;
                }
                let writer = match SyslogWriter::new(&url, app_id, &self.config.writer) {
                    Ok(writer) => writer,
                    Err(e) => {
                        warn!(app_id, url, error = %e, "Bound drain no longer valid");
                        continue;
                    }
                };
                debug!(app_id, url, "Restarting drain");
                let sink = self.spawn_sink(
                    SinkKey::new(app_id, url.as_str()),
                    Box::new(SyslogDrain::new(writer)),
                );
                sink.try_enqueue(envelope);
                app_sinks.insert(url, sink);
            }

            if app_sinks.is_empty() {
                sinks.remove(app_id);
            }
            self.update_gauges(&sinks);
        }

        for url in rejected {
            self.reject(app_id, &url);
        }
    }

    fn reject(&self, app_id: &str, url: &str) {
        if self.bindings.lock().unbind(app_id, url) {
            self.report_drain_error(
                app_id,
                url,
                &SinkError::connection_failed("destination address is blacklisted"),
            );
        }
    }

    /// Recent log envelopes for an app, oldest first
    pub fn recent_logs(&self, app_id: &str) -> Vec<Arc<Envelope>> {
        self.recent_logs.lock().get(app_id)
    }

    /// Unexpired container metrics for an app, one per instance
    pub fn latest_container_metrics(&self, app_id: &str) -> Vec<Arc<Envelope>> {
        self.container_metrics.lock().get(app_id)
    }

    /// Evict idle drains, clear out finished sinks and expire cached data
    ///
    /// Returns the number of drains evicted for inactivity.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let timeout = self.config.inactivity_timeout;
        let mut evicted = 0;
        let mut rejected = Vec::new();
        {
            let mut sinks = self.sinks.write();
            for (app_id, app_sinks) in sinks.iter_mut() {
                app_sinks.retain(|id, sink| {
                    if sink.is_rejected() {
                        rejected.push((app_id.clone(), id.clone()));
                        return false;
                    }
                    if sink.kind() == SinkKind::Syslog
                        && now.duration_since(sink.last_activity()) >= timeout
                    {
                        info!(sink = %sink.key(), "Evicting idle drain");
                        sink.stop();
                        evicted += 1;
                        return false;
                    }
                    !sink.is_finished()
                });
            }
            sinks.retain(|_, app_sinks| !app_sinks.is_empty());
            self.update_gauges(&sinks);
        }

        if evicted > 0 {
            self.counters.add(EVICTED_SINKS_COUNTER, evicted as u64);
        }
        for (app_id, url) in rejected {
            self.reject(&app_id, &url);
        }

        self.recent_logs.lock().evict_idle(timeout);
        self.container_metrics.lock().purge();
        self.reap_tasks();
        evicted
    }

    fn reap_tasks(&self) {
        let mut tasks = self.tasks.lock();
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Sink task ended abnormally");
            }
        }
    }

    /// Delivery tasks not yet reaped
    fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Stats of every live sink, ordered by key
    pub fn sink_stats(&self) -> Vec<SinkStats> {
        let mut stats: Vec<SinkStats> = self
            .sinks
            .read()
            .values()
            .flat_map(HashMap::values)
            .map(Sink::stats)
            .collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }

    /// Spawn [`Self::run`] on the current runtime
    pub fn start(self: &Arc<Self>, registry: RegistryStreams) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(registry))
    }

    /// React to registry events and sweep periodically until [`Self::stop`]
    pub async fn run(self: Arc<Self>, registry: RegistryStreams) {
        let RegistryStreams {
            mut adds,
            mut removes,
        } = registry;
        let mut stop = self.stop.subscribe();
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                Some(add) = adds.recv() => {
                    if let Err(e) = self.register_drain(&add.app_id, &add.url).await {
                        warn!(app_id = %add.app_id, url = %add.url, error = %e, "Drain refused");
                    }
                }
                Some(remove) = removes.recv() => {
                    self.remove_drain(&remove.app_id, &remove.url);
                }
                _ = sweep.tick() => {
                    self.sweep();
                }
            }
        }
        debug!("Sink manager loop stopped");
    }

    /// Stop every sink and wait for all delivery tasks to finish
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        {
            let mut sinks = self.sinks.write();
            for sink in sinks.values().flat_map(HashMap::values) {
                sink.stop();
            }
            sinks.clear();
            self.update_gauges(&sinks);
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Sink task ended abnormally");
            }
        }
        info!("Sink manager stopped");
    }

    fn update_gauges(&self, sinks: &SinkIndex) {
        let (mut syslog, mut stream) = (0u64, 0u64);
        for sink in sinks.values().flat_map(HashMap::values) {
            match sink.kind() {
                SinkKind::Syslog => syslog += 1,
                SinkKind::Stream => stream += 1,
            }
        }
        self.counters.set(SYSLOG_SINKS_GAUGE, syslog);
        self.counters.set(STREAM_SINKS_GAUGE, stream);
    }

    /// Tell the app owner a drain was refused
    fn report_drain_error(&self, app_id: &str, url: &str, error: &SinkError) {
        warn!(app_id, url, %error, "Drain error");
        let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let message = format!("Error with drain {url}: {error}");
        let envelope = Arc::new(Envelope::new(
            self.config.origin.as_str(),
            timestamp,
            Payload::LogMessage(
                LogMessage::new(message, MessageType::Err, timestamp, app_id)
                    .with_source(DRAIN_ERROR_SOURCE_TYPE, ""),
            ),
        ));

        self.recent_logs.lock().push(app_id, Arc::clone(&envelope));
        if let Some(app_sinks) = self.sinks.read().get(app_id) {
            for sink in app_sinks.values().filter(|s| s.kind() == SinkKind::Stream) {
                sink.try_enqueue(&envelope);
            }
        }
    }
}

fn remove_sink(sinks: &mut SinkIndex, app_id: &str, id: &str) -> Option<Sink> {
    let app_sinks = sinks.get_mut(app_id)?;
    let removed = app_sinks.remove(id);
    if app_sinks.is_empty() {
        sinks.remove(app_id);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{SinkState, DROPPED_MESSAGES_COUNTER, WRITE_ERRORS_COUNTER};
    use crate::test_utils::{container_envelope, log_envelope, writer_settings, RecordingDestination};
    use relay_config::ParsedIpRange;
    use tokio_test::assert_ok;

    fn config() -> SinkManagerConfig {
        SinkManagerConfig {
            max_retained_log_messages: 10,
            buffer_size: 8,
            inactivity_timeout: Duration::from_secs(60),
            container_metric_ttl: Duration::from_secs(10),
            writer: writer_settings(),
            backoff: BackoffConfig::default(),
            origin: "doppler-test".to_string(),
            sweep_interval: Duration::from_secs(1),
        }
    }

    fn manager_with(config: SinkManagerConfig, blacklist: Blacklist) -> SinkManager {
        SinkManager::new(config, blacklist, Arc::new(Counters::new()))
    }

    fn manager() -> SinkManager {
        manager_with(config(), Blacklist::default())
    }

    fn ten_slash_24() -> Blacklist {
        Blacklist::new(vec![ParsedIpRange::new(
            "10.0.0.0".parse().unwrap(),
            "10.0.0.255".parse().unwrap(),
        )
        .unwrap()])
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn error_lines(manager: &SinkManager, app_id: &str) -> Vec<String> {
        manager
            .recent_logs(app_id)
            .iter()
            .filter_map(|e| e.log_message())
            .filter(|log| log.source_type.as_deref() == Some(DRAIN_ERROR_SOURCE_TYPE))
            .map(|log| String::from_utf8_lossy(&log.message).into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_blacklisted_drain_is_refused_without_dialing() {
        let manager = manager_with(config(), ten_slash_24());

        let err = manager
            .register_drain("app", "syslog://10.0.0.5:514")
            .await
            .unwrap_err();

        assert!(matches!(err, SinkError::Blacklisted(_)));
        assert_eq!(manager.counters().get(BLACKLIST_VIOLATIONS_COUNTER), 1);
        assert!(manager.sink_stats().is_empty());
        assert_eq!(manager.counters().get(SYSLOG_SINKS_GAUGE), 0);

        let errors = error_lines(&manager, "app");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_unknown_scheme_is_reported_not_registered() {
        let manager = manager();
        let err = manager
            .register_drain("app", "gopher://logs.example.com")
            .await
            .unwrap_err();
        assert!(err.is_destination_error());
        assert!(manager.sink_stats().is_empty());
        assert_eq!(error_lines(&manager, "app").len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_only_matching_app() {
        let manager = manager();
        let a = RecordingDestination::new();
        let b = RecordingDestination::new();
        assert!(manager.add_destination("A", "rec://a", Box::new(a.clone())));
        assert!(manager.add_destination("B", "rec://b", Box::new(b.clone())));
        assert!(!manager.add_destination("A", "rec://a", Box::new(RecordingDestination::new())));

        manager.send_to(log_envelope("A", "for a"));
        a.wait_for(1).await;
        settle().await;

        assert_eq!(a.messages(), vec!["for a"]);
        assert!(b.messages().is_empty());
        assert_eq!(manager.counters().get(SYSLOG_SINKS_GAUGE), 2);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_slow_sink_drops_without_blocking_others() {
        let mut cfg = config();
        cfg.buffer_size = 1;
        let manager = manager_with(cfg, Blacklist::default());
        let slow = RecordingDestination::new();
        let gate = slow.block_deliveries();
        let fast = RecordingDestination::new();
        manager.add_destination("A1", "rec://slow", Box::new(slow.clone()));
        manager.add_destination("A1", "rec://fast", Box::new(fast.clone()));
        settle().await;

        manager.send_to(log_envelope("A1", "1"));
        settle().await;
        manager.send_to(log_envelope("A1", "2"));
        settle().await;
        manager.send_to(log_envelope("A1", "3"));
        fast.wait_for(3).await;

        let stats = manager.sink_stats();
        let slow_stats = stats.iter().find(|s| s.key.destination == "rec://slow").unwrap();
        assert_eq!(slow_stats.dropped, 1);
        assert_eq!(slow_stats.state, SinkState::Open);
        assert_eq!(manager.counters().get(DROPPED_MESSAGES_COUNTER), 1);

        gate.release();
        slow.wait_for(2).await;
        manager.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_drain_is_evicted() {
        let manager = manager();
        let quiet = RecordingDestination::new();
        let busy = RecordingDestination::new();
        manager.add_destination("app", "rec://quiet", Box::new(quiet.clone()));
        manager.add_destination("other", "rec://busy", Box::new(busy.clone()));

        tokio::time::advance(Duration::from_secs(45)).await;
        manager.send_to(log_envelope("other", "keepalive"));
        busy.wait_for(1).await;
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(manager.sweep(), 1);
        assert_eq!(manager.counters().get(EVICTED_SINKS_COUNTER), 1);
        let remaining: Vec<String> = manager
            .sink_stats()
            .into_iter()
            .map(|s| s.key.destination)
            .collect();
        assert_eq!(remaining, vec!["rec://busy"]);

        manager.stop().await;
        assert_eq!(quiet.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_streams_receive_every_kind_and_survive_sweep() {
        let manager = manager();
        let mut stream = manager.register_stream("app");
        assert_eq!(manager.counters().get(STREAM_SINKS_GAUGE), 1);

        manager.send_to(container_envelope("app", 0, 5));
        manager.send_to(log_envelope("app", "line"));

        let first = stream.recv().await.unwrap();
        assert!(first.container_metric().is_some());
        let second = stream.recv().await.unwrap();
        assert!(second.log_message().is_some());

        manager.sweep();
        assert_eq!(manager.sink_stats().len(), 1);

        drop(stream);
        manager.send_to(log_envelope("app", "nobody listening"));
        settle().await;
        manager.send_to(log_envelope("app", "again"));
        manager.sweep();
        assert!(manager.sink_stats().is_empty());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_sweep_reaps_tasks_of_departed_streams() {
        let manager = manager();
        for i in 0..200 {
            drop(manager.register_stream("app"));
            manager.send_to(log_envelope("app", &format!("line {i}")));
            settle().await;
            manager.sweep();
        }
        settle().await;
        manager.sweep();

        assert!(manager.sink_stats().is_empty());
        assert!(manager.task_count() <= 1, "{} tasks left", manager.task_count());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_slow_stream_consumer_loses_envelopes_but_stays_attached() {
        let mut cfg = config();
        cfg.buffer_size = 1;
        let manager = manager_with(cfg, Blacklist::default());
        let mut stream = manager.register_stream("app");
        settle().await;

        for i in 0..10 {
            manager.send_to(log_envelope("app", &format!("line {i}")));
            settle().await;
        }

        let stats = manager.sink_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].state, SinkState::Open);
        assert!(stats[0].dropped >= 8, "dropped {}", stats[0].dropped);
        assert_eq!(manager.counters().get(WRITE_ERRORS_COUNTER), 0);

        let first = stream.recv().await.unwrap();
        assert_eq!(first.log_message().unwrap().message, b"line 0");
        manager.send_to(log_envelope("app", "caught up"));
        let next = stream.recv().await.unwrap();
        assert_eq!(next.log_message().unwrap().message, b"caught up");
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_caches_follow_envelopes() {
        let manager = manager();
        manager.send_to(container_envelope("app", 0, 10));
        manager.send_to(container_envelope("app", 1, 10));
        manager.send_to(log_envelope("app", "hello"));

        assert_eq!(manager.latest_container_metrics("app").len(), 2);
        assert_eq!(manager.recent_logs("app").len(), 1);
        assert!(manager.recent_logs("nobody").is_empty());
    }

    #[tokio::test]
    async fn test_remove_drain_stops_sink() {
        let manager = manager();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("syslog://{}", listener.local_addr().unwrap());

        assert_ok!(manager.register_drain("app", &url).await);
        assert_eq!(manager.sink_stats().len(), 1);
        assert!(manager.remove_drain("app", &url));
        assert!(!manager.remove_drain("app", &url));
        assert!(manager.sink_stats().is_empty());
        manager.stop().await;
    }
}
