//! Test helpers: envelope builders and a scriptable in-memory destination

use crate::destination::{Destination, SinkKind};
use crate::writer::WriterSettings;
use crate::SinkError;
use async_trait::async_trait;
use network::Blacklist;
use parking_lot::Mutex;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use types::{ContainerMetric, Envelope, LogMessage, MessageType, Payload};

/// Short timeouts, certificate checks off
pub fn writer_settings() -> WriterSettings {
    WriterSettings {
        dial_timeout: Duration::from_millis(500),
        io_timeout: Duration::from_millis(500),
        skip_cert_verify: true,
        tls_config: network::tls::drain_client_config(true)
            .expect("drain TLS config builds without files"),
    }
}

pub fn log_envelope(app_id: &str, message: &str) -> Arc<Envelope> {
    Arc::new(Envelope::new(
        "test-origin",
        1_000,
        Payload::LogMessage(
            LogMessage::new(message, MessageType::Out, 1_000, app_id).with_source("APP", "0"),
        ),
    ))
}

pub fn container_envelope(app_id: &str, instance_index: i32, timestamp: i64) -> Arc<Envelope> {
    Arc::new(Envelope::new(
        "test-origin",
        timestamp,
        Payload::ContainerMetric(ContainerMetric {
            application_id: app_id.to_string(),
            instance_index,
            cpu_percentage: 12.5,
            memory_bytes: 1024,
            disk_bytes: 2048,
        }),
    ))
}

/// Holds deliveries until released
#[derive(Debug)]
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    pub fn release(&self) {
        let _ = self.open.send(true);
    }
}

#[derive(Debug, Default)]
struct Recorded {
    messages: Mutex<Vec<String>>,
    delivered: Notify,
    open_calls: AtomicUsize,
    connect_attempts: AtomicUsize,
    close_calls: AtomicUsize,
    fail_opens: AtomicUsize,
    fail_deliveries: AtomicBool,
    gate: Mutex<Option<watch::Receiver<bool>>>,
}

/// In-memory [`Destination`] recording what it receives
///
/// Clones share state, so a test keeps one clone while the sink owns another.
#[derive(Debug, Clone)]
pub struct RecordingDestination {
    kind: SinkKind,
    host: String,
    resolves_to: Option<IpAddr>,
    recorded: Arc<Recorded>,
}

impl Default for RecordingDestination {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDestination {
    pub fn new() -> Self {
        Self {
            kind: SinkKind::Syslog,
            host: "recorder".to_string(),
            resolves_to: None,
            recorded: Arc::new(Recorded::default()),
        }
    }

    pub fn as_stream(mut self) -> Self {
        self.kind = SinkKind::Stream;
        self
    }

    /// Pretend the destination host resolves to `ip`; `open` checks it
    /// against the blacklist before counting a connect attempt
    pub fn resolving_to(mut self, ip: IpAddr) -> Self {
        self.host = ip.to_string();
        self.resolves_to = Some(ip);
        self
    }

    /// Fail the next `count` dials
    pub fn fail_opens(self, count: usize) -> Self {
        self.recorded.fail_opens.store(count, Ordering::SeqCst);
        self
    }

    pub fn fail_deliveries(self) -> Self {
        self.recorded.fail_deliveries.store(true, Ordering::SeqCst);
        self
    }

    /// Park every delivery until the returned gate is released
    pub fn block_deliveries(&self) -> Gate {
        let (open, rx) = watch::channel(false);
        *self.recorded.gate.lock() = Some(rx);
        Gate { open }
    }

    pub fn messages(&self) -> Vec<String> {
        self.recorded.messages.lock().clone()
    }

    pub fn open_calls(&self) -> usize {
        self.recorded.open_calls.load(Ordering::SeqCst)
    }

    pub fn connect_attempts(&self) -> usize {
        self.recorded.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.recorded.close_calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` envelopes were delivered
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.recorded.delivered.notified();
            if self.recorded.messages.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

fn describe(envelope: &Envelope) -> String {
    match envelope.log_message() {
        Some(log) => String::from_utf8_lossy(&log.message).into_owned(),
        None => envelope.event_type().name().to_string(),
    }
}

#[async_trait]
impl Destination for RecordingDestination {
    fn kind(&self) -> SinkKind {
        self.kind
    }

    async fn open(&mut self, blacklist: &Blacklist) -> Result<(), SinkError> {
        self.recorded.open_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ip) = self.resolves_to {
            blacklist.check(&self.host, &[SocketAddr::new(ip, 514)])?;
        }
        self.recorded.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .recorded
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SinkError::connection_failed("scripted dial failure"));
        }
        Ok(())
    }

    async fn deliver(&mut self, envelope: &Arc<Envelope>) -> Result<(), SinkError> {
        let gate = self.recorded.gate.lock().clone();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
        if self.recorded.fail_deliveries.load(Ordering::SeqCst) {
            return Err(SinkError::write_failed("scripted write failure"));
        }
        self.recorded.messages.lock().push(describe(envelope));
        self.recorded.delivered.notify_waiters();
        Ok(())
    }

    async fn close(&mut self) {
        self.recorded.close_calls.fetch_add(1, Ordering::SeqCst);
    }
}
