//! Per-destination sink
//!
//! Every sink owns a bounded buffer and one delivery task draining it into
//! its [`Destination`]. Enqueueing never waits: a full buffer drops the
//! newest envelope and counts it.
//!
//! ```text
//!            dial ok                     remove / evicted / 3 write failures
//! Pending ───────────► Open ───────────────────────────────────────► Closed
//!    ▲                   │ write failure (connection dropped)
//!    └───────────────────┘
//! ```
//!
//! A stream consumer with a full channel loses the envelope and stays
//! `Open`; only a gone consumer closes a stream sink.
//!
//! A failed dial keeps the sink `Pending` and arms an exponential backoff;
//! envelopes arriving before it expires are dropped. A blacklisted
//! destination is never dialed: the sink stays `Pending`, is marked
//! rejected and its task ends.

use crate::destination::{Destination, SinkKind};
use crate::SinkError;
use network::{Blacklist, Counters};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use types::Envelope;

pub const DROPPED_MESSAGES_COUNTER: &str = "sinkManager.droppedMessages";
pub const BLACKLIST_VIOLATIONS_COUNTER: &str = "sinkManager.blacklistViolations";
pub const DIAL_FAILURES_COUNTER: &str = "sinkManager.dialFailures";
pub const WRITE_ERRORS_COUNTER: &str = "sinkManager.writeErrors";

/// Consecutive write failures after which a sink gives up
pub const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Pending,
    Open,
    Closed,
}

/// Registry identity of a sink
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkKey {
    pub app_id: String,
    pub destination: String,
}

impl SinkKey {
    pub fn new(app_id: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            destination: destination.into(),
        }
    }
}

impl fmt::Display for SinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.app_id, self.destination)
    }
}

/// Dial retry backoff
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failed dial
    pub retry_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,

    /// Maximum retry delay cap
    pub max_retry_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Delay before the next dial after `failures` consecutive dial failures
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32) as i32;
        let secs = self.retry_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_retry_delay.as_secs_f64()))
    }
}

/// Everything a sink task needs besides its destination
#[derive(Debug, Clone)]
pub struct SinkContext {
    pub buffer_size: usize,
    pub blacklist: Blacklist,
    pub counters: Arc<Counters>,
    pub backoff: BackoffConfig,
}

/// Point-in-time view of one sink
#[derive(Debug, Clone)]
pub struct SinkStats {
    pub key: SinkKey,
    pub kind: SinkKind,
    pub state: SinkState,
    pub delivered: u64,
    pub dropped: u64,
    /// Last successful write, or creation time if there was none
    pub last_activity: Instant,
    pub rejected: bool,
}

#[derive(Debug)]
struct SinkShared {
    state: Mutex<SinkState>,
    last_activity: Mutex<Instant>,
    delivered: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicBool,
}

impl SinkShared {
    fn set_state(&self, state: SinkState) {
        *self.state.lock() = state;
    }
}

/// Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    /// Not a kind of envelope this sink carries
    Ignored,
    Dropped,
    Closed,
}

/// Handle to a running sink
#[derive(Debug)]
pub struct Sink {
    key: SinkKey,
    kind: SinkKind,
    sender: mpsc::Sender<Arc<Envelope>>,
    stop: watch::Sender<bool>,
    shared: Arc<SinkShared>,
    counters: Arc<Counters>,
}

impl Sink {
    /// Create a `Pending` sink and start its delivery task on `tasks`
    pub fn spawn(
        key: SinkKey,
        destination: Box<dyn Destination>,
        ctx: SinkContext,
        tasks: &mut JoinSet<()>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(ctx.buffer_size.max(1));
        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::new(SinkShared {
            state: Mutex::new(SinkState::Pending),
            last_activity: Mutex::new(Instant::now()),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            rejected: AtomicBool::new(false),
        });
        let kind = destination.kind();
        let counters = Arc::clone(&ctx.counters);

        tasks.spawn(
            SinkTask {
                key: key.clone(),
                destination,
                shared: Arc::clone(&shared),
                ctx,
                dial_failures: 0,
                next_dial: Instant::now(),
                write_failures: 0,
            }
            .run(receiver, stop_rx),
        );
        debug!(sink = %key, %kind, "Sink created");

        Self {
            key,
            kind,
            sender,
            stop,
            shared,
            counters,
        }
    }

    pub fn key(&self) -> &SinkKey {
        &self.key
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }

    pub fn state(&self) -> SinkState {
        *self.shared.state.lock()
    }

    pub fn is_rejected(&self) -> bool {
        self.shared.rejected.load(Ordering::Acquire)
    }

    /// Closed, rejected, or its task has gone away
    pub fn is_finished(&self) -> bool {
        self.state() == SinkState::Closed || self.is_rejected() || self.sender.is_closed()
    }

    pub fn last_activity(&self) -> Instant {
        *self.shared.last_activity.lock()
    }

    /// Queue an envelope without waiting
    pub fn try_enqueue(&self, envelope: &Arc<Envelope>) -> Enqueue {
        if self.state() == SinkState::Closed {
            return Enqueue::Closed;
        }
        if !self.kind.accepts(envelope) {
            return Enqueue::Ignored;
        }
        match self.sender.try_send(Arc::clone(envelope)) {
            Ok(()) => Enqueue::Queued,
            Err(TrySendError::Full(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                self.counters.increment(DROPPED_MESSAGES_COUNTER);
                Enqueue::Dropped
            }
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    /// Ask the delivery task to close the destination and exit
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn stats(&self) -> SinkStats {
        SinkStats {
            key: self.key.clone(),
            kind: self.kind,
            state: self.state(),
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            last_activity: self.last_activity(),
            rejected: self.is_rejected(),
        }
    }
}

struct SinkTask {
    key: SinkKey,
    destination: Box<dyn Destination>,
    shared: Arc<SinkShared>,
    ctx: SinkContext,
    dial_failures: u32,
    next_dial: Instant,
    write_failures: u32,
}

enum Flow {
    Continue,
    Finish,
}

impl SinkTask {
    async fn run(
        mut self,
        mut receiver: mpsc::Receiver<Arc<Envelope>>,
        mut stop: watch::Receiver<bool>,
    ) {
        if let Flow::Finish = self.dial().await {
            return;
        }

        loop {
            let envelope = tokio::select! {
                biased;
                _ = stop.changed() => break,
                next = receiver.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            if let Flow::Finish = self.handle(envelope).await {
                break;
            }
        }

        self.destination.close().await;
        self.shared.set_state(SinkState::Closed);
        info!(sink = %self.key, "Sink closed");
    }

    async fn handle(&mut self, envelope: Arc<Envelope>) -> Flow {
        if *self.shared.state.lock() == SinkState::Pending {
            if Instant::now() < self.next_dial {
                self.drop_envelope();
                return Flow::Continue;
            }
            if let Flow::Finish = self.dial().await {
                return Flow::Finish;
            }
            if *self.shared.state.lock() != SinkState::Open {
                self.drop_envelope();
                return Flow::Continue;
            }
        }

        match self.destination.deliver(&envelope).await {
            Ok(()) => {
                self.write_failures = 0;
                self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                *self.shared.last_activity.lock() = Instant::now();
                Flow::Continue
            }
            Err(SinkError::Full) => {
                self.drop_envelope();
                Flow::Continue
            }
            Err(e) if !e.is_recoverable() => {
                debug!(sink = %self.key, error = %e, "Destination gone");
                Flow::Finish
            }
            Err(e) => {
                self.write_failures += 1;
                self.ctx.counters.increment(WRITE_ERRORS_COUNTER);
                warn!(sink = %self.key, error = %e, failures = self.write_failures, "Write failed, dropping connection");
                self.destination.close().await;
                self.shared.set_state(SinkState::Pending);
                if self.write_failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
                    return Flow::Finish;
                }
                Flow::Continue
            }
        }
    }

    /// One dial attempt; leaves the sink `Open` or `Pending` with backoff
    async fn dial(&mut self) -> Flow {
        match self.destination.open(&self.ctx.blacklist).await {
            Ok(()) => {
                self.dial_failures = 0;
                self.shared.set_state(SinkState::Open);
                Flow::Continue
            }
            Err(SinkError::Blacklisted(violation)) => {
                self.ctx.counters.increment(BLACKLIST_VIOLATIONS_COUNTER);
                warn!(sink = %self.key, address = %violation.address, "Refusing to dial blacklisted destination");
                self.shared.rejected.store(true, Ordering::Release);
                Flow::Finish
            }
            Err(e) if !e.is_recoverable() && !e.is_connection_error() => {
                debug!(sink = %self.key, error = %e, "Destination cannot be opened");
                self.shared.set_state(SinkState::Closed);
                Flow::Finish
            }
            Err(e) => {
                self.dial_failures += 1;
                self.ctx.counters.increment(DIAL_FAILURES_COUNTER);
                let delay = self.ctx.backoff.delay_after(self.dial_failures);
                self.next_dial = Instant::now() + delay;
                debug!(sink = %self.key, error = %e, retry_in = ?delay, "Dial failed");
                Flow::Continue
            }
        }
    }

    fn drop_envelope(&self) {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        self.ctx.counters.increment(DROPPED_MESSAGES_COUNTER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{log_envelope, RecordingDestination};
    use relay_config::ParsedIpRange;

    fn context(buffer_size: usize) -> SinkContext {
        SinkContext {
            buffer_size,
            blacklist: Blacklist::default(),
            counters: Arc::new(Counters::new()),
            backoff: BackoffConfig::default(),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_after(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_after(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_after(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_after(20), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_opens_and_delivers() {
        let mut tasks = JoinSet::new();
        let destination = RecordingDestination::new();
        let sink = Sink::spawn(
            SinkKey::new("app", "rec://1"),
            Box::new(destination.clone()),
            context(8),
            &mut tasks,
        );

        assert_eq!(sink.try_enqueue(&log_envelope("app", "one")), Enqueue::Queued);
        destination.wait_for(1).await;
        assert_eq!(sink.state(), SinkState::Open);
        assert_eq!(sink.stats().delivered, 1);

        sink.stop();
        while tasks.join_next().await.is_some() {}
        assert_eq!(sink.state(), SinkState::Closed);
        assert_eq!(destination.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_full_buffer_drops_newest_without_blocking() {
        let mut tasks = JoinSet::new();
        let destination = RecordingDestination::new();
        let gate = destination.block_deliveries();
        let ctx = context(1);
        let counters = Arc::clone(&ctx.counters);
        let sink = Sink::spawn(
            SinkKey::new("A1", "rec://slow"),
            Box::new(destination.clone()),
            ctx,
            &mut tasks,
        );
        settle().await;

        // first is taken by the task and held at the gate, second fills the
        // buffer, third has nowhere to go
        assert_eq!(sink.try_enqueue(&log_envelope("A1", "1")), Enqueue::Queued);
        settle().await;
        assert_eq!(sink.try_enqueue(&log_envelope("A1", "2")), Enqueue::Queued);
        assert_eq!(sink.try_enqueue(&log_envelope("A1", "3")), Enqueue::Dropped);

        assert_eq!(sink.stats().dropped, 1);
        assert_eq!(counters.get(DROPPED_MESSAGES_COUNTER), 1);
        assert_eq!(sink.state(), SinkState::Open);

        gate.release();
        destination.wait_for(2).await;
        assert_eq!(destination.messages(), vec!["1", "2"]);
        sink.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_failure_backs_off() {
        let mut tasks = JoinSet::new();
        let destination = RecordingDestination::new().fail_opens(1);
        let ctx = context(8);
        let counters = Arc::clone(&ctx.counters);
        let sink = Sink::spawn(
            SinkKey::new("app", "rec://flaky"),
            Box::new(destination.clone()),
            ctx,
            &mut tasks,
        );
        settle().await;
        assert_eq!(sink.state(), SinkState::Pending);
        assert_eq!(counters.get(DIAL_FAILURES_COUNTER), 1);

        sink.try_enqueue(&log_envelope("app", "during backoff"));
        settle().await;
        assert_eq!(sink.stats().dropped, 1);
        assert_eq!(destination.open_calls(), 1);

        tokio::time::advance(Duration::from_millis(150)).await;
        sink.try_enqueue(&log_envelope("app", "after backoff"));
        destination.wait_for(1).await;
        assert_eq!(destination.open_calls(), 2);
        assert_eq!(sink.state(), SinkState::Open);
        assert_eq!(destination.messages(), vec!["after backoff"]);
        sink.stop();
    }

    #[tokio::test]
    async fn test_repeated_write_failures_close_the_sink() {
        let mut tasks = JoinSet::new();
        let destination = RecordingDestination::new().fail_deliveries();
        let ctx = context(8);
        let counters = Arc::clone(&ctx.counters);
        let sink = Sink::spawn(
            SinkKey::new("app", "rec://broken"),
            Box::new(destination.clone()),
            ctx,
            &mut tasks,
        );

        for i in 0..MAX_CONSECUTIVE_WRITE_FAILURES {
            sink.try_enqueue(&log_envelope("app", &i.to_string()));
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(sink.state(), SinkState::Closed);
        assert!(sink.is_finished());
        assert_eq!(counters.get(WRITE_ERRORS_COUNTER), 3);
        assert_eq!(destination.open_calls(), 3);
        assert_eq!(sink.try_enqueue(&log_envelope("app", "late")), Enqueue::Closed);
    }

    #[tokio::test]
    async fn test_blacklisted_destination_is_never_dialed() {
        let mut tasks = JoinSet::new();
        let destination = RecordingDestination::new().resolving_to("10.0.0.5".parse().unwrap());
        let mut ctx = context(8);
        ctx.blacklist = Blacklist::new(vec![ParsedIpRange::new(
            "10.0.0.0".parse().unwrap(),
            "10.0.0.255".parse().unwrap(),
        )
        .unwrap()]);
        let counters = Arc::clone(&ctx.counters);
        let sink = Sink::spawn(
            SinkKey::new("app", "syslog://10.0.0.5"),
            Box::new(destination.clone()),
            ctx,
            &mut tasks,
        );
        while tasks.join_next().await.is_some() {}

        assert_eq!(sink.state(), SinkState::Pending);
        assert!(sink.is_rejected());
        assert_eq!(counters.get(BLACKLIST_VIOLATIONS_COUNTER), 1);
        assert_eq!(destination.connect_attempts(), 0);
        assert_eq!(sink.try_enqueue(&log_envelope("app", "x")), Enqueue::Closed);
    }
}
