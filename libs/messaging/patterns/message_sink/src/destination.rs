//! Sink destinations
//!
//! A [`Destination`] is what a sink's delivery task writes into: an external
//! syslog drain or a live-tail stream consumer. Each is owned by exactly one
//! task, so methods take `&mut self`.

use crate::writer::SyslogWriter;
use crate::SinkError;
use async_trait::async_trait;
use codec::{PRIORITY_ERROR, PRIORITY_INFO};
use network::Blacklist;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use types::{Envelope, EventType, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    Syslog,
    Stream,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkKind::Syslog => f.write_str("syslog"),
            SinkKind::Stream => f.write_str("stream"),
        }
    }
}

impl SinkKind {
    /// Syslog drains only carry log lines; streams take everything
    pub fn accepts(self, envelope: &Envelope) -> bool {
        match self {
            SinkKind::Syslog => envelope.event_type() == EventType::LogMessage,
            SinkKind::Stream => true,
        }
    }
}

#[async_trait]
pub trait Destination: Send + fmt::Debug {
    fn kind(&self) -> SinkKind;

    /// Resolve, check against the blacklist and dial
    async fn open(&mut self, blacklist: &Blacklist) -> Result<(), SinkError>;

    /// Deliver one envelope
    ///
    /// [`SinkError::Full`] drops only this envelope. Any other error leaves
    /// the destination needing `open`.
    async fn deliver(&mut self, envelope: &Arc<Envelope>) -> Result<(), SinkError>;

    async fn close(&mut self);
}

/// External syslog drain
#[derive(Debug)]
pub struct SyslogDrain {
    writer: SyslogWriter,
}

impl SyslogDrain {
    pub fn new(writer: SyslogWriter) -> Self {
        Self { writer }
    }
}

/// Syslog priority for a log line: `user.info` for stdout, `user.err` for stderr
pub fn priority_for(message_type: MessageType) -> i32 {
    match message_type {
        MessageType::Out => PRIORITY_INFO,
        MessageType::Err => PRIORITY_ERROR,
    }
}

#[async_trait]
impl Destination for SyslogDrain {
    fn kind(&self) -> SinkKind {
        SinkKind::Syslog
    }

    async fn open(&mut self, blacklist: &Blacklist) -> Result<(), SinkError> {
        let addresses = blacklist
            .resolve(self.writer.host(), self.writer.port())
            .await?;
        self.writer.connect_to(&addresses).await
    }

    async fn deliver(&mut self, envelope: &Arc<Envelope>) -> Result<(), SinkError> {
        let Some(log) = envelope.log_message() else {
            return Ok(());
        };
        self.writer
            .write(
                priority_for(log.message_type),
                &log.message,
                log.source_type.as_deref().unwrap_or_default(),
                log.source_instance.as_deref().unwrap_or_default(),
                log.timestamp,
            )
            .await
            .map(|_| ())
    }

    async fn close(&mut self) {
        if let Err(e) = self.writer.close().await {
            tracing::debug!(url = %self.writer.url(), error = %e, "Error closing drain");
        }
    }
}

/// Live-tail consumer fed through a bounded channel
///
/// A consumer that falls behind loses envelopes but stays connected.
#[derive(Debug)]
pub struct StreamDestination {
    sender: mpsc::Sender<Arc<Envelope>>,
}

impl StreamDestination {
    pub fn new(sender: mpsc::Sender<Arc<Envelope>>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Destination for StreamDestination {
    fn kind(&self) -> SinkKind {
        SinkKind::Stream
    }

    async fn open(&mut self, _blacklist: &Blacklist) -> Result<(), SinkError> {
        if self.sender.is_closed() {
            return Err(SinkError::Closed);
        }
        Ok(())
    }

    async fn deliver(&mut self, envelope: &Arc<Envelope>) -> Result<(), SinkError> {
        self.sender
            .try_send(Arc::clone(envelope))
            .map_err(|e| match e {
                TrySendError::Full(_) => SinkError::Full,
                TrySendError::Closed(_) => SinkError::Closed,
            })
    }

    async fn close(&mut self) {}
}
