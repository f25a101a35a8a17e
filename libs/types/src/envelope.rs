//! Telemetry envelope and payload definitions
//!
//! An [`Envelope`] is immutable once built or decoded: fields are private and
//! only exposed through accessors, so fan-out code can share one envelope
//! behind an `Arc` without copying.

use crate::EventType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope failed structural validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("event type {declared} does not match {actual} payload")]
    EventTypeMismatch {
        declared: EventType,
        actual: EventType,
    },

    #[error("envelope origin is empty")]
    MissingOrigin,
}

/// Stream a log line was written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Out,
    Err,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub message: Vec<u8>,
    pub message_type: MessageType,
    /// Nanoseconds since the Unix epoch
    pub timestamp: i64,
    pub app_id: Option<String>,
    pub source_type: Option<String>,
    pub source_instance: Option<String>,
}

impl LogMessage {
    pub fn new(
        message: impl Into<Vec<u8>>,
        message_type: MessageType,
        timestamp: i64,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            message_type,
            timestamp,
            app_id: Some(app_id.into()),
            source_type: None,
            source_instance: None,
        }
    }

    pub fn with_source(
        mut self,
        source_type: impl Into<String>,
        source_instance: impl Into<String>,
    ) -> Self {
        self.source_type = Some(source_type.into());
        self.source_instance = Some(source_instance.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterEvent {
    pub name: String,
    pub delta: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub source: String,
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetric {
    pub application_id: String,
    pub instance_index: i32,
    pub cpu_percentage: f64,
    pub memory_bytes: u64,
    pub disk_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpStartStop {
    pub start_timestamp: i64,
    pub stop_timestamp: i64,
    pub request_id: String,
    pub method: String,
    pub uri: String,
    pub status_code: i32,
    pub content_length: i64,
    pub application_id: Option<String>,
    pub instance_index: Option<i32>,
}

/// Typed envelope payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    HttpStartStop(HttpStartStop),
    LogMessage(LogMessage),
    ValueMetric(ValueMetric),
    CounterEvent(CounterEvent),
    Error(ErrorEvent),
    ContainerMetric(ContainerMetric),
}

impl Payload {
    pub fn event_type(&self) -> EventType {
        match self {
            Payload::HttpStartStop(_) => EventType::HttpStartStop,
            Payload::LogMessage(_) => EventType::LogMessage,
            Payload::ValueMetric(_) => EventType::ValueMetric,
            Payload::CounterEvent(_) => EventType::CounterEvent,
            Payload::Error(_) => EventType::Error,
            Payload::ContainerMetric(_) => EventType::ContainerMetric,
        }
    }
}

/// One unit of telemetry with origin, time and (optionally) application metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    origin: String,
    event_type: EventType,
    /// Nanoseconds since the Unix epoch
    timestamp: i64,
    payload: Payload,
}

impl Envelope {
    /// Build an envelope; the event type is taken from the payload
    pub fn new(origin: impl Into<String>, timestamp: i64, payload: Payload) -> Self {
        Self {
            origin: origin.into(),
            event_type: payload.event_type(),
            timestamp,
            payload,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Application the envelope belongs to, when the payload carries one
    pub fn app_id(&self) -> Option<&str> {
        match &self.payload {
            Payload::LogMessage(log) => log.app_id.as_deref(),
            Payload::ContainerMetric(metric) => Some(metric.application_id.as_str()),
            Payload::HttpStartStop(http) => http.application_id.as_deref(),
            Payload::ValueMetric(_) | Payload::CounterEvent(_) | Payload::Error(_) => None,
        }
    }

    pub fn log_message(&self) -> Option<&LogMessage> {
        match &self.payload {
            Payload::LogMessage(log) => Some(log),
            _ => None,
        }
    }

    pub fn container_metric(&self) -> Option<&ContainerMetric> {
        match &self.payload {
            Payload::ContainerMetric(metric) => Some(metric),
            _ => None,
        }
    }

    /// Check the invariants a decoded envelope must satisfy
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.origin.is_empty() {
            return Err(EnvelopeError::MissingOrigin);
        }
        let actual = self.payload.event_type();
        if self.event_type != actual {
            return Err(EnvelopeError::EventTypeMismatch {
                declared: self.event_type,
                actual,
            });
        }
        Ok(())
    }
}
