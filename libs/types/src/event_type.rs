//! Envelope event types and the metric-key table derived from them

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of telemetry carried by an [`crate::Envelope`]
///
/// Discriminants match the wire tags used by emitting agents, so they must
/// never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    HttpStartStop = 4,
    LogMessage = 5,
    ValueMetric = 6,
    CounterEvent = 7,
    Error = 8,
    ContainerMetric = 9,
}

impl EventType {
    /// Every event type, in wire-tag order
    pub const ALL: [EventType; 6] = [
        EventType::HttpStartStop,
        EventType::LogMessage,
        EventType::ValueMetric,
        EventType::CounterEvent,
        EventType::Error,
        EventType::ContainerMetric,
    ];

    /// Canonical event type name as emitted on the wire
    pub const fn name(self) -> &'static str {
        match self {
            EventType::HttpStartStop => "HttpStartStop",
            EventType::LogMessage => "LogMessage",
            EventType::ValueMetric => "ValueMetric",
            EventType::CounterEvent => "CounterEvent",
            EventType::Error => "Error",
            EventType::ContainerMetric => "ContainerMetric",
        }
    }

    /// Wire tag
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Look up an event type from its wire tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Stable metric key for this event type: the name with its first
    /// character lower-cased (`LogMessage` -> `logMessage`)
    pub fn metric_key(self) -> &'static str {
        METRIC_KEYS
            .get(&self)
            .map(String::as_str)
            .unwrap_or_else(|| self.name())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lower-case the first character of an identifier
pub fn lower_first(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

static METRIC_KEYS: Lazy<HashMap<EventType, String>> = Lazy::new(|| {
    EventType::ALL
        .into_iter()
        .map(|t| (t, lower_first(t.name())))
        .collect()
});
