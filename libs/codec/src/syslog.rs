//! RFC5424 syslog line formatting
//!
//! ```text
//! <PRI>1 TIMESTAMP loggregator APP-ID [SOURCE/ID] - - MSG\n
//! ```
//!
//! The two `-` fields are the RFC5424 MSGID and STRUCTURED-DATA slots, which
//! this system never fills.

use chrono::{DateTime, Timelike, Utc};

/// HOSTNAME field written into every line
pub const SYSLOG_HOSTNAME: &str = "loggregator";

/// Priority for stdout log lines (facility user, severity info)
pub const PRIORITY_INFO: i32 = 14;

/// Priority for stderr log lines (facility user, severity error)
pub const PRIORITY_ERROR: i32 = 11;

/// Format nanoseconds since the epoch as RFC3339 with up to microsecond
/// precision (trailing zeros trimmed) and a `+00:00` offset
pub fn format_timestamp(timestamp_nanos: i64) -> String {
    let secs = timestamp_nanos.div_euclid(1_000_000_000);
    let nanos = timestamp_nanos.rem_euclid(1_000_000_000) as u32;
    let time: DateTime<Utc> = DateTime::from_timestamp(secs, nanos).unwrap_or_default();

    let mut formatted = time.format("%Y-%m-%dT%H:%M:%S").to_string();
    let micros = time.nanosecond() / 1_000;
    if micros > 0 {
        let fraction = format!("{:06}", micros);
        formatted.push('.');
        formatted.push_str(fraction.trim_end_matches('0'));
    }
    formatted.push_str("+00:00");
    formatted
}

/// Render the source tag: `[APP/<id>]` for application sources, `[<type>]`
/// for everything else
pub fn format_source(source_type: &str, source_id: &str) -> String {
    if source_type.eq_ignore_ascii_case("APP") {
        format!("[{}/{}]", source_type, source_id)
    } else {
        format!("[{}]", source_type)
    }
}

/// Build a complete RFC5424 line
///
/// NUL bytes are removed from the payload and exactly one trailing newline
/// is guaranteed.
pub fn format_syslog(
    priority: i32,
    app_id: &str,
    source_type: &str,
    source_id: &str,
    payload: &[u8],
    timestamp_nanos: i64,
) -> Vec<u8> {
    let message: Vec<u8> = payload.iter().copied().filter(|&b| b != 0).collect();

    let header = format!(
        "<{}>1 {} {} {} {} - - ",
        priority,
        format_timestamp(timestamp_nanos),
        SYSLOG_HOSTNAME,
        app_id,
        format_source(source_type, source_id),
    );

    let mut line = Vec::with_capacity(header.len() + message.len() + 1);
    line.extend_from_slice(header.as_bytes());
    line.extend_from_slice(&message);
    if !message.ends_with(b"\n") {
        line.push(b'\n');
    }
    line
}
