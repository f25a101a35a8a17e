use network::{BlacklistError, BlacklistViolation};

#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Timeout after {0} ms")]
    Timeout(u64),

    #[error("Unknown drain scheme {scheme} in {url}")]
    UnknownScheme { scheme: String, url: String },

    #[error("Invalid drain URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Blacklisted(#[from] BlacklistViolation),

    #[error("Sink closed")]
    Closed,

    /// A live-tail consumer has no room for the envelope
    #[error("Consumer buffer full")]
    Full,

    #[error("IO error: {0}")]
    Io(String),
}

impl SinkError {
    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SinkError::ConnectionFailed(_)
                | SinkError::ConnectionLost(_)
                | SinkError::WriteFailed(_)
                | SinkError::Timeout(_)
                | SinkError::Io(_)
        )
    }

    /// Check if this is a connection-related error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            SinkError::ConnectionFailed(_) | SinkError::ConnectionLost(_)
        )
    }

    /// Errors that reject a destination outright, before any network I/O
    pub fn is_destination_error(&self) -> bool {
        matches!(
            self,
            SinkError::UnknownScheme { .. } | SinkError::InvalidUrl { .. } | SinkError::Blacklisted(_)
        )
    }

    /// Create a connection failed error
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        SinkError::ConnectionFailed(msg.into())
    }

    pub fn write_failed(msg: impl Into<String>) -> Self {
        SinkError::WriteFailed(msg.into())
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        SinkError::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(duration: std::time::Duration) -> Self {
        SinkError::Timeout(duration.as_millis() as u64)
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

impl From<BlacklistError> for SinkError {
    fn from(err: BlacklistError) -> Self {
        match err {
            BlacklistError::Violation(violation) => SinkError::Blacklisted(violation),
            other => SinkError::ConnectionFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SinkError::timeout(std::time::Duration::from_secs(1)).is_recoverable());
        assert!(SinkError::connection_failed("refused").is_connection_error());
        assert!(!SinkError::Closed.is_recoverable());
        assert!(!SinkError::Full.is_recoverable());

        let blacklisted: SinkError = BlacklistViolation {
            host: "10.0.0.5".to_string(),
            address: "10.0.0.5".parse().unwrap(),
        }
        .into();
        assert!(blacklisted.is_destination_error());
        assert!(!blacklisted.is_recoverable());
    }

    #[test]
    fn test_timeout_reports_millis() {
        let err = SinkError::timeout(std::time::Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timeout after 1500 ms");
    }
}
