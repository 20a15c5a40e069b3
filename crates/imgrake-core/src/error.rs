//! Error types for outbound requests and run setup

use std::fmt;

/// Failure of a single outbound request.
#[derive(Debug)]
pub enum FetchError {
    /// Connection, DNS, TLS, timeout or body-read failure.
    Transport { message: String, timeout: bool },
    /// Non-2xx status where the caller asked for it to be an error
    /// (proxied requests).
    Status { status: u16, url: String },
    /// Request could not be built (bad URL, bad proxy address).
    Invalid(String),
    /// Local I/O error.
    Io(std::io::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport {
                message,
                timeout: true,
            } => write!(f, "timed out: {message}"),
            Self::Transport { message, .. } => write!(f, "transport error: {message}"),
            Self::Status { status, url } => write!(f, "HTTP {status} from {url}"),
            Self::Invalid(msg) => write!(f, "invalid request: {msg}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl FetchError {
    /// Create from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_builder() {
            return Self::Invalid(e.to_string());
        }
        Self::Transport {
            message: e.to_string(),
            timeout: e.is_timeout(),
        }
    }

    /// Transient network/HTTP-layer failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Status { .. } => true,
            Self::Invalid(_) => false,
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Invalid run configuration, detected before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroThreads(&'static str),
    InvalidHeader { name: String, reason: String },
    InvalidProxy(String),
    InvalidSizeBounds,
    InvalidPacing,
    InvalidRetry(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroThreads(stage) => write!(f, "{stage} needs at least one thread"),
            Self::InvalidHeader { name, reason } => {
                write!(f, "invalid header {name:?}: {reason}")
            }
            Self::InvalidProxy(addr) => write!(f, "invalid proxy address {addr:?}"),
            Self::InvalidSizeBounds => write!(f, "min_size must not exceed max_size"),
            Self::InvalidPacing => write!(f, "pace_min must not exceed pace_max"),
            Self::InvalidRetry(msg) => write!(f, "invalid retry policy: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn transport(timeout: bool) -> FetchError {
        FetchError::Transport {
            message: "connection reset".to_string(),
            timeout,
        }
    }

    #[test]
    fn transport_retryable() {
        assert!(transport(false).is_retryable());
        assert!(transport(true).is_retryable());
    }

    #[test]
    fn status_retryable() {
        let err = FetchError::Status {
            status: 503,
            url: "http://x".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn invalid_not_retryable() {
        assert!(!FetchError::Invalid("bad url".into()).is_retryable());
    }

    #[test]
    fn io_storage_full_not_retryable() {
        let err = FetchError::Io(std::io::Error::new(ErrorKind::StorageFull, "disk full"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_timeout() {
        assert_eq!(format!("{}", transport(true)), "timed out: connection reset");
        assert_eq!(
            format!("{}", transport(false)),
            "transport error: connection reset"
        );
    }

    #[test]
    fn display_status() {
        let err = FetchError::Status {
            status: 404,
            url: "http://a/b.jpg".into(),
        };
        assert_eq!(format!("{err}"), "HTTP 404 from http://a/b.jpg");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidHeader {
            name: "bad name".into(),
            reason: "invalid HTTP header name".into(),
        };
        assert!(format!("{err}").contains("bad name"));
        assert_eq!(
            format!("{}", ConfigError::ZeroThreads("parser")),
            "parser needs at least one thread"
        );
    }
}
