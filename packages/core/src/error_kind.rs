//! Failure taxonomy shared by providers, the failure recorder and alerts.

use serde::{Deserialize, Serialize};

/// Classified kind of an external failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    Timeout,
    Network,
    Authentication,
    Authorization,
    Server,
    ProfileNotFound,
    Validation,
    Unknown,
}

const RATE_LIMIT_HINTS: &[&str] = &["rate limit", "rate_limit", "too many requests", "quota"];
const TIMEOUT_HINTS: &[&str] = &["timeout", "timed out", "etimedout", "deadline exceeded"];
const NETWORK_HINTS: &[&str] = &[
    "econnrefused",
    "econnreset",
    "enotfound",
    "connection refused",
    "connection reset",
    "network",
    "dns",
    "socket hang up",
];
const AUTHENTICATION_HINTS: &[&str] = &["unauthorized", "invalid api key", "authentication"];
const AUTHORIZATION_HINTS: &[&str] = &["forbidden", "permission denied", "not allowed"];
const NOT_FOUND_HINTS: &[&str] = &["not found", "no such user", "profile unavailable"];
const VALIDATION_HINTS: &[&str] = &["invalid", "validation", "malformed", "parse"];
const SERVER_HINTS: &[&str] = &[
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "overloaded",
];

impl ErrorKind {
    /// Deterministic classification from an optional HTTP status and a message.
    /// The status wins when it is conclusive; otherwise message substrings
    /// are checked in a fixed order.
    pub fn classify(status: Option<u16>, message: &str) -> ErrorKind {
        if let Some(kind) = status.and_then(Self::from_status) {
            return kind;
        }

        let msg = message.to_ascii_lowercase();
        let has = |hints: &[&str]| hints.iter().any(|h| msg.contains(h));

        if has(RATE_LIMIT_HINTS) {
            ErrorKind::RateLimit
        } else if has(TIMEOUT_HINTS) {
            ErrorKind::Timeout
        } else if has(AUTHENTICATION_HINTS) {
            ErrorKind::Authentication
        } else if has(AUTHORIZATION_HINTS) {
            ErrorKind::Authorization
        } else if has(SERVER_HINTS) {
            ErrorKind::Server
        } else if has(NETWORK_HINTS) {
            ErrorKind::Network
        } else if has(NOT_FOUND_HINTS) {
            ErrorKind::ProfileNotFound
        } else if has(VALIDATION_HINTS) {
            ErrorKind::Validation
        } else {
            ErrorKind::Unknown
        }
    }

    fn from_status(status: u16) -> Option<ErrorKind> {
        match status {
            429 => Some(ErrorKind::RateLimit),
            408 | 504 => Some(ErrorKind::Timeout),
            401 => Some(ErrorKind::Authentication),
            403 => Some(ErrorKind::Authorization),
            404 => Some(ErrorKind::ProfileNotFound),
            400 | 422 => Some(ErrorKind::Validation),
            500..=599 => Some(ErrorKind::Server),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "RateLimitError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::Authorization => "AuthorizationError",
            ErrorKind::Server => "ServerError",
            ErrorKind::ProfileNotFound => "ProfileNotFoundError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Unknown => "UnknownError",
        }
    }

    /// Worth another attempt against the same provider.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Timeout | ErrorKind::Network | ErrorKind::Server
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_takes_precedence() {
        assert_eq!(ErrorKind::classify(Some(429), "timeout"), ErrorKind::RateLimit);
        assert_eq!(ErrorKind::classify(Some(503), ""), ErrorKind::Server);
        assert_eq!(ErrorKind::classify(Some(401), ""), ErrorKind::Authentication);
        assert_eq!(ErrorKind::classify(Some(403), ""), ErrorKind::Authorization);
        assert_eq!(ErrorKind::classify(Some(404), ""), ErrorKind::ProfileNotFound);
    }

    #[test]
    fn message_fallback() {
        assert_eq!(ErrorKind::classify(None, "connect ECONNREFUSED"), ErrorKind::Network);
        assert_eq!(ErrorKind::classify(None, "request timed out"), ErrorKind::Timeout);
        assert_eq!(ErrorKind::classify(None, "Rate limit exceeded"), ErrorKind::RateLimit);
        assert_eq!(ErrorKind::classify(Some(302), "weird"), ErrorKind::Unknown);
    }
}
