//! Gateway client error types

use std::fmt;
use thiserror::Error;

/// Why a transient failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Request timed out - the gateway may or may not have queued the payout
    Timeout,
    /// Connection refused, reset, DNS, TLS
    Network,
    /// 5xx from the gateway
    Http(u16),
    /// 429 / spike arrest
    RateLimited,
    /// 401 that survived one token refresh
    Unauthorized,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::Timeout => write!(f, "TIMEOUT"),
            TransientKind::Network => write!(f, "NETWORK"),
            TransientKind::Http(status) => write!(f, "HTTP_{}", status),
            TransientKind::RateLimited => write!(f, "RATE_LIMITED"),
            TransientKind::Unauthorized => write!(f, "UNAUTHORIZED"),
        }
    }
}

/// Gateway client errors, split by retry classification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Transient gateway error ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },

    #[error("Gateway rejected payout [{code}]: {description}")]
    Permanent { code: String, description: String },
}

impl ProviderError {
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        ProviderError::Transient {
            kind,
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    /// Timeout means the payout may already be queued at the gateway
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient {
                kind: TransientKind::Timeout,
                ..
            }
        )
    }

    /// Code recorded as `result_code` / `response_code`
    pub fn code(&self) -> String {
        match self {
            ProviderError::Transient { kind, .. } => kind.to_string(),
            ProviderError::Permanent { code, .. } => code.clone(),
        }
    }

    /// Human-readable description recorded as `result_description`
    pub fn description(&self) -> String {
        match self {
            ProviderError::Transient { message, .. } => message.clone(),
            ProviderError::Permanent { description, .. } => description.clone(),
        }
    }

    /// Error classification name for API responses
    pub fn classification(&self) -> &'static str {
        match self {
            ProviderError::Transient { .. } => "TRANSIENT_GATEWAY_ERROR",
            ProviderError::Permanent { .. } => "PERMANENT_GATEWAY_ERROR",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::transient(TransientKind::Timeout, e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::transient(TransientKind::Http(status.as_u16()), e.to_string())
        } else {
            ProviderError::transient(TransientKind::Network, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let timeout = ProviderError::transient(TransientKind::Timeout, "deadline elapsed");
        assert!(timeout.is_transient());
        assert!(timeout.is_timeout());
        assert_eq!(timeout.code(), "TIMEOUT");
        assert_eq!(timeout.classification(), "TRANSIENT_GATEWAY_ERROR");

        let upstream = ProviderError::transient(TransientKind::Http(503), "unavailable");
        assert!(upstream.is_transient());
        assert!(!upstream.is_timeout());
        assert_eq!(upstream.code(), "HTTP_503");

        let rejected = ProviderError::Permanent {
            code: "2040".to_string(),
            description: "Credit party customer type can't be supported".to_string(),
        };
        assert!(!rejected.is_transient());
        assert_eq!(rejected.code(), "2040");
        assert_eq!(rejected.classification(), "PERMANENT_GATEWAY_ERROR");
    }

    #[test]
    fn test_display() {
        let err = ProviderError::transient(TransientKind::RateLimited, "spike arrest");
        assert_eq!(
            err.to_string(),
            "Transient gateway error (RATE_LIMITED): spike arrest"
        );
    }
}
