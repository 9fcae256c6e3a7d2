// SPDX-License-Identifier: MIT OR Apache-2.0

//! The error taxonomy shared by every crate in the runtime.
//!
//! Every kind carries a message and, where one exists, an underlying cause.
//! The runtime's own plumbing (compile errors, missing factories) returns
//! these synchronously from chain-load calls; nodes surface them to their
//! chain via `TellFailure` instead of propagating a `Result` upward.

use std::fmt;

/// Broad category a [`RuleError`] belongs to, used to pick an HTTP status in
/// the admin surface and to pick a log level (`warn` for user-triggerable
/// categories, `error` for [`RuleError::Internal`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Chain/node configuration is invalid.
    Config,
    /// A chain, node, or router id does not exist.
    NotFound,
    /// An operation exceeded its deadline.
    Timeout,
    /// The operation's context was cancelled before it completed.
    Cancelled,
    /// Bytes were expected to be JSON and were not, or failed to parse.
    InvalidJson,
    /// A network/broker transport failed.
    Transport,
    /// A registry entry already exists under that key.
    Duplicate,
    /// Anything else, including converted panics.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidJson => "invalid_json",
            Self::Transport => "transport",
            Self::Duplicate => "duplicate",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The runtime's unified error type.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Chain or node configuration is invalid or missing a required field.
    #[error("config error: {0}")]
    Config(String),

    /// A chain, node, or router id was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An operation (aggregator quorum, endpoint call) exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The operation's cancellation token fired before completion.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Bytes failed to parse as JSON, or `GetJson` was called on non-JSON
    /// data.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// A broker/network transport operation failed.
    #[error("transport error: {message}")]
    Transport {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying I/O cause, if any.
        #[source]
        cause: Option<std::io::Error>,
    },

    /// A registry entry already exists under the requested key.
    #[error("duplicate registration: {0}")]
    Duplicate(String),

    /// A caught panic or other unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuleError {
    /// The broad category this error belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Config,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Cancelled(_) => ErrorCategory::Cancelled,
            Self::InvalidJson(_) => ErrorCategory::InvalidJson,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::Duplicate(_) => ErrorCategory::Duplicate,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Build a [`RuleError::Transport`] with no underlying cause.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            cause: None,
        }
    }

    /// Build a [`RuleError::Transport`] wrapping an I/O cause.
    #[must_use]
    pub fn transport_with_cause(message: impl Into<String>, cause: std::io::Error) -> Self {
        Self::Transport {
            message: message.into(),
            cause: Some(cause),
        }
    }
}

/// Convenience alias used throughout the runtime crates.
pub type RuleResult<T> = Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_round_trip_through_display() {
        assert_eq!(ErrorCategory::Config.to_string(), "config");
        assert_eq!(ErrorCategory::Internal.to_string(), "internal");
    }

    #[test]
    fn config_error_reports_config_category() {
        let err = RuleError::Config("missing field".into());
        assert_eq!(err.category(), ErrorCategory::Config);
    }

    #[test]
    fn invalid_json_wraps_source() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err = RuleError::InvalidJson(parse_err);
        assert_eq!(err.category(), ErrorCategory::InvalidJson);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn transport_without_cause_has_no_source() {
        let err = RuleError::transport("broker unreachable");
        assert!(std::error::Error::source(&err).is_none());
    }
}
