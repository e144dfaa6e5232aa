//! Error types for a3s-subscriber
//!
//! Broker failures are classified into a [`FailureKind`] so the
//! subscriber can decide whether to back off before propagating.

use thiserror::Error;

/// How a failure surfacing from the broker loop is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection parameters are wrong or the broker gave up; retrying cannot help
    Fatal,
    /// Protocol or channel level failure, eligible for reconnect backoff
    Transient,
    /// Interrupt from the environment
    Cancellation,
    /// Not classified by the subscriber (parse, handler, ack failures)
    Unclassified,
}

/// Errors that can occur while consuming from a broker
#[derive(Debug, Error)]
pub enum SubscriberError {
    /// Broker rejected the credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transport or protocol level failure
    #[error("Broker protocol error: {0}")]
    Protocol(String),

    /// Channel/consumer level failure
    #[error("Channel error on '{queue}': {reason}")]
    Channel {
        queue: String,
        reason: String,
    },

    /// Interrupt observed by the broker loop
    #[error("Broker loop interrupted")]
    Interrupted,

    /// Distinct signal returned by `consume` after an interrupt
    #[error("Subscription cancelled")]
    Cancelled,

    /// Broker client judged the connection non-retryable
    #[error("Unrecoverable connection error: {0}")]
    UnrecoverableConnection(String),

    /// Event parsing failure
    #[error("Failed to parse event: {0}")]
    Parse(String),

    /// Caller-supplied handler failure
    #[error("Handler error: {0}")]
    Handler(String),

    /// Acknowledgement failure
    #[error("Failed to acknowledge delivery {delivery_tag}: {reason}")]
    Ack {
        delivery_tag: u64,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SubscriberError {
    /// Create a handler error from any displayable message
    pub fn handler(message: impl Into<String>) -> Self {
        SubscriberError::Handler(message.into())
    }

    /// Classify this error
    pub fn kind(&self) -> FailureKind {
        match self {
            SubscriberError::Authentication(_) | SubscriberError::UnrecoverableConnection(_) => {
                FailureKind::Fatal
            }
            SubscriberError::Protocol(_) | SubscriberError::Channel { .. } => {
                FailureKind::Transient
            }
            SubscriberError::Interrupted | SubscriberError::Cancelled => FailureKind::Cancellation,
            SubscriberError::Parse(_)
            | SubscriberError::Handler(_)
            | SubscriberError::Ack { .. }
            | SubscriberError::Config(_) => FailureKind::Unclassified,
        }
    }

    /// Whether a fresh connection might succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Transient
    }
}

impl From<serde_json::Error> for SubscriberError {
    fn from(err: serde_json::Error) -> Self {
        SubscriberError::Parse(err.to_string())
    }
}

/// Result type alias for subscriber operations
pub type Result<T> = std::result::Result<T, SubscriberError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            SubscriberError::Authentication("bad".into()).kind(),
            FailureKind::Fatal
        );
        assert_eq!(
            SubscriberError::UnrecoverableConnection("gone".into()).kind(),
            FailureKind::Fatal
        );
        assert_eq!(
            SubscriberError::Protocol("reset".into()).kind(),
            FailureKind::Transient
        );
        assert_eq!(
            SubscriberError::Channel {
                queue: "q".into(),
                reason: "closed".into()
            }
            .kind(),
            FailureKind::Transient
        );
        assert_eq!(SubscriberError::Interrupted.kind(), FailureKind::Cancellation);
        assert_eq!(
            SubscriberError::Parse("eof".into()).kind(),
            FailureKind::Unclassified
        );
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(SubscriberError::Protocol("x".into()).is_retryable());
        assert!(!SubscriberError::Authentication("x".into()).is_retryable());
        assert!(!SubscriberError::Cancelled.is_retryable());
        assert!(!SubscriberError::handler("x").is_retryable());
    }

    #[test]
    fn test_from_serde_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SubscriberError = err.into();
        assert!(matches!(err, SubscriberError::Parse(_)));
        assert!(err.to_string().starts_with("Failed to parse event"));
    }

    #[test]
    fn test_channel_display() {
        let err = SubscriberError::Channel {
            queue: "agent-jobs".into(),
            reason: "consumer deleted".into(),
        };
        assert_eq!(
            err.to_string(),
            "Channel error on 'agent-jobs': consumer deleted"
        );
    }
}
