//! NATS broker client configuration

use crate::error::{Result, SubscriberError};
use serde::{Deserialize, Serialize};

/// Connection and consumer settings for [`NatsBrokerClient`](super::NatsBrokerClient)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsBrokerConfig {
    /// NATS server URL
    pub url: String,

    /// Optional auth token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// JetStream stream holding the queues
    pub stream_name: String,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// How long the server waits for an ack before redelivering (seconds)
    pub ack_wait_secs: u64,

    /// Message header carrying the correlation id
    pub correlation_header: String,

    /// End a run with `Interrupted` on Ctrl-C
    ///
    /// Listening for SIGINT replaces its default action for the whole
    /// process, including after the run ends, so leave this off when the
    /// host application handles signals itself.
    pub handle_interrupt: bool,
}

impl Default for NatsBrokerConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            token: None,
            stream_name: "AGENT_JOBS".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            ack_wait_secs: 30,
            correlation_header: "Correlation-Id".to_string(),
            handle_interrupt: false,
        }
    }
}

impl NatsBrokerConfig {
    /// Durable consumer name for a queue subject
    ///
    /// Consumer names may not contain dots or wildcards.
    pub fn consumer_name(&self, queue: &str) -> String {
        queue
            .chars()
            .map(|c| match c {
                '.' | '*' | '>' | ' ' => '-',
                other => other,
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(SubscriberError::Config("url must not be empty".to_string()));
        }
        if self.stream_name.is_empty() {
            return Err(SubscriberError::Config(
                "streamName must not be empty".to_string(),
            ));
        }
        if self.correlation_header.is_empty() {
            return Err(SubscriberError::Config(
                "correlationHeader must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
