//! Subscriber configuration

use crate::error::{Result, SubscriberError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a [`Subscriber`](crate::Subscriber)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriberConfig {
    /// Delay before a requested redelivery is sent to the broker (seconds)
    pub redelivery_delay_secs: u64,

    /// Ceiling for the reconnect backoff counter (seconds)
    pub max_reconnect_delay_secs: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            redelivery_delay_secs: 3,
            max_reconnect_delay_secs: 30,
        }
    }
}

impl SubscriberConfig {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_secs(self.redelivery_delay_secs)
    }

    /// Reject configurations that would disable backoff entirely
    pub fn validate(&self) -> Result<()> {
        if self.max_reconnect_delay_secs == 0 {
            return Err(SubscriberError::Config(
                "maxReconnectDelaySecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
