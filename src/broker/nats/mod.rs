//! NATS JetStream broker client
//!
//! Implements `BrokerClient` on top of a durable JetStream pull consumer.
//! Each queue name is used as the consumer's filter subject.

mod client;
mod config;

pub use client::{NatsBrokerClient, ShutdownHandle};
pub use config::NatsBrokerConfig;
