//! # a3s-subscriber
//!
//! Queue subscription, typed event dispatch, and acknowledgement handles for
//! the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-subscriber` sits between a message broker and an application's event
//! processing. A [`Subscriber`] drives a [`BrokerClient`]'s blocking consume
//! loop, turns every delivery into an [`EventContext`], and hands it to your
//! [`EventHandler`]. The context decides the message's fate:
//!
//! - `acknowledge_success` / `acknowledge_failure` — [`ThreadsafeAction`]s,
//!   safe to move to a worker thread
//! - `request_redelivery` — a [`RedeliveryAction`] whose future must run on
//!   the broker loop (`tokio::task::spawn_local`)
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_subscriber::{Event, EventContext, MemoryBrokerClient, Subscriber};
//!
//! # fn example() -> a3s_subscriber::Result<()> {
//! let client = MemoryBrokerClient::new();
//! client.publish(&br#"{"type": "run_checkpoint.received"}"#[..], "corr-1");
//!
//! let mut subscriber = Subscriber::new(client);
//! subscriber.consume("agent.jobs", |ctx: EventContext<Event>| {
//!     println!("{} ({})", ctx.event.event_type, ctx.correlation_id);
//!     ctx.acknowledge_success.invoke()
//! })?;
//! subscriber.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## Broker clients
//!
//! - **memory** — In-memory client for testing and single-process use
//! - **nats** — NATS JetStream durable pull consumers
//!
//! ## Failure handling
//!
//! Authentication and unrecoverable failures stop the client and propagate.
//! Protocol/channel failures stop the client, block for a linear reconnect
//! backoff (reset after a healthy connection, capped at 30s) and propagate.
//! Interrupts stop the client and surface as [`SubscriberError::Cancelled`].

pub mod broker;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod parser;
pub mod subscriber;
pub mod types;

// Re-export core types
pub use broker::{BrokerClient, DeliveryHandler};
pub use config::SubscriberConfig;
pub use context::{EventContext, Redelivery, RedeliveryAction, ThreadsafeAction};
pub use error::{FailureKind, Result, SubscriberError};
pub use handler::EventHandler;
pub use parser::{EventParser, JsonEventParser};
pub use subscriber::Subscriber;
pub use types::{Delivery, Event};

// Re-export broker clients for convenience
pub use broker::memory::MemoryBrokerClient;
pub use broker::nats::{NatsBrokerClient, NatsBrokerConfig, ShutdownHandle};
