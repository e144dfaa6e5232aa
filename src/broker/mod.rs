//! Broker client trait — the boundary to the message broker
//!
//! A broker client owns the network connection and its I/O event loop.
//! The subscriber drives it through `run` and hands it a
//! [`DeliveryHandler`] that is called once per raw message.

use crate::context::ThreadsafeAction;
use crate::error::Result;
use crate::types::Delivery;

pub mod memory;
pub mod nats;

/// Receives raw deliveries on the thread driving the broker loop
pub trait DeliveryHandler {
    /// Handle one delivery. An error ends the broker loop and is returned from `run`.
    fn on_delivery(&mut self, delivery: Delivery) -> Result<()>;
}

/// Core trait for broker backends
///
/// `run` blocks the calling thread. Implementations drive their I/O on a
/// single-threaded execution context inside `run`, so futures spawned with
/// `tokio::task::spawn_local` from a handler are polled by the broker loop.
pub trait BrokerClient: Send + Sync {
    /// Consume `queue` until stopped or failed
    ///
    /// Returns `Ok(())` only on a clean stop.
    fn run(&self, queue: &str, handler: &mut dyn DeliveryHandler) -> Result<()>;

    /// Halt the run loop and release the connection
    fn stop(&self);

    /// Acknowledge `delivery_tag`; safe to invoke from any thread
    fn threadsafe_ack(&self, delivery_tag: u64) -> ThreadsafeAction;

    /// Reject `delivery_tag`, optionally requeueing; safe to invoke from any thread
    fn threadsafe_nack(&self, delivery_tag: u64, requeue: bool) -> ThreadsafeAction;

    /// Reject `delivery_tag` directly
    ///
    /// Only valid on the thread driving `run`.
    fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// Whether the connection reached an actively consuming state before the last failure
    fn was_consuming(&self) -> bool;

    /// Client name (e.g., "nats", "memory")
    fn name(&self) -> &str;
}
