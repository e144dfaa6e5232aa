//! Subscriber — drives a broker client and dispatches typed events
//!
//! `consume` blocks on the broker client's `run`, classifies whatever it
//! fails with, and for every delivery builds an [`EventContext`] for the
//! caller's [`EventHandler`].
//!
//! Transient failures stop the client, sleep for the reconnect delay and
//! then propagate. `consume` does not reconnect on its own; the caller
//! builds a new subscriber or calls `consume` again.

use crate::broker::{BrokerClient, DeliveryHandler};
use crate::config::SubscriberConfig;
use crate::context::{EventContext, RedeliveryAction};
use crate::error::{FailureKind, Result, SubscriberError};
use crate::handler::EventHandler;
use crate::parser::{EventParser, JsonEventParser};
use crate::types::{Delivery, Event};
use std::sync::Arc;
use std::time::Duration;

type SleepFn = Box<dyn Fn(Duration) + Send + Sync>;

/// Manages one open subscription to a broker queue
pub struct Subscriber<C, P = JsonEventParser<Event>> {
    client: Arc<C>,
    parser: P,
    config: SubscriberConfig,

    /// Reconnect backoff counter in seconds
    reconnect_delay: u64,

    sleep: SleepFn,
}

impl<C: BrokerClient + 'static> Subscriber<C> {
    /// Create a subscriber parsing JSON [`Event`] envelopes
    pub fn new(client: C) -> Self {
        Self::with_parser(client, JsonEventParser::new())
    }
}

impl<C: BrokerClient + 'static, P: EventParser> Subscriber<C, P> {
    /// Create a subscriber with a custom event parser
    pub fn with_parser(client: C, parser: P) -> Self {
        Self {
            client: Arc::new(client),
            parser,
            config: SubscriberConfig::default(),
            reconnect_delay: 0,
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// Replace the configuration, rejecting invalid values
    pub fn with_config(mut self, config: SubscriberConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Replace the blocking sleep used for reconnect backoff
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    /// Get the underlying broker client
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get the configuration
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Current reconnect backoff in seconds
    pub fn reconnect_delay(&self) -> u64 {
        self.reconnect_delay
    }

    /// Subscribe to `queue`, invoking `on_message` for every delivery
    ///
    /// Blocks until the broker client's run loop ends. Returns `Ok(())` only
    /// on a clean stop. Any error terminates the subscription.
    pub fn consume<H>(&mut self, queue: &str, on_message: H) -> Result<()>
    where
        H: EventHandler<P::Event>,
    {
        tracing::info!(queue, client = self.client.name(), "Starting consumer");

        let result = {
            let mut dispatcher = Dispatcher {
                client: &self.client,
                parser: &self.parser,
                redelivery_delay: self.config.redelivery_delay(),
                on_message,
            };
            self.client.run(queue, &mut dispatcher)
        };

        let err = match result {
            Ok(()) => {
                tracing::info!(queue, "Consumer finished");
                return Ok(());
            }
            Err(err) => err,
        };

        match err.kind() {
            FailureKind::Fatal => {
                tracing::error!(queue, error = %err, "Unrecoverable broker failure");
                self.client.stop();
                Err(err)
            }
            FailureKind::Transient => {
                self.client.stop();
                let delay = self.next_reconnect_delay();
                tracing::warn!(
                    queue,
                    error = %err,
                    delay_secs = delay,
                    "Broker connection lost, backing off"
                );
                (self.sleep)(Duration::from_secs(delay));
                Err(err)
            }
            FailureKind::Cancellation => {
                tracing::warn!(queue, "Consumer interrupted");
                self.client.stop();
                Err(SubscriberError::Cancelled)
            }
            FailureKind::Unclassified => Err(err),
        }
    }

    /// Stop the broker client and release its connection
    ///
    /// Call once consumption has ended.
    pub fn close(&self) {
        tracing::info!(client = self.client.name(), "Closing subscriber");
        self.client.stop();
    }

    /// Linear backoff: reset after a healthy connection, otherwise one more second
    fn next_reconnect_delay(&mut self) -> u64 {
        if self.client.was_consuming() {
            self.reconnect_delay = 0;
        } else {
            self.reconnect_delay += 1;
        }
        self.reconnect_delay = self
            .reconnect_delay
            .min(self.config.max_reconnect_delay_secs);
        self.reconnect_delay
    }
}

/// Translates raw deliveries into event contexts for one `consume` call
struct Dispatcher<'a, C, P, H> {
    client: &'a Arc<C>,
    parser: &'a P,
    redelivery_delay: Duration,
    on_message: H,
}

impl<C, P, H> DeliveryHandler for Dispatcher<'_, C, P, H>
where
    C: BrokerClient + 'static,
    P: EventParser,
    H: EventHandler<P::Event>,
{
    fn on_delivery(&mut self, delivery: Delivery) -> Result<()> {
        let event = self.parser.parse(&delivery.body)?;
        let delivery_tag = delivery.delivery_tag;

        // The caller decides when to ack/nack, possibly from another thread
        let acknowledge_success = self.client.threadsafe_ack(delivery_tag);
        let acknowledge_failure = self.client.threadsafe_nack(delivery_tag, false);

        let client = Arc::clone(self.client);
        let request_redelivery =
            RedeliveryAction::new(delivery_tag, self.redelivery_delay, move || {
                client.nack(delivery_tag, true)
            });

        tracing::debug!(
            delivery_tag,
            correlation_id = %delivery.correlation_id,
            redelivered = delivery.redelivered,
            "Dispatching event"
        );

        self.on_message.on_message(EventContext {
            event,
            correlation_id: delivery.correlation_id,
            acknowledge_success,
            acknowledge_failure,
            request_redelivery,
        })
    }
}
