//! NATS JetStream broker client — connect, consume, acknowledge

use super::config::NatsBrokerConfig;
use crate::broker::{BrokerClient, DeliveryHandler};
use crate::context::ThreadsafeAction;
use crate::error::{Result, SubscriberError};
use crate::types::Delivery;
use async_nats::jetstream::{self, AckKind};
use async_nats::ConnectErrorKind;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Acknowledgement requested by a handler, applied on the broker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckCommand {
    Ack(u64),
    Nack { delivery_tag: u64, requeue: bool },
}

impl AckCommand {
    fn delivery_tag(&self) -> u64 {
        match *self {
            AckCommand::Ack(delivery_tag) => delivery_tag,
            AckCommand::Nack { delivery_tag, .. } => delivery_tag,
        }
    }

    fn ack_kind(&self) -> AckKind {
        match *self {
            AckCommand::Ack(_) => AckKind::Ack,
            AckCommand::Nack { requeue: true, .. } => AckKind::Nak(None),
            AckCommand::Nack { requeue: false, .. } => AckKind::Term,
        }
    }
}

type CommandSender = mpsc::UnboundedSender<AckCommand>;

/// Unsettled deliveries of one run
///
/// Entries are keyed by delivery tag and, when known, by stream sequence.
/// A redelivery of the same stream message replaces the older entry, so
/// deliveries a handler never settles do not accumulate.
struct InFlight<M> {
    by_tag: HashMap<u64, (Option<u64>, M)>,
    by_sequence: HashMap<u64, u64>,
}

impl<M> InFlight<M> {
    fn new() -> Self {
        Self {
            by_tag: HashMap::new(),
            by_sequence: HashMap::new(),
        }
    }

    /// Track a delivery, returning the tag of the stale delivery it replaced
    fn insert(
        &mut self,
        delivery_tag: u64,
        stream_sequence: Option<u64>,
        message: M,
    ) -> Option<u64> {
        let stale = stream_sequence
            .and_then(|sequence| self.by_sequence.insert(sequence, delivery_tag));
        if let Some(stale_tag) = stale {
            self.by_tag.remove(&stale_tag);
        }
        self.by_tag.insert(delivery_tag, (stream_sequence, message));
        stale
    }

    fn remove(&mut self, delivery_tag: u64) -> Option<M> {
        let (stream_sequence, message) = self.by_tag.remove(&delivery_tag)?;
        if let Some(sequence) = stream_sequence {
            if self.by_sequence.get(&sequence) == Some(&delivery_tag) {
                self.by_sequence.remove(&sequence);
            }
        }
        Some(message)
    }

    fn len(&self) -> usize {
        self.by_tag.len()
    }
}

/// Stops a [`NatsBrokerClient`] from any thread
///
/// A shutdown requested while no run is active ends the next run as soon
/// as it is consuming.
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask the broker loop to return `Ok(())`
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// NATS JetStream broker client
///
/// `run` connects, binds a durable pull consumer to the queue subject and
/// dispatches messages on a single-threaded runtime. Threadsafe acks are
/// sent over a channel and applied by the loop, so they may be invoked from
/// any thread while `run` is active.
pub struct NatsBrokerClient {
    config: Arc<NatsBrokerConfig>,

    /// Command channel into the active loop; `None` when not running
    commands: Mutex<Option<CommandSender>>,

    shutdown: Arc<watch::Sender<bool>>,

    running: AtomicBool,

    consuming: AtomicBool,

    /// Last delivery tag handed out; never reused across runs
    next_tag: AtomicU64,
}

impl NatsBrokerClient {
    /// Create a client; the connection is opened by `run`
    pub fn new(config: NatsBrokerConfig) -> Result<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            commands: Mutex::new(None),
            shutdown: Arc::new(shutdown),
            running: AtomicBool::new(false),
            consuming: AtomicBool::new(false),
            next_tag: AtomicU64::new(0),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsBrokerConfig {
        &self.config
    }

    /// Handle for stopping the loop from another thread
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    fn lock_commands(&self) -> MutexGuard<'_, Option<CommandSender>> {
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_delivery_tag(&self) -> u64 {
        self.next_tag.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn command_action(&self, command: AckCommand) -> ThreadsafeAction {
        let sender = self.lock_commands().clone();
        ThreadsafeAction::new(command.delivery_tag(), move || {
            send_command(sender.as_ref(), command)
        })
    }

    async fn consume_loop(
        &self,
        queue: &str,
        handler: &mut dyn DeliveryHandler,
        commands: &mut mpsc::UnboundedReceiver<AckCommand>,
    ) -> Result<()> {
        let mut stopped = self.shutdown.subscribe();
        let channel_error = |reason: String| SubscriberError::Channel {
            queue: queue.to_string(),
            reason,
        };

        let client = connect(&self.config).await?;
        let js = jetstream::new(client);

        let stream = js
            .get_stream(&self.config.stream_name)
            .await
            .map_err(|e| {
                channel_error(format!(
                    "Stream '{}' unavailable: {}",
                    self.config.stream_name, e
                ))
            })?;

        let consumer_name = self.config.consumer_name(queue);
        let consumer = stream
            .get_or_create_consumer(
                &consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.clone()),
                    filter_subject: queue.to_string(),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(self.config.ack_wait_secs),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                channel_error(format!(
                    "Failed to create durable consumer '{}': {}",
                    consumer_name, e
                ))
            })?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| channel_error(e.to_string()))?;
        tokio::pin!(messages);

        self.consuming.store(true, Ordering::SeqCst);
        tracing::info!(
            queue,
            consumer = %consumer_name,
            stream = %self.config.stream_name,
            "Consuming"
        );

        let mut in_flight = InFlight::new();
        let interrupt = interrupt_signal(self.config.handle_interrupt);
        tokio::pin!(interrupt);

        loop {
            tokio::select! {
                biased;

                Some(command) = commands.recv() => {
                    apply_command(command, &mut in_flight).await;
                }
                _ = &mut interrupt => {
                    tracing::warn!(queue, "Interrupt received");
                    return Err(SubscriberError::Interrupted);
                }
                _ = stopped.wait_for(|stop| *stop) => {
                    tracing::info!(queue, in_flight = in_flight.len(), "Broker loop stopped");
                    return Ok(());
                }
                next = messages.next() => match next {
                    Some(Ok(message)) => {
                        let delivery_tag = self.next_delivery_tag();
                        let (stream_sequence, delivered) = match message.info() {
                            Ok(info) => (Some(info.stream_sequence), info.delivered),
                            Err(_) => (None, 1),
                        };
                        let delivery = self.to_delivery(&message, delivery_tag, delivered > 1);
                        let stale = in_flight.insert(delivery_tag, stream_sequence, message);
                        if let Some(stale_tag) = stale {
                            tracing::debug!(
                                delivery_tag,
                                stale_tag,
                                "Redelivered message replaces unsettled delivery"
                            );
                        }
                        handler.on_delivery(delivery)?;
                    }
                    Some(Err(e)) => {
                        return Err(SubscriberError::Protocol(format!(
                            "Message stream for '{}' failed: {}",
                            queue, e
                        )));
                    }
                    None => {
                        return Err(SubscriberError::Protocol(format!(
                            "Message stream for '{}' closed",
                            queue
                        )));
                    }
                }
            }
        }
    }

    fn to_delivery(
        &self,
        message: &jetstream::Message,
        delivery_tag: u64,
        redelivered: bool,
    ) -> Delivery {
        let correlation_id = message
            .headers
            .as_ref()
            .and_then(|headers| headers.get(self.config.correlation_header.as_str()))
            .map(|value| value.as_str().to_string())
            .unwrap_or_default();

        Delivery {
            body: message.payload.clone(),
            delivery_tag,
            correlation_id,
            redelivered,
        }
    }
}

impl BrokerClient for NatsBrokerClient {
    fn run(&self, queue: &str, handler: &mut dyn DeliveryHandler) -> Result<()> {
        self.consuming.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        let (sender, mut receiver) = mpsc::unbounded_channel();
        *self.lock_commands() = Some(sender);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SubscriberError::Protocol(format!("Failed to start event loop: {}", e)))?;
        let local = tokio::task::LocalSet::new();

        let result = local.block_on(&runtime, self.consume_loop(queue, handler, &mut receiver));

        // Actions handed out during this run now report the loop as gone
        self.lock_commands().take();
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(false);
        result
    }

    fn stop(&self) {
        // Stopping an idle client must not end the next run
        if self.running.load(Ordering::SeqCst) {
            self.shutdown.send_replace(true);
        }
        self.lock_commands().take();
        tracing::debug!(url = %self.config.url, "NATS broker client stopped");
    }

    fn threadsafe_ack(&self, delivery_tag: u64) -> ThreadsafeAction {
        self.command_action(AckCommand::Ack(delivery_tag))
    }

    fn threadsafe_nack(&self, delivery_tag: u64, requeue: bool) -> ThreadsafeAction {
        self.command_action(AckCommand::Nack {
            delivery_tag,
            requeue,
        })
    }

    fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        send_command(
            self.lock_commands().as_ref(),
            AckCommand::Nack {
                delivery_tag,
                requeue,
            },
        )
    }

    fn was_consuming(&self) -> bool {
        self.consuming.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "nats"
    }
}

fn send_command(sender: Option<&CommandSender>, command: AckCommand) -> Result<()> {
    let not_running = || SubscriberError::Ack {
        delivery_tag: command.delivery_tag(),
        reason: "broker loop is not running".to_string(),
    };
    sender
        .ok_or_else(not_running)?
        .send(command)
        .map_err(|_| not_running())
}

async fn apply_command(command: AckCommand, in_flight: &mut InFlight<jetstream::Message>) {
    let delivery_tag = command.delivery_tag();
    let Some(message) = in_flight.remove(delivery_tag) else {
        tracing::warn!(delivery_tag, "Ignoring acknowledgement for unknown delivery");
        return;
    };

    if let Err(e) = message.ack_with(command.ack_kind()).await {
        tracing::warn!(delivery_tag, error = %e, "Failed to acknowledge message");
    }
}

/// Resolves on Ctrl-C when enabled, otherwise never
///
/// Registering the listener replaces the default SIGINT behavior for the
/// whole process, so it is opt-in.
async fn interrupt_signal(enabled: bool) {
    if enabled {
        match tokio::signal::ctrl_c().await {
            Ok(()) => return,
            Err(e) => tracing::warn!(error = %e, "Failed to listen for interrupts"),
        }
    }
    futures::future::pending::<()>().await
}

/// Connect to NATS, mapping connect failures onto the subscriber's taxonomy
async fn connect(config: &NatsBrokerConfig) -> Result<async_nats::Client> {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    let client = opts.connect(&config.url).await.map_err(|e| {
        let reason = format!("{}: {}", config.url, e);
        match e.kind() {
            ConnectErrorKind::Authentication | ConnectErrorKind::AuthorizationViolation => {
                SubscriberError::Authentication(reason)
            }
            ConnectErrorKind::MaxReconnects => SubscriberError::UnrecoverableConnection(reason),
            _ => SubscriberError::Protocol(reason),
        }
    })?;

    tracing::info!(url = %config.url, "Connected to NATS");
    Ok(client)
}
