//! In-memory broker client for testing and single-process use
//!
//! Deliveries are queued with [`MemoryBrokerClient::publish`] and drained by
//! `run`, which drives a current-thread tokio runtime with a `LocalSet` the
//! same way a network client drives its event loop. Acks, nacks and stop
//! calls are recorded for inspection.

use super::{BrokerClient, DeliveryHandler};
use crate::context::ThreadsafeAction;
use crate::error::{Result, SubscriberError};
use crate::types::Delivery;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    pending: VecDeque<Delivery>,
    next_tag: u64,
    failure: Option<SubscriberError>,
    was_consuming: bool,
    stopped: bool,
    acks: Vec<u64>,
    nacks: Vec<(u64, bool)>,
    stop_calls: usize,
    queues: Vec<String>,
}

/// In-memory broker client
#[derive(Clone, Default)]
pub struct MemoryBrokerClient {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        lock_state(&self.state)
    }

    /// Queue a message, returning its delivery tag
    pub fn publish(&self, body: impl Into<Bytes>, correlation_id: impl Into<String>) -> u64 {
        let mut state = self.lock();
        state.next_tag += 1;
        let delivery = Delivery::new(body, state.next_tag, correlation_id);
        let delivery_tag = delivery.delivery_tag;
        state.pending.push_back(delivery);
        delivery_tag
    }

    /// Make the next `run` return `err` once pending deliveries are drained
    pub fn fail_next_run(&self, err: SubscriberError) {
        self.lock().failure = Some(err);
    }

    /// Set what `was_consuming` reports
    pub fn set_was_consuming(&self, consuming: bool) {
        self.lock().was_consuming = consuming;
    }

    /// Delivery tags acknowledged so far, in order
    pub fn acks(&self) -> Vec<u64> {
        self.lock().acks.clone()
    }

    /// Rejections so far as `(delivery_tag, requeue)`, in order
    pub fn nacks(&self) -> Vec<(u64, bool)> {
        self.lock().nacks.clone()
    }

    /// Number of `stop` calls
    pub fn stop_count(&self) -> usize {
        self.lock().stop_calls
    }

    /// Deliveries not yet dispatched
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Queues `run` has been invoked with
    pub fn queues(&self) -> Vec<String> {
        self.lock().queues.clone()
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    // A panicking handler must not hide the recorded acks from the test
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BrokerClient for MemoryBrokerClient {
    fn run(&self, queue: &str, handler: &mut dyn DeliveryHandler) -> Result<()> {
        {
            let mut state = self.lock();
            state.stopped = false;
            state.queues.push(queue.to_string());
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| SubscriberError::Protocol(format!("Failed to start event loop: {}", e)))?;
        let local = tokio::task::LocalSet::new();

        let dispatched = local.block_on(&runtime, async {
            loop {
                let next = {
                    let mut state = self.lock();
                    if state.stopped {
                        None
                    } else {
                        state.pending.pop_front()
                    }
                };
                let Some(delivery) = next else {
                    break;
                };

                tracing::debug!(
                    queue,
                    delivery_tag = delivery.delivery_tag,
                    "Memory delivery"
                );
                handler.on_delivery(delivery)?;

                // Give redeliveries spawned by the handler a chance to start
                tokio::task::yield_now().await;
            }
            Ok::<(), SubscriberError>(())
        });

        // Scheduled redeliveries finish on this loop before it closes
        runtime.block_on(local);
        dispatched?;

        match self.lock().failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        state.stop_calls += 1;
    }

    fn threadsafe_ack(&self, delivery_tag: u64) -> ThreadsafeAction {
        let state = Arc::clone(&self.state);
        ThreadsafeAction::new(delivery_tag, move || {
            lock_state(&state).acks.push(delivery_tag);
            Ok(())
        })
    }

    fn threadsafe_nack(&self, delivery_tag: u64, requeue: bool) -> ThreadsafeAction {
        let state = Arc::clone(&self.state);
        ThreadsafeAction::new(delivery_tag, move || {
            lock_state(&state).nacks.push((delivery_tag, requeue));
            Ok(())
        })
    }

    fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.lock().nacks.push((delivery_tag, requeue));
        Ok(())
    }

    fn was_consuming(&self) -> bool {
        self.lock().was_consuming
    }

    fn name(&self) -> &str {
        "memory"
    }
}
