//! Per-delivery event context and its lifecycle actions
//!
//! Two kinds of action are handed out with every delivery:
//!
//! - [`ThreadsafeAction`] — `Send + Sync`, may be moved to and invoked from
//!   any thread. The broker client marshals the call onto its event loop.
//! - [`RedeliveryAction`] — `!Send`. The [`Redelivery`] future it returns
//!   must be driven on the execution context running the broker loop,
//!   typically with `tokio::task::spawn_local` from inside the handler.

use crate::error::Result;
use futures::future::{FutureExt, LocalBoxFuture};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Acknowledgement action that is safe to invoke from any thread
#[derive(Clone)]
pub struct ThreadsafeAction {
    delivery_tag: u64,
    action: Arc<dyn Fn() -> Result<()> + Send + Sync>,
}

impl ThreadsafeAction {
    /// Wrap a broker callback bound to `delivery_tag`
    pub fn new(
        delivery_tag: u64,
        action: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            delivery_tag,
            action: Arc::new(action),
        }
    }

    /// Delivery this action is bound to
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Run the action
    ///
    /// Repeated invocation is forwarded to the broker client as-is.
    pub fn invoke(&self) -> Result<()> {
        (self.action)()
    }
}

impl fmt::Debug for ThreadsafeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadsafeAction")
            .field("delivery_tag", &self.delivery_tag)
            .finish_non_exhaustive()
    }
}

/// Suspending redelivery operation, bound to the broker loop's thread
pub type Redelivery = LocalBoxFuture<'static, Result<()>>;

/// Request that the broker deliver a message again after a delay
///
/// Not threadsafe: holds an `Rc`, so neither the action nor its future can
/// leave the thread that created them.
#[derive(Clone)]
pub struct RedeliveryAction {
    delivery_tag: u64,
    delay: Duration,
    nack: Rc<dyn Fn() -> Result<()>>,
}

impl RedeliveryAction {
    /// Bind a requeueing reject to `delivery_tag`, delayed by `delay`
    pub fn new(
        delivery_tag: u64,
        delay: Duration,
        nack: impl Fn() -> Result<()> + 'static,
    ) -> Self {
        Self {
            delivery_tag,
            delay,
            nack: Rc::new(nack),
        }
    }

    /// Get the delivery tag this redelivery rejects
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Get the wait before the reject is sent
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Build the redelivery future
    ///
    /// Nothing happens until the future is polled. It sleeps for the
    /// configured delay on the tokio timer, then rejects with requeue.
    pub fn invoke(&self) -> Redelivery {
        let nack = Rc::clone(&self.nack);
        let delay = self.delay;
        let delivery_tag = self.delivery_tag;

        async move {
            tokio::time::sleep(delay).await;
            tracing::debug!(delivery_tag, delay_secs = delay.as_secs(), "Requesting redelivery");
            nack()
        }
        .boxed_local()
    }
}

impl fmt::Debug for RedeliveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedeliveryAction")
            .field("delivery_tag", &self.delivery_tag)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// An event with related properties and lifecycle actions
///
/// Built once per delivery and handed to the event handler. Well-behaved
/// handlers invoke exactly one of the three actions per delivery; this is
/// not enforced. To finish processing on another thread, destructure the
/// context and move only the threadsafe actions across.
pub struct EventContext<E> {
    /// The parsed event
    pub event: E,

    /// Stable identifier for this event over its lifecycle
    pub correlation_id: String,

    /// Processed successfully; the message can be removed from the queue
    pub acknowledge_success: ThreadsafeAction,

    /// Processing failed; the message is removed without requeue
    pub acknowledge_failure: ThreadsafeAction,

    /// Reject now and ask the broker to deliver the message again later
    pub request_redelivery: RedeliveryAction,
}

impl<E> EventContext<E> {
    /// Delivery tag shared by all three actions
    pub fn delivery_tag(&self) -> u64 {
        self.acknowledge_success.delivery_tag()
    }
}

impl<E: fmt::Debug> fmt::Debug for EventContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.event)
            .field("correlation_id", &self.correlation_id)
            .field("delivery_tag", &self.delivery_tag())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_threadsafe_action_from_other_thread() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let action = ThreadsafeAction::new(11, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let handle = std::thread::spawn(move || action.invoke());
        handle.join().unwrap().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_threadsafe_action_clone_shares_binding() {
        let action = ThreadsafeAction::new(5, || Ok(()));
        let cloned = action.clone();
        assert_eq!(cloned.delivery_tag(), 5);
        assert!(format!("{:?}", cloned).contains("delivery_tag: 5"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_waits_before_nack() {
        let fired_at = Rc::new(RefCell::new(None));
        let record = Rc::clone(&fired_at);
        let action = RedeliveryAction::new(9, Duration::from_secs(3), move || {
            *record.borrow_mut() = Some(tokio::time::Instant::now());
            Ok(())
        });

        let start = tokio::time::Instant::now();
        let redelivery = action.invoke();
        assert!(fired_at.borrow().is_none());

        redelivery.await.unwrap();

        let elapsed = fired_at.borrow().unwrap() - start;
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_on_local_set() {
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        let action = RedeliveryAction::new(2, Duration::from_secs(3), move || {
            *counter.borrow_mut() += 1;
            Ok(())
        });

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                tokio::task::spawn_local(action.invoke())
                    .await
                    .unwrap()
                    .unwrap();
            })
            .await;

        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_context_delivery_tag() {
        let ctx = EventContext {
            event: "payload",
            correlation_id: "corr-1".to_string(),
            acknowledge_success: ThreadsafeAction::new(4, || Ok(())),
            acknowledge_failure: ThreadsafeAction::new(4, || Ok(())),
            request_redelivery: RedeliveryAction::new(4, Duration::from_secs(3), || Ok(())),
        };

        assert_eq!(ctx.delivery_tag(), 4);
        let debug = format!("{:?}", ctx);
        assert!(debug.contains("corr-1"));
        assert!(debug.contains("payload"));
    }
}
