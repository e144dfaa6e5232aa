//! Caller-supplied event handlers

use crate::context::EventContext;
use crate::error::Result;

/// Processes delivered events
///
/// Invoked synchronously on the thread driving the broker loop. Long-running
/// work should be offloaded; only the threadsafe actions of the context may
/// be used from another thread.
pub trait EventHandler<E> {
    /// Handle one delivered event
    fn on_message(&mut self, context: EventContext<E>) -> Result<()>;
}

impl<E, F> EventHandler<E> for F
where
    F: FnMut(EventContext<E>) -> Result<()>,
{
    fn on_message(&mut self, context: EventContext<E>) -> Result<()> {
        self(context)
    }
}
