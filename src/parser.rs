//! Event parsing — raw message bodies to typed events

use crate::error::Result;
use crate::types::Event;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// Converts raw message bytes into a typed event
///
/// Failures are returned as-is and propagate out of the dispatch path.
pub trait EventParser: Send + Sync {
    /// Event type produced by this parser
    type Event;

    /// Parse a message body
    fn parse(&self, body: &[u8]) -> Result<Self::Event>;
}

/// JSON parser for any deserializable event type
pub struct JsonEventParser<E = Event> {
    _event: PhantomData<fn() -> E>,
}

impl<E> JsonEventParser<E> {
    pub fn new() -> Self {
        Self {
            _event: PhantomData,
        }
    }
}

impl<E> Default for JsonEventParser<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DeserializeOwned> EventParser for JsonEventParser<E> {
    type Event = E;

    fn parse(&self, body: &[u8]) -> Result<E> {
        Ok(serde_json::from_slice(body)?)
    }
}
