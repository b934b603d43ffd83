//! Delivery of server-pushed events.
//!
//! Events arrive on stream -1 once the client has REGISTERed for them. The
//! connection task hands each one to the configured [`EventListener`]
//! synchronously, so a callback must not block.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::Event;

/// Where pushed events go.
#[derive(Clone)]
pub enum EventListener {
    /// Called on the connection task for every event.
    Callback(Arc<dyn Fn(Event) + Send + Sync>),
    /// Events are sent to this channel; a closed receiver drops them.
    Channel(mpsc::UnboundedSender<Event>),
}

impl EventListener {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        EventListener::Callback(Arc::new(f))
    }

    /// Listener backed by a fresh channel, with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventListener::Channel(tx), rx)
    }

    pub(crate) fn dispatch(&self, event: Event) {
        match self {
            EventListener::Callback(f) => f(event),
            EventListener::Channel(tx) => {
                if let Err(e) = tx.send(event) {
                    tracing::warn!("Event receiver dropped, discarding {:?}", e.0);
                }
            }
        }
    }
}

impl fmt::Debug for EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventListener::Callback(_) => f.write_str("EventListener::Callback"),
            EventListener::Channel(_) => f.write_str("EventListener::Channel"),
        }
    }
}
