//! Broadcast event bus for distributing `EngineEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers. Publishing wraps each event in an
//! `EventEnvelope` carrying the event-type string, correlation ID, and
//! timestamp. Publishing with no active subscribers is a no-op, and a slow
//! subscriber lags (oldest events dropped) rather than blocking publishers.

use stagecraft_types::event::{EngineEvent, EventEnvelope};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Multi-consumer event bus for orchestration events.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning the bus clones the
/// sender, allowing multiple producers and consumers.
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    ///
    /// A capacity of 1024 is recommended for typical workloads.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future envelopes.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// The envelope (event type, correlation ID, timestamp) is derived here.
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(EventEnvelope::wrap(event));
    }

    /// Spawn a task that drains envelopes into a handler.
    ///
    /// `event_type` filters to an exact type (e.g. "job.failed"); `None`
    /// delivers everything. A handler error is logged and does not stop
    /// delivery to this or any other subscriber. The task ends when the bus
    /// is dropped.
    pub fn spawn_handler<F>(&self, event_type: Option<String>, handler: F) -> JoinHandle<()>
    where
        F: Fn(EventEnvelope) -> Result<(), anyhow::Error> + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if let Some(filter) = &event_type {
                            if &envelope.event_type != filter {
                                continue;
                            }
                        }
                        let event_type = envelope.event_type.clone();
                        if let Err(e) = handler(envelope) {
                            tracing::warn!(
                                event_type = event_type.as_str(),
                                error = %e,
                                "event handler failed"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Access the underlying broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<EventEnvelope> {
        &self.sender
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
