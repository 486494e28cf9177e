//! Broadcast event bus for orchestrator events.
//!
//! Emission never blocks and never fails: with no subscribers the event is
//! simply dropped. Slow subscribers that fall behind the channel capacity
//! lose the oldest events and are told how many they missed.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::types::OrchestratorEvent;

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Handler invoked for named events registered through [`EventBus::on`].
pub type EventHandler = Arc<dyn Fn(&OrchestratorEvent) + Send + Sync>;

/// Cloneable handle to the event channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber.
    pub fn emit(&self, event: OrchestratorEvent) {
        log::debug!("[EventBus] emit {}", event.name());
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Run `handler` for each future event named `name`.
    ///
    /// The listener lives on its own task until the bus is dropped or the
    /// returned handle is aborted. Must be called inside a tokio runtime.
    pub fn on(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&OrchestratorEvent) + Send + Sync + 'static,
    ) -> JoinHandle<()> {
        let name = name.into();
        let handler: EventHandler = Arc::new(handler);
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.name() == name {
                            handler(&event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("[EventBus] listener '{}' lagged, skipped {}", name, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::events::types::cycle_complete_event;

    fn completed(cycle: &str, processed: usize) -> OrchestratorEvent {
        OrchestratorEvent::CycleCompleted {
            cycle: cycle.to_string(),
            processed,
            failed: 0,
            entity_ids: Vec::new(),
            finished_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(completed("micro_evolution", 1).name(), "micro_evolution_complete");
        assert_eq!(cycle_complete_event("major_evolution"), "major_evolution_complete");
        assert_eq!(OrchestratorEvent::Stopped.name(), "orchestrator_stopped");
        assert_eq!(
            OrchestratorEvent::FlushCompleted { written: 1 }.name(),
            "flush_complete"
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.emit(OrchestratorEvent::Stopped);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.emit(completed("micro_evolution", 3));
        match rx.recv().await.unwrap() {
            OrchestratorEvent::CycleCompleted { processed, .. } => assert_eq!(processed, 3),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_on_filters_by_name() {
        let bus = EventBus::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let listener = bus.on("major_evolution_complete", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        // Give the listener task a chance to start polling.
        tokio::task::yield_now().await;

        bus.emit(completed("micro_evolution", 1));
        bus.emit(completed("major_evolution", 1));
        bus.emit(completed("major_evolution", 2));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        listener.abort();
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(OrchestratorEvent::FlushCompleted { written: 4 }).unwrap();
        assert_eq!(json["type"], "flush_completed");
        assert_eq!(json["written"], 4);
    }
}
