use tokio::sync::{broadcast, watch};

/// Capacity of the state-change event channel per orchestrator.
pub const EVENT_CAPACITY: usize = 64;

/// Holds the latest device snapshot and fans state-change events out to subscribers.
///
/// The orchestrator task is the only writer. Readers get copies.
#[derive(Clone, Debug)]
pub struct StatePublisher<S> {
    snapshot: watch::Sender<S>,
    events: broadcast::Sender<S>,
}

impl<S: Clone + Send + Sync + 'static> StatePublisher<S> {
    pub fn new(initial: S) -> Self {
        let (snapshot, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { snapshot, events }
    }

    /// Store `state` as the current snapshot and emit a state-change event.
    pub fn publish(&self, state: S) {
        self.snapshot.send_replace(state.clone());
        // No subscribers is not an error.
        let _ = self.events.send(state);
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> S {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to state-change events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<S> {
        self.events.subscribe()
    }
}
