//! Recording event publisher

use parking_lot::Mutex;
use std::sync::Arc;
use vigil_core::{AuthorizationEvent, AuthorizationEventPublisher, InterceptorKind};

/// Keeps every published event for later assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingEventPublisher {
    events: Arc<Mutex<Vec<AuthorizationEvent>>>,
}

impl RecordingEventPublisher {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events, in publication order.
    pub fn events(&self) -> Vec<AuthorizationEvent> {
        self.events.lock().clone()
    }

    /// Recorded denials.
    pub fn denials(&self) -> Vec<AuthorizationEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.is_denied())
            .cloned()
            .collect()
    }

    /// Number of events recorded at `stage`.
    pub fn count_at(&self, stage: InterceptorKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.stage == stage)
            .count()
    }

    /// Forget every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuthorizationEventPublisher for RecordingEventPublisher {
    fn publish(&self, event: &AuthorizationEvent) {
        self.events.lock().push(event.clone());
    }
}
