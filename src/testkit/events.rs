//! Event bus that keeps everything it is given.

use parking_lot::Mutex;

use crate::port::{DomainEvent, EventBus, EventHandler, EventKind};

#[derive(Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<DomainEvent>>,
    handlers: Mutex<Vec<(EventKind, EventHandler)>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<DomainEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

impl EventBus for RecordingEventBus {
    fn emit(&self, event: DomainEvent) {
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .iter()
            .filter(|(kind, _)| *kind == event.kind)
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(&event);
        }
        self.events.lock().push(event);
    }

    fn on(&self, kind: EventKind, handler: EventHandler) {
        self.handlers.lock().push((kind, handler));
    }
}
