//! Observability subsystem
//!
//! Staged operations and RDB callback handlers never log directly. They emit
//! typed [`StageEvent`]s into an injected [`Observer`], so the core has no
//! hidden I/O and tests can assert on exactly what was reported.
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. Observer failure never changes an outcome
//! 3. No async or background threads
//! 4. Deterministic output

mod events;
mod logger;
mod metrics;

pub use events::StageEvent;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, StagingMetrics};

use std::sync::{Arc, Mutex};

/// Sink for structured events.
///
/// Implementations must be cheap and must not panic; they may be called from
/// whichever thread delivers an RDB phase.
pub trait Observer: Send + Sync {
    /// Record one event.
    fn emit(&self, event: &StageEvent);
}

/// Writes each event as one JSON log line.
#[derive(Debug, Clone)]
pub struct LogObserver {
    min_severity: Severity,
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new(Severity::Info)
    }
}

impl LogObserver {
    /// Log events at or above `min_severity`.
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }
}

impl Observer for LogObserver {
    fn emit(&self, event: &StageEvent) {
        let severity = event.severity();
        if severity < self.min_severity {
            return;
        }
        let fields = event.fields();
        let refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        Logger::log(severity, event.event_name(), &refs);
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemoryObserver {
    events: Mutex<Vec<StageEvent>>,
}

impl MemoryObserver {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// All events emitted so far, in order.
    pub fn events(&self) -> Vec<StageEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Names of all events emitted so far, in order.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|e| e.iter().map(StageEvent::event_name).collect())
            .unwrap_or_default()
    }

    /// Whether an event with this name was emitted.
    pub fn contains(&self, event_name: &str) -> bool {
        self.event_names().iter().any(|n| *n == event_name)
    }

    /// Drop all collected events.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Observer for MemoryObserver {
    fn emit(&self, event: &StageEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Forwards every event to each member in registration order.
#[derive(Default, Clone)]
pub struct ObserverSet {
    members: Vec<Arc<dyn Observer>>,
}

impl ObserverSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member.
    pub fn with(mut self, observer: Arc<dyn Observer>) -> Self {
        self.members.push(observer);
        self
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Observer for ObserverSet {
    fn emit(&self, event: &StageEvent) {
        for member in &self.members {
            member.emit(event);
        }
    }
}
