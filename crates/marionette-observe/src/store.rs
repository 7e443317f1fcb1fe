//! Recording and querying hand-off events.
//!
//! All writes go through the [`EventSink`] trait, which components receive
//! explicitly at construction. [`EventLog`] keeps a bounded in-memory
//! history, assigns monotonically increasing sequence numbers, and
//! broadcasts each new event to live subscribers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::ObserveError;
use crate::event::{EventDomain, EventPayload, ObservedEvent};

/// Default number of events an [`EventLog`] retains.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 10_000;

/// Capacity of the live broadcast channel.
const BROADCAST_CAPACITY: usize = 256;

/// Destination for observability events.
pub trait EventSink: Send + Sync {
    /// Records one event for the given room.
    ///
    /// # Errors
    ///
    /// Returns `ObserveError` if the event could not be recorded.
    fn emit_event(
        &self,
        entity_id: &str,
        payload: &EventPayload,
    ) -> Result<ObservedEvent, ObserveError>;
}

/// Emits an event and logs a warning on failure.
///
/// Observability must never fail the caller, so errors stop here.
pub fn emit_or_warn(sink: &dyn EventSink, entity_id: &str, payload: &EventPayload) {
    if let Err(e) = sink.emit_event(entity_id, payload) {
        tracing::warn!(
            domain = payload.domain().as_str(),
            event_type = payload.event_type(),
            entity_id,
            "failed to emit observe event: {}",
            e
        );
    }
}

/// Bounded, append-only in-memory event log.
#[derive(Debug)]
pub struct EventLog {
    events: Mutex<VecDeque<ObservedEvent>>,
    capacity: usize,
    next_seq: AtomicU64,
    tx: broadcast::Sender<ObservedEvent>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a log that retains at most `capacity` events, dropping the
    /// oldest first.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            events: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(1),
            tx,
        }
    }

    /// Subscribes to events recorded after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ObservedEvent> {
        self.tx.subscribe()
    }

    /// Returns the sequence number the next event will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.load(Ordering::SeqCst)
    }

    /// Number of events currently retained.
    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queries the log with optional filters.
    ///
    /// Results are in sequence order (oldest first), bounded by
    /// `filter.limit` (default 100).
    ///
    /// # Errors
    ///
    /// Returns `ObserveError::LockPoisoned` if a writer panicked.
    pub fn query_events(&self, filter: &EventFilter) -> Result<Vec<ObservedEvent>, ObserveError> {
        let events = self.events.lock().map_err(|_| ObserveError::LockPoisoned)?;
        let limit = filter.limit.unwrap_or(100);

        Ok(events
            .iter()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl EventSink for EventLog {
    fn emit_event(
        &self,
        entity_id: &str,
        payload: &EventPayload,
    ) -> Result<ObservedEvent, ObserveError> {
        let mut events = self.events.lock().map_err(|_| ObserveError::LockPoisoned)?;

        // Assigned under the lock so seq order matches insertion order.
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = ObservedEvent {
            seq,
            domain: payload.domain(),
            event_type: payload.event_type().to_string(),
            entity_id: entity_id.to_string(),
            payload: payload.clone(),
            occurred_at: Utc::now(),
        };

        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
        drop(events);

        // No receivers is the common case.
        let _ = self.tx.send(event.clone());
        Ok(event)
    }
}

/// Filter criteria for querying the event log.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event domain.
    pub domain: Option<EventDomain>,
    /// Filter by event type string.
    pub event_type: Option<String>,
    /// Filter by room name.
    pub entity_id: Option<String>,
    /// Return events that occurred at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Maximum number of events to return (default: 100).
    pub limit: Option<usize>,
}

impl EventFilter {
    fn matches(&self, event: &ObservedEvent) -> bool {
        if self.domain.is_some_and(|d| d != event.domain) {
            return false;
        }
        if let Some(ref et) = self.event_type {
            if *et != event.event_type {
                return false;
            }
        }
        if let Some(ref id) = self.entity_id {
            if *id != event.entity_id {
                return false;
            }
        }
        if self.since.is_some_and(|since| event.occurred_at < since) {
            return false;
        }
        true
    }
}
