//! Local store interface (§6, consumed). The core never owns persistence;
//! it reads and writes entities transactionally through this trait.
//!
//! Grounded on `async-trait`'s object-safe-trait pattern, as used across the
//! corpus for service-boundary traits; the method set is the literal list
//! from §6.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncError;
use crate::model::{Calendar, CalendarId, Event, EventId, PendingOp, PendingOpStatus};

#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn load_calendar(&self, id: &CalendarId) -> Result<Calendar, SyncError>;

    async fn save_calendar_tokens(
        &self,
        id: &CalendarId,
        ctag: Option<String>,
        sync_token: Option<String>,
        last_sync: DateTime<Utc>,
    ) -> Result<(), SyncError>;

    async fn get_event_by_url(&self, calendar_id: &CalendarId, url: &str) -> Result<Option<Event>, SyncError>;

    async fn get_event_by_uid(
        &self,
        calendar_id: &CalendarId,
        uid: &str,
        recurrence_id: Option<DateTime<Utc>>,
    ) -> Result<Option<Event>, SyncError>;

    async fn upsert_event(&self, event: Event) -> Result<EventId, SyncError>;

    async fn delete_event(&self, id: &EventId) -> Result<(), SyncError>;

    async fn list_events_in_range(
        &self,
        calendar_id: &CalendarId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, SyncError>;

    async fn dequeue_pending(&self, account_id: &str, limit: usize) -> Result<Vec<PendingOp>, SyncError>;

    /// Persists an op's outcome. `attempt_count` is passed through rather
    /// than incremented store-side because the push pipeline already holds
    /// the authoritative count (it just ran the attempt); §6 lists this
    /// method as `mark_pending(op_id, status, error_kind?)`, extended here
    /// with the count because nothing else in the interface can carry it
    /// back to the next `dequeue_pending` (§4.G's 5-attempt cap is
    /// unenforceable otherwise).
    async fn mark_pending(
        &self,
        op_id: &str,
        status: PendingOpStatus,
        attempt_count: u32,
        error_kind: Option<String>,
    ) -> Result<(), SyncError>;
}

/// An in-memory reference implementation for local development and testing
/// (§6.1), grounded on `fred-cal`'s `CacheManager` precedent for a store
/// backed by a `parking_lot::Mutex`-guarded map rather than a real database.
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct State {
        calendars: HashMap<CalendarId, Calendar>,
        events: HashMap<EventId, Event>,
        pending: HashMap<String, PendingOp>,
        next_id: u64,
    }

    /// A process-local store, entirely in memory, useful for integration
    /// tests that exercise the reconciler without a real database.
    pub struct InMemoryStore {
        state: Mutex<State>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            InMemoryStore { state: Mutex::new(State::default()) }
        }

        pub fn seed_calendar(&self, calendar: Calendar) {
            self.state.lock().calendars.insert(calendar.id.clone(), calendar);
        }

        pub fn seed_pending(&self, op: PendingOp) {
            self.state.lock().pending.insert(op.id.clone(), op);
        }

        pub fn all_events(&self) -> Vec<Event> {
            self.state.lock().events.values().cloned().collect()
        }
    }

    impl Default for InMemoryStore {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl LocalStore for InMemoryStore {
        async fn load_calendar(&self, id: &CalendarId) -> Result<Calendar, SyncError> {
            self.state
                .lock()
                .calendars
                .get(id)
                .cloned()
                .ok_or_else(|| SyncError::Internal(format!("unknown calendar {id}")))
        }

        async fn save_calendar_tokens(
            &self,
            id: &CalendarId,
            ctag: Option<String>,
            sync_token: Option<String>,
            last_sync: DateTime<Utc>,
        ) -> Result<(), SyncError> {
            let mut guard = self.state.lock();
            let calendar = guard
                .calendars
                .get_mut(id)
                .ok_or_else(|| SyncError::Internal(format!("unknown calendar {id}")))?;
            calendar.ctag = ctag;
            calendar.sync_token = sync_token;
            calendar.last_sync = Some(last_sync);
            Ok(())
        }

        async fn get_event_by_url(&self, calendar_id: &CalendarId, url: &str) -> Result<Option<Event>, SyncError> {
            Ok(self
                .state
                .lock()
                .events
                .values()
                .find(|e| &e.calendar_id == calendar_id && e.caldav_url.as_deref() == Some(url))
                .cloned())
        }

        async fn get_event_by_uid(
            &self,
            calendar_id: &CalendarId,
            uid: &str,
            recurrence_id: Option<DateTime<Utc>>,
        ) -> Result<Option<Event>, SyncError> {
            Ok(self
                .state
                .lock()
                .events
                .values()
                .find(|e| {
                    &e.calendar_id == calendar_id
                        && e.uid == uid
                        && e.recurrence_id.map(|r| r.timestamp_millis())
                            == recurrence_id.map(|r| r.timestamp_millis())
                })
                .cloned())
        }

        async fn upsert_event(&self, event: Event) -> Result<EventId, SyncError> {
            let mut guard = self.state.lock();
            let id = if event.id.is_empty() {
                guard.next_id += 1;
                format!("evt-{}", guard.next_id)
            } else {
                event.id.clone()
            };
            let mut event = event;
            event.id = id.clone();
            guard.events.insert(id.clone(), event);
            Ok(id)
        }

        async fn delete_event(&self, id: &EventId) -> Result<(), SyncError> {
            self.state.lock().events.remove(id);
            Ok(())
        }

        async fn list_events_in_range(
            &self,
            calendar_id: &CalendarId,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Event>, SyncError> {
            Ok(self
                .state
                .lock()
                .events
                .values()
                .filter(|e| &e.calendar_id == calendar_id && e.start >= start && e.start <= end)
                .cloned()
                .collect())
        }

        async fn dequeue_pending(&self, _account_id: &str, limit: usize) -> Result<Vec<PendingOp>, SyncError> {
            let mut ops: Vec<PendingOp> = self
                .state
                .lock()
                .pending
                .values()
                .filter(|op| op.status == PendingOpStatus::Pending)
                .cloned()
                .collect();
            ops.sort_by(|a, b| a.id.cmp(&b.id));
            ops.truncate(limit);
            Ok(ops)
        }

        async fn mark_pending(
            &self,
            op_id: &str,
            status: PendingOpStatus,
            attempt_count: u32,
            error_kind: Option<String>,
        ) -> Result<(), SyncError> {
            if let Some(op) = self.state.lock().pending.get_mut(op_id) {
                op.status = status;
                op.attempt_count = attempt_count;
                op.last_error_kind = error_kind;
            }
            Ok(())
        }
    }
}
