//! Occurrence engine interface (§6, consumed): given a master event plus its
//! exceptions, materialize occurrences within a time window. Purely
//! functional — no I/O, no state.
//!
//! Grounded on `fred-cal`'s `expand_recurring_event(event, config) ->
//! Vec<CalendarEvent>` shape (`recurrence.rs`), generalized to the trait
//! boundary this core needs instead of a concrete RRULE implementation,
//! which the core does not own (§1: "the occurrence-expansion engine for
//! recurring events" is out of scope, consumed as an interface).

use chrono::{DateTime, Utc};

use crate::model::Event;

#[derive(Debug, Clone, Copy)]
pub struct OccurrenceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub trait OccurrenceEngine: Send + Sync {
    /// Expand `master` (with its known `exceptions`, sharing its UID) into
    /// concrete occurrences within `window`. Non-recurring masters return a
    /// single occurrence if within the window, none otherwise.
    fn expand(&self, master: &Event, exceptions: &[Event], window: OccurrenceWindow) -> Vec<Event>;
}

/// A minimal reference implementation for tests (§6.1): treats every event
/// as a single occurrence within the window, ignoring RRULE entirely. Real
/// recurrence expansion is the host application's responsibility.
pub struct SingleOccurrenceEngine;

impl OccurrenceEngine for SingleOccurrenceEngine {
    fn expand(&self, master: &Event, exceptions: &[Event], window: OccurrenceWindow) -> Vec<Event> {
        let mut out = Vec::new();
        if master.start <= window.end && master.end >= window.start {
            out.push(master.clone());
        }
        for exception in exceptions {
            if exception.start <= window.end && exception.end >= window.start {
                out.push(exception.clone());
            }
        }
        out
    }
}
