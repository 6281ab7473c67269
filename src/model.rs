//! Data model (§3): the entities the core reads and writes through the
//! local-store interface. The core never owns persistence; these structs are
//! the in-memory/transit shape passed across [`crate::interfaces::store`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifiers minted by the local store. The core treats them as
/// plain equality-comparable handles, never parses them.
pub type AccountId = String;
pub type CalendarId = String;
pub type EventId = String;
pub type OpId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderFamily {
    ICloud,
    Nextcloud,
    Baikal,
    Sogo,
    Radicale,
    Zoho,
    OpenXchange,
    Stalwart,
    MailboxOrg,
    Generic,
}

/// One (server, identity) pair. [I] (provider_family, identity_label) is
/// unique across accounts; never mutated except URL rotation after a
/// server migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub provider_family: ProviderFamily,
    pub base_url: String,
    pub principal_url: String,
    pub calendar_home_url: String,
    pub identity_label: String,
}

/// A remote calendar collection bound to an account. [I] (account_id,
/// caldav_url) is unique. [I] read_only => no push op targets this calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: CalendarId,
    pub account_id: AccountId,
    pub caldav_url: String,
    pub display_name: String,
    pub color: Option<String>,
    pub read_only: bool,
    pub visible: bool,
    pub ctag: Option<String>,
    pub sync_token: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
}

impl Calendar {
    /// Default pull window per §4.F/§9: 365 days back through a far-future
    /// sentinel, unless a force-full-sync widens it to the epoch.
    pub fn past_window_days(&self) -> i64 {
        365
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Synced,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
    SyncError,
}

/// One iCalendar VEVENT, master or exception. [I] sync_status !=
/// PendingCreate => caldav_url.is_some(). [I] all exceptions share the
/// master's uid and calendar_id; at most one master per (calendar_id, uid).
/// [I] all-day events have start/end on exact UTC-midnight boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub calendar_id: CalendarId,
    pub uid: String,
    pub recurrence_id: Option<DateTime<Utc>>,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub timezone: Option<String>,
    pub rrule: Option<String>,
    pub exdate: Vec<DateTime<Utc>>,
    pub dtstamp: Option<DateTime<Utc>>,
    pub sequence: u32,
    pub raw_ics: Vec<u8>,
    pub reminders: Vec<Reminder>,
    pub priority: Option<u8>,
    pub geo: Option<(f64, f64)>,
    pub url: Option<String>,
    pub categories: Vec<String>,
    pub event_color: Option<String>,
    pub caldav_url: Option<String>,
    pub etag: Option<String>,
    pub sync_status: SyncStatus,
}

impl Event {
    /// Day code (YYYYMMDD) computed once, per §9 — never recomputed inside
    /// tight loops further down the pipeline.
    pub fn start_day_code(&self) -> u32 {
        day_code(self.start)
    }
}

pub fn day_code(instant: DateTime<Utc>) -> u32 {
    let d = instant.date_naive();
    (d.format("%Y").to_string().parse::<u32>().unwrap_or(0)) * 10_000
        + (d.format("%m").to_string().parse::<u32>().unwrap_or(0)) * 100
        + d.format("%d").to_string().parse::<u32>().unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    pub minutes_before: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingOpKind {
    Create,
    Update,
    Delete,
    Move,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingOpStatus {
    Pending,
    InProgress,
    /// Pushed successfully; terminal, never re-dequeued.
    Done,
    /// Exhausted its retry budget (§4.G: "after 5 attempts it becomes
    /// SYNC_ERROR"); terminal, awaits manual intervention.
    Failed,
}

/// A queued push action. [I] at most one PENDING/IN_PROGRESS op per
/// (event_id, kind). Carries a snapshot of the event at enqueue time so the
/// push pipeline can act without a by-id store lookup the local-store
/// interface doesn't expose (it only resolves events by url or by uid).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOp {
    pub id: OpId,
    pub event_id: EventId,
    pub kind: PendingOpKind,
    pub event: Event,
    pub target_calendar_id: Option<CalendarId>,
    pub target_url: Option<String>,
    pub recorded_etag: Option<String>,
    pub attempt_count: u32,
    pub last_error_kind: Option<String>,
    pub status: PendingOpStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionResultKind {
    Success,
    PartialSuccess,
    AuthError,
    NetworkError,
    ServerError(u16),
    TokenExpired,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub added: u32,
    pub updated: u32,
    pub deleted: u32,
    pub moved: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub event_id: EventId,
    pub summary: String,
    pub kind: PendingOpKind,
}

/// Transient per-calendar per-run record (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSessionRecord {
    pub calendar_id: CalendarId,
    pub started_at: DateTime<Utc>,
    pub counts: SyncCounts,
    pub changes: Vec<ChangeDescriptor>,
    pub result: SessionResultKind,
}
