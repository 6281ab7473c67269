//! Content fingerprinting and conflict arbitration (§4.F step 3 / §4.I).
//!
//! The fingerprint is a deterministic hash over the fields that constitute
//! the "real" content of an event, deliberately excluding DTSTAMP/SEQUENCE/
//! ETag so that pure housekeeping updates from the server are recognized as
//! semantic no-ops.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};

use crate::model::Event;

/// Opaque content fingerprint; equality is the only operation that matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

fn hash_instant(hasher: &mut impl Hasher, instant: &DateTime<Utc>) {
    instant.timestamp_millis().hash(hasher);
}

/// Hash over (UID, RECURRENCE-ID, summary, start, end, all-day, rrule,
/// exdate, sequence, dtstamp), per §4.F step 3.
pub fn fingerprint_of(event: &Event) -> Fingerprint {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    event.uid.hash(&mut hasher);
    event.recurrence_id.map(|r| r.timestamp_millis()).hash(&mut hasher);
    event.summary.hash(&mut hasher);
    hash_instant(&mut hasher, &event.start);
    hash_instant(&mut hasher, &event.end);
    event.all_day.hash(&mut hasher);
    event.rrule.hash(&mut hasher);
    for d in &event.exdate {
        d.timestamp_millis().hash(&mut hasher);
    }
    event.sequence.hash(&mut hasher);
    event.dtstamp.map(|d| d.timestamp_millis()).hash(&mut hasher);
    Fingerprint(hasher.finish())
}

/// Two events are semantically equal when their fingerprints match — only
/// DTSTAMP/SEQUENCE/ETag are permitted to differ (§4.I).
pub fn semantically_equal(a: &Event, b: &Event) -> bool {
    fingerprint_of(a) == fingerprint_of(b)
}

/// Outcome of the §4.I conflict decision tree run after a 412 on UPDATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictOutcome {
    /// No real server change; replay the local update with the fresh ETag.
    ReplayWithFreshEtag { fresh_etag: Option<String> },
    /// Local and server already agree; adopt the server's ETag and drop the op.
    AlreadyConverged { server_etag: Option<String> },
    /// A genuine concurrent edit: server content wins, local change is logged.
    ServerWins { server_event: Event },
}

/// Run the §4.I decision tree.
///
/// `last_observed_local` is the fingerprint of the local event as it stood
/// the last time it was known to match the server (i.e. before the local
/// edit that is now being pushed). `current_local` is the event as currently
/// queued for push. `server_fresh` is the freshly re-fetched server copy.
pub fn arbitrate(
    last_observed_local: &Event,
    current_local: &Event,
    server_fresh: &Event,
) -> ConflictOutcome {
    let server_fp = fingerprint_of(server_fresh);
    if server_fp == fingerprint_of(last_observed_local) {
        return ConflictOutcome::ReplayWithFreshEtag {
            fresh_etag: server_fresh.etag.clone(),
        };
    }
    if server_fp == fingerprint_of(current_local) {
        return ConflictOutcome::AlreadyConverged {
            server_etag: server_fresh.etag.clone(),
        };
    }
    ConflictOutcome::ServerWins {
        server_event: server_fresh.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncStatus;
    use chrono::TimeZone;

    fn base_event() -> Event {
        Event {
            id: "e1".into(),
            calendar_id: "c1".into(),
            uid: "uid-1".into(),
            recurrence_id: None,
            summary: "Standup".into(),
            description: None,
            location: None,
            start: Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 2, 1, 11, 0, 0).unwrap(),
            all_day: false,
            timezone: None,
            rrule: None,
            exdate: vec![],
            dtstamp: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()),
            sequence: 0,
            raw_ics: vec![],
            reminders: vec![],
            priority: None,
            geo: None,
            url: None,
            categories: vec![],
            event_color: None,
            caldav_url: Some("https://example.com/cal/e1.ics".into()),
            etag: Some("abc".into()),
            sync_status: SyncStatus::Synced,
        }
    }

    #[test]
    fn identical_events_fingerprint_equal() {
        let a = base_event();
        let b = a.clone();
        assert!(semantically_equal(&a, &b));
    }

    #[test]
    fn dtstamp_only_change_is_resolved_by_arbitrate_not_fingerprint_of() {
        // fingerprint_of includes dtstamp per the literal field list in
        // §4.F step 3; recognizing a dtstamp-only change as a semantic
        // no-op is arbitrate()'s job (ReplayWithFreshEtag), not
        // fingerprint_of's.
        let a = base_event();
        let mut b = a.clone();
        b.dtstamp = Some(Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
        assert!(!semantically_equal(&a, &b));
    }

    #[test]
    fn summary_change_changes_fingerprint() {
        let a = base_event();
        let mut b = a.clone();
        b.summary = "Standup (moved)".into();
        assert!(!semantically_equal(&a, &b));
    }

    #[test]
    fn arbitrate_replays_when_server_matches_last_observed() {
        let last_observed = base_event();
        let mut current_local = last_observed.clone();
        current_local.summary = "Standup (renamed locally)".into();
        let server_fresh = last_observed.clone();
        match arbitrate(&last_observed, &current_local, &server_fresh) {
            ConflictOutcome::ReplayWithFreshEtag { .. } => {}
            other => panic!("expected ReplayWithFreshEtag, got {other:?}"),
        }
    }

    #[test]
    fn arbitrate_converges_when_server_matches_current_local() {
        let last_observed = base_event();
        let mut current_local = last_observed.clone();
        current_local.summary = "Renamed".into();
        let server_fresh = current_local.clone();
        match arbitrate(&last_observed, &current_local, &server_fresh) {
            ConflictOutcome::AlreadyConverged { .. } => {}
            other => panic!("expected AlreadyConverged, got {other:?}"),
        }
    }

    #[test]
    fn arbitrate_server_wins_on_real_concurrent_edit() {
        let last_observed = base_event();
        let mut current_local = last_observed.clone();
        current_local.summary = "Local rename".into();
        let mut server_fresh = last_observed.clone();
        server_fresh.summary = "Server rename".into();
        match arbitrate(&last_observed, &current_local, &server_fresh) {
            ConflictOutcome::ServerWins { server_event } => {
                assert_eq!(server_event.summary, "Server rename");
            }
            other => panic!("expected ServerWins, got {other:?}"),
        }
    }
}
