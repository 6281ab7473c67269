//! Reconciler / orchestrator (§4.H): drives one sync session per (account,
//! calendar) through IDLE → DISCOVERING → DETECTING → PULLING → PUSHING →
//! COMMIT → IDLE, with a FULL_RESYNC branch off DETECTING/PULLING.
//!
//! No direct teacher precedent for the state machine itself — the closest
//! corpus shape for an `Arc<Mutex<_>>`-guarded per-key session registry is
//! `fredsystems-fred-cal/fred-cal/src/sync.rs`'s `SyncManager`, reused here
//! only for its concurrency-primitive shape (a stub lacking the actual
//! reconciliation logic).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::caldav::CalDavClient;
use crate::config::{PullConfig, PushConfig, SessionConfig};
use crate::detector::{self, ChangeVerdict};
use crate::discovery;
use crate::error::SyncError;
use crate::interfaces::{IcsCodec, LocalStore, OccurrenceEngine};
use crate::model::{Calendar, CalendarId, ChangeDescriptor, SessionResultKind, SyncCounts};
use crate::pull;
use crate::push;
use crate::quirks::Quirks;

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub calendar_id: CalendarId,
    pub result: SessionResultKind,
    pub counts: SyncCounts,
    pub changes: Vec<ChangeDescriptor>,
}

/// Drives sessions for a fixed (store, ics, occurrence-engine, quirks)
/// triple. One `Reconciler` instance is shared across all accounts served
/// by a process; per-calendar serialization is internal (§5: "the same
/// (account, calendar) pair is serialized by a per-calendar mutex held for
/// the whole session").
pub struct Reconciler {
    store: Arc<dyn LocalStore>,
    ics: Arc<dyn IcsCodec>,
    occurrences: Arc<dyn OccurrenceEngine>,
    pull_config: PullConfig,
    push_config: PushConfig,
    session_config: SessionConfig,
    calendar_locks: AsyncMutex<HashMap<CalendarId, Arc<AsyncMutex<()>>>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn LocalStore>,
        ics: Arc<dyn IcsCodec>,
        occurrences: Arc<dyn OccurrenceEngine>,
        pull_config: PullConfig,
        push_config: PushConfig,
        session_config: SessionConfig,
    ) -> Self {
        Reconciler {
            store,
            ics,
            occurrences,
            pull_config,
            push_config,
            session_config,
            calendar_locks: AsyncMutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, calendar_id: &CalendarId) -> Arc<AsyncMutex<()>> {
        let mut map = self.calendar_locks.lock().await;
        map.entry(calendar_id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Run one full session for `calendar`, bounded by the session-wide
    /// timeout (§5). `account_id` scopes the push queue; `force_full` widens
    /// the pull window to the epoch origin for a FULL_RESYNC triggered from
    /// outside (e.g. an explicit re-discover).
    pub async fn run_session(
        &self,
        client: &CalDavClient,
        quirks: &Quirks,
        account_id: &str,
        calendar: &Calendar,
        force_full: bool,
    ) -> SessionOutcome {
        let lock = self.lock_for(&calendar.id).await;
        let _guard = lock.lock().await;

        let future = self.run_session_inner(client, quirks, account_id, calendar, force_full);
        match tokio::time::timeout(self.session_config.session_timeout, future).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(calendar_id = %calendar.id, "session timed out");
                SessionOutcome {
                    calendar_id: calendar.id.clone(),
                    result: SessionResultKind::NetworkError,
                    counts: SyncCounts::default(),
                    changes: Vec::new(),
                }
            }
        }
    }

    async fn run_session_inner(
        &self,
        client: &CalDavClient,
        quirks: &Quirks,
        account_id: &str,
        calendar: &Calendar,
        force_full: bool,
    ) -> SessionOutcome {
        // DETECTING
        let verdict = match detector::detect_changes(client, calendar, quirks, self.pull_config.past_window_days).await {
            Ok(v) => v,
            Err(err) => return self.failure_outcome(calendar, &err),
        };

        // PULLING (NoChange skips straight to PUSHING; an expired token
        // inside PULLING forces one FULL_RESYNC attempt, never looped).
        let pull_outcome = match self.run_pull(client, quirks, calendar, verdict, force_full).await {
            Ok(outcome) => outcome,
            Err(err) if matches!(&err, SyncError::Server { kind: crate::error::ServerErrorKind::SyncTokenExpired, .. }) => {
                info!(calendar_id = %calendar.id, "sync token expired, forcing one full resync");
                match self.run_pull(client, quirks, calendar, ChangeVerdict::FullResync, true).await {
                    Ok(outcome) => outcome,
                    Err(err) => return self.failure_outcome(calendar, &err),
                }
            }
            Err(err) => return self.failure_outcome(calendar, &err),
        };

        if let Err(err) = self
            .store
            .save_calendar_tokens(&calendar.id, pull_outcome.new_ctag.clone(), pull_outcome.new_sync_token.clone(), now())
            .await
        {
            return self.failure_outcome(calendar, &err);
        }

        // PUSHING
        if !calendar.read_only {
            if let Err(err) = self.run_push(client, quirks, account_id).await {
                return self.failure_outcome(calendar, &err);
            }
        }

        // COMMIT
        SessionOutcome {
            calendar_id: calendar.id.clone(),
            result: SessionResultKind::Success,
            counts: pull_outcome.counts,
            changes: pull_outcome.changes,
        }
    }

    async fn run_pull(
        &self,
        client: &CalDavClient,
        quirks: &Quirks,
        calendar: &Calendar,
        verdict: ChangeVerdict,
        force_full: bool,
    ) -> Result<pull::PullOutcome, SyncError> {
        pull::pull_changes(
            client,
            self.store.as_ref(),
            self.ics.as_ref(),
            self.occurrences.as_ref(),
            calendar,
            verdict,
            quirks,
            &self.pull_config,
            force_full,
        )
        .await
    }

    async fn run_push(&self, client: &CalDavClient, quirks: &Quirks, account_id: &str) -> Result<(), SyncError> {
        let ops = self.store.dequeue_pending(account_id, 256).await?;
        if ops.is_empty() {
            return Ok(());
        }
        push::drain_queue(client, self.store.as_ref(), self.ics.as_ref(), quirks, &self.push_config, ops).await
    }

    fn failure_outcome(&self, calendar: &Calendar, err: &SyncError) -> SessionOutcome {
        let result = classify_session_result(err);
        if result == SessionResultKind::AuthError {
            warn!(calendar_id = %calendar.id, "session terminated: account needs credential refresh");
        }
        SessionOutcome {
            calendar_id: calendar.id.clone(),
            result,
            counts: SyncCounts::default(),
            changes: Vec::new(),
        }
    }
}

fn classify_session_result(err: &SyncError) -> SessionResultKind {
    match err {
        SyncError::Auth(_) => SessionResultKind::AuthError,
        SyncError::Network(_) => SessionResultKind::NetworkError,
        SyncError::Server { status, kind: crate::error::ServerErrorKind::SyncTokenExpired } => {
            let _ = status;
            SessionResultKind::TokenExpired
        }
        SyncError::Server { status, .. } => SessionResultKind::ServerError(*status),
        SyncError::Data(_) | SyncError::Internal(_) => SessionResultKind::ServerError(0),
    }
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

/// Re-run discovery for an account and rebind its calendars (IDLE→DISCOVERING).
/// The caller decides what to persist — discovery itself writes nothing.
pub async fn discover_account(
    client: &CalDavClient,
    base_url: &str,
    quirks: &Quirks,
) -> Result<discovery::DiscoveryResult, SyncError> {
    discovery::discover(client, base_url, quirks).await
}
