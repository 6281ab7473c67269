//! Push pipeline (§4.G): drains the pending-operations queue for one account,
//! in insertion order, with ETag preconditions, conflict retry, and move
//! semantics.
//!
//! Structured as (plan) → (execute) → (commit) per §9's re-architecture
//! guidance, rather than mixing control flow with HTTP calls: coalescing is
//! a pure function over the queue, and each outcome is decided from a single
//! HTTP response before any store write happens.

use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::caldav::CalDavClient;
use crate::config::PushConfig;
use crate::error::SyncError;
use crate::fingerprint::{arbitrate, ConflictOutcome};
use crate::interfaces::{IcsCodec, LocalStore};
use crate::model::{Event, PendingOp, PendingOpKind, PendingOpStatus, SyncStatus};
use crate::quirks::Quirks;
use crate::xml::parse::normalize_etag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Succeeded,
    RetriedLater,
    Failed,
}

/// Coalesce a queue of pending ops: consecutive UPDATEs on the same event
/// collapse to the latest; an UPDATE followed by DELETE collapses to
/// DELETE; a never-synced CREATE followed by DELETE becomes a no-op.
/// Pure function, no I/O (§8 coalescing law, §9).
pub fn coalesce(ops: Vec<PendingOp>) -> Vec<PendingOp> {
    let mut by_event: Vec<(String, PendingOp)> = Vec::new();
    for op in ops {
        if let Some(slot) = by_event.iter_mut().find(|(event_id, _)| *event_id == op.event_id) {
            let (_, existing) = slot;
            match (existing.kind, op.kind) {
                (PendingOpKind::Create, PendingOpKind::Delete) => {
                    by_event.retain(|(event_id, _)| *event_id != op.event_id);
                }
                (PendingOpKind::Update, PendingOpKind::Delete) => {
                    *existing = op;
                }
                (PendingOpKind::Update, PendingOpKind::Update) => {
                    *existing = op;
                }
                _ => {
                    by_event.push((op.event_id.clone(), op));
                }
            }
        } else {
            by_event.push((op.event_id.clone(), op));
        }
    }
    by_event.into_iter().map(|(_, op)| op).collect()
}

/// Drain one account's pending-operations queue (already coalesced).
pub async fn drain_queue(
    client: &CalDavClient,
    store: &dyn LocalStore,
    ics: &dyn IcsCodec,
    quirks: &Quirks,
    config: &PushConfig,
    ops: Vec<PendingOp>,
) -> Result<(), SyncError> {
    for op in coalesce(ops) {
        let outcome = execute_one(client, store, ics, quirks, config, &op).await?;
        match outcome {
            PushOutcome::Succeeded => {
                store.mark_pending(&op.id, PendingOpStatus::Done, op.attempt_count, None).await?;
            }
            PushOutcome::RetriedLater => {
                let attempt_count = op.attempt_count + 1;
                if attempt_count >= config.max_attempts {
                    store
                        .mark_pending(&op.id, PendingOpStatus::Failed, attempt_count, Some("max_attempts_exceeded".to_string()))
                        .await?;
                } else {
                    store.mark_pending(&op.id, PendingOpStatus::Pending, attempt_count, None).await?;
                }
            }
            PushOutcome::Failed => {
                store
                    .mark_pending(&op.id, PendingOpStatus::Failed, op.attempt_count, Some("sync_error".to_string()))
                    .await?;
            }
        }
    }
    Ok(())
}

async fn execute_one(
    client: &CalDavClient,
    store: &dyn LocalStore,
    ics: &dyn IcsCodec,
    quirks: &Quirks,
    config: &PushConfig,
    op: &PendingOp,
) -> Result<PushOutcome, SyncError> {
    if op.attempt_count >= config.max_attempts {
        return Ok(PushOutcome::Failed);
    }

    match op.kind {
        PendingOpKind::Create => push_create(client, store, ics, quirks, op).await,
        PendingOpKind::Update => push_update(client, store, ics, quirks, config, op).await,
        PendingOpKind::Delete => push_delete(client, store, op).await,
        PendingOpKind::Move => push_move(client, store, ics, quirks, op).await,
    }
}

fn target_url(calendar_url: &str, uid: &str) -> String {
    format!("{}/{uid}.ics", calendar_url.trim_end_matches('/'))
}

fn etag_from_response(resp: &crate::transport::RawResponse) -> Option<String> {
    resp.etag_header().and_then(|raw| normalize_etag(&raw))
}

async fn push_create(
    client: &CalDavClient,
    store: &dyn LocalStore,
    ics: &dyn IcsCodec,
    quirks: &Quirks,
    op: &PendingOp,
) -> Result<PushOutcome, SyncError> {
    let mut event = op.event.clone();
    let calendar = store.load_calendar(&event.calendar_id).await?;
    let body = Bytes::from(ics.serialize(&event, &[])?);

    let mut uid = event.uid.clone();
    let mut url = op.target_url.clone().unwrap_or_else(|| target_url(&calendar.caldav_url, &uid));

    for attempt in 0..2 {
        let resp = client.put_if_none_match(&url, body.clone()).await?;
        match resp.status.as_u16() {
            201 | 204 => {
                event.caldav_url = Some(url);
                event.etag = etag_from_response(&resp).or(Some(String::new()));
                event.sync_status = SyncStatus::Synced;
                store.upsert_event(event).await?;
                return Ok(PushOutcome::Succeeded);
            }
            412 if attempt == 0 => {
                uid = format!("{uid}-{}", &Uuid::new_v4().simple().to_string()[..8]);
                url = target_url(&calendar.caldav_url, &uid);
                continue;
            }
            403 => {
                if let Some(location) = resp.headers.get(hyper::header::LOCATION).and_then(|v| v.to_str().ok()) {
                    // UID conflict: convert to an UPDATE targeting the existing resource.
                    event.caldav_url = Some(location.to_string());
                    event.etag = Some(String::new());
                    store.upsert_event(event.clone()).await?;
                    return push_update_body(client, store, quirks, &event, &body).await;
                }
                return Ok(PushOutcome::Failed);
            }
            413 => {
                event.sync_status = SyncStatus::SyncError;
                store.upsert_event(event).await?;
                return Ok(PushOutcome::Failed);
            }
            status if status >= 500 => return Ok(PushOutcome::RetriedLater),
            _ => return Ok(PushOutcome::Failed),
        }
    }
    Ok(PushOutcome::Failed)
}

async fn push_update_body(
    client: &CalDavClient,
    store: &dyn LocalStore,
    _quirks: &Quirks,
    event: &Event,
    body: &Bytes,
) -> Result<PushOutcome, SyncError> {
    let url = event.caldav_url.clone().unwrap();
    let resp = client.put(&url, body.clone(), &[]).await?;
    if resp.status.is_success() {
        let mut event = event.clone();
        event.etag = etag_from_response(&resp).or(Some(String::new()));
        event.sync_status = SyncStatus::Synced;
        store.upsert_event(event).await?;
        Ok(PushOutcome::Succeeded)
    } else {
        Ok(PushOutcome::Failed)
    }
}

async fn push_update(
    client: &CalDavClient,
    store: &dyn LocalStore,
    ics: &dyn IcsCodec,
    quirks: &Quirks,
    config: &PushConfig,
    op: &PendingOp,
) -> Result<PushOutcome, SyncError> {
    let mut event = op.event.clone();
    let Some(url) = event.caldav_url.clone() else {
        return Ok(PushOutcome::Failed);
    };
    let body = Bytes::from(ics.serialize(&event, &[])?);
    let etag = event.etag.clone().unwrap_or_default();

    let resp = if etag.is_empty() {
        client.put(&url, body.clone(), &[]).await?
    } else {
        client.put_if_match(&url, body.clone(), &etag).await?
    };

    match resp.status.as_u16() {
        200..=299 if quirks.allow_201_as_update || resp.status.as_u16() != 201 => {
            event.etag = etag_from_response(&resp).or(Some(String::new()));
            event.sync_status = SyncStatus::Synced;
            store.upsert_event(event).await?;
            Ok(PushOutcome::Succeeded)
        }
        404 => {
            // Resource is gone: demote to CREATE and let the caller re-enqueue.
            event.caldav_url = None;
            event.sync_status = SyncStatus::PendingCreate;
            store.upsert_event(event).await?;
            Ok(PushOutcome::RetriedLater)
        }
        412 => run_conflict_policy(client, store, ics, &event, &url, &body, config).await,
        status if status >= 500 => Ok(PushOutcome::RetriedLater),
        _ => Ok(PushOutcome::Failed),
    }
}

/// `last_observed_local` (§4.I step 2) is reconstructed by re-parsing
/// `event.raw_ics`, which [3] defines as "raw iCalendar bytes as last
/// observed from server" — exactly the pre-edit, last-synced baseline a
/// separate queue entry would otherwise have to duplicate.
fn last_observed_from_raw(ics: &dyn IcsCodec, current: &Event) -> Event {
    if current.raw_ics.is_empty() {
        return current.clone();
    }
    match ics.parse(&current.raw_ics) {
        Ok(components) => components
            .into_iter()
            .map(|c| c.event)
            .find(|e| e.recurrence_id == current.recurrence_id)
            .unwrap_or_else(|| current.clone()),
        Err(_) => current.clone(),
    }
}

async fn run_conflict_policy(
    client: &CalDavClient,
    store: &dyn LocalStore,
    ics: &dyn IcsCodec,
    local: &Event,
    url: &str,
    local_body: &Bytes,
    config: &PushConfig,
) -> Result<PushOutcome, SyncError> {
    let mut conflict_retries = 0u32;
    let mut local = local.clone();
    let last_observed = last_observed_from_raw(ics, &local);

    loop {
        let fresh = client.get(url).await?;
        if !fresh.status.is_success() {
            return Ok(PushOutcome::Failed);
        }
        let mut server_copy = match ics.parse(&fresh.body) {
            Ok(components) => components
                .into_iter()
                .map(|c| c.event)
                .find(|e| e.recurrence_id == local.recurrence_id)
                .unwrap_or_else(|| local.clone()),
            Err(_) => local.clone(),
        };
        server_copy.etag = etag_from_response(&fresh).or(Some(String::new()));

        match arbitrate(&last_observed, &local, &server_copy) {
            ConflictOutcome::ReplayWithFreshEtag { fresh_etag } => {
                let etag = fresh_etag.unwrap_or_default();
                let resp = if etag.is_empty() {
                    client.put(url, local_body.clone(), &[]).await?
                } else {
                    client.put_if_match(url, local_body.clone(), &etag).await?
                };
                if resp.status.is_success() {
                    local.etag = etag_from_response(&resp).or(Some(String::new()));
                    local.sync_status = SyncStatus::Synced;
                    store.upsert_event(local).await?;
                    return Ok(PushOutcome::Succeeded);
                }
            }
            ConflictOutcome::AlreadyConverged { server_etag } => {
                local.etag = server_etag;
                local.sync_status = SyncStatus::Synced;
                store.upsert_event(local).await?;
                return Ok(PushOutcome::Succeeded);
            }
            ConflictOutcome::ServerWins { server_event } => {
                warn!(event_id = %local.id, "server wins conflict, local change dropped");
                let mut overwritten = server_event;
                overwritten.id = local.id.clone();
                overwritten.calendar_id = local.calendar_id.clone();
                overwritten.caldav_url = Some(url.to_string());
                overwritten.sync_status = SyncStatus::Synced;
                store.upsert_event(overwritten).await?;
                return Ok(PushOutcome::Succeeded);
            }
        }

        conflict_retries += 1;
        if conflict_retries >= config.max_conflict_retries {
            local.sync_status = SyncStatus::SyncError;
            store.upsert_event(local).await?;
            return Ok(PushOutcome::Failed);
        }
    }
}

async fn push_delete(client: &CalDavClient, store: &dyn LocalStore, op: &PendingOp) -> Result<PushOutcome, SyncError> {
    let event = op.event.clone();
    let Some(url) = event.caldav_url.clone() else {
        store.delete_event(&event.id).await?;
        return Ok(PushOutcome::Succeeded);
    };
    let etag = event.etag.clone().unwrap_or_default();

    let resp = if etag.is_empty() {
        client.delete(&url).await?
    } else {
        client.delete_if_match(&url, &etag).await?
    };

    match resp.status.as_u16() {
        200..=299 | 404 => {
            store.delete_event(&event.id).await?;
            Ok(PushOutcome::Succeeded)
        }
        412 => {
            let fresh = client.getetag(&url).await?;
            let fresh_etag = fresh.etag_header().and_then(|raw| normalize_etag(&raw)).unwrap_or_default();
            let retry = if fresh_etag.is_empty() {
                client.delete(&url).await?
            } else {
                client.delete_if_match(&url, &fresh_etag).await?
            };
            if matches!(retry.status.as_u16(), 200..=299 | 404) {
                store.delete_event(&event.id).await?;
                Ok(PushOutcome::Succeeded)
            } else {
                Ok(PushOutcome::Failed)
            }
        }
        status if status >= 500 => Ok(PushOutcome::RetriedLater),
        _ => Ok(PushOutcome::Failed),
    }
}

/// MOVE between calendars: DELETE on the source, CREATE on the destination.
/// If DELETE succeeds but CREATE fails, the pair is left failed and the
/// next pull on the source calendar re-discovers the vanished event as
/// deleted (§4.G) rather than this function attempting to undo the delete.
async fn push_move(
    client: &CalDavClient,
    store: &dyn LocalStore,
    ics: &dyn IcsCodec,
    quirks: &Quirks,
    op: &PendingOp,
) -> Result<PushOutcome, SyncError> {
    let mut event = op.event.clone();
    let Some(source_url) = event.caldav_url.clone() else {
        return Ok(PushOutcome::Failed);
    };
    let Some(target_calendar_id) = op.target_calendar_id.clone() else {
        return Ok(PushOutcome::Failed);
    };

    let etag = event.etag.clone().unwrap_or_default();
    let delete_resp = if etag.is_empty() {
        client.delete(&source_url).await?
    } else {
        client.delete_if_match(&source_url, &etag).await?
    };
    if !matches!(delete_resp.status.as_u16(), 200..=299 | 404) {
        return Ok(PushOutcome::Failed);
    }

    let target_calendar = store.load_calendar(&target_calendar_id).await?;
    let body = Bytes::from(ics.serialize(&event, &[])?);
    let url = target_url(&target_calendar.caldav_url, &event.uid);
    let create_resp = client.put_if_none_match(&url, body).await?;

    if !matches!(create_resp.status.as_u16(), 201 | 204) {
        // Linked pair: the source DELETE already landed. Leave failed; the
        // next pull of the source calendar reconciles the vanished event.
        event.sync_status = SyncStatus::SyncError;
        store.upsert_event(event).await?;
        return Ok(PushOutcome::Failed);
    }

    event.calendar_id = target_calendar_id;
    event.caldav_url = Some(url);
    event.etag = etag_from_response(&create_resp).or(Some(String::new()));
    event.sync_status = SyncStatus::Synced;
    let _ = quirks;
    store.upsert_event(event).await?;
    Ok(PushOutcome::Succeeded)
}
