//! Pull pipeline (§4.F): materializes remote changes into local events with
//! idempotence and batching.
//!
//! Batching and the empty-multistatus single-href fallback fan-out are
//! grounded on the semaphore-guarded concurrent-fetch shape used throughout
//! the corpus for bounded fan-out (acquire the permit inside the spawned
//! task, not before spawning, so a burst of hrefs doesn't pre-allocate more
//! permits than exist).

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::caldav::CalDavClient;
use crate::config::PullConfig;
use crate::detector::{ChangeVerdict, DeltaEntry, HrefEtag};
use crate::error::{ServerErrorKind, SyncError};
use crate::fingerprint::fingerprint_of;
use crate::interfaces::occurrence::OccurrenceWindow;
use crate::interfaces::{IcsCodec, LocalStore, OccurrenceEngine};
use crate::model::{Calendar, ChangeDescriptor, PendingOpKind, SyncCounts, SyncStatus};
use crate::quirks::Quirks;
use crate::xml::parse::parse_multistatus_bytes;

#[derive(Debug, Clone, Default)]
pub struct PullOutcome {
    pub counts: SyncCounts,
    pub changes: Vec<ChangeDescriptor>,
    pub new_ctag: Option<String>,
    pub new_sync_token: Option<String>,
}

struct FetchedResource {
    href: String,
    etag: Option<String>,
    body: Option<Vec<u8>>,
}

fn far_future_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
}

/// Apply a change-detector verdict to the local store (§4.F).
pub async fn pull_changes(
    client: &CalDavClient,
    store: &dyn LocalStore,
    ics: &dyn IcsCodec,
    occurrences: &dyn OccurrenceEngine,
    calendar: &Calendar,
    verdict: ChangeVerdict,
    quirks: &Quirks,
    config: &PullConfig,
    force_full: bool,
) -> Result<PullOutcome, SyncError> {
    let (to_fetch, deleted_hrefs, new_sync_token): (Vec<String>, Vec<String>, Option<String>) = match verdict {
        ChangeVerdict::NoChange => return Ok(PullOutcome::default()),
        ChangeVerdict::TokenDelta { changed, new_sync_token } => {
            let (deleted, live): (Vec<DeltaEntry>, Vec<DeltaEntry>) =
                changed.into_iter().partition(|d| d.deleted);
            (
                live.into_iter().map(|d| d.href).collect(),
                deleted.into_iter().map(|d| d.href).collect(),
                new_sync_token,
            )
        }
        ChangeVerdict::EtagRange { entries } => {
            let (fetch, deleted) = diff_against_local(store, calendar, &entries).await?;
            (fetch, deleted, None)
        }
        ChangeVerdict::FullResync => {
            let start = if force_full { DateTime::<Utc>::from_timestamp(0, 0).unwrap() } else { Utc::now() - chrono::Duration::days(config.past_window_days) };
            let end = far_future_sentinel();
            let resp = client
                .calendar_query_timerange(&calendar.caldav_url, "VEVENT", Some(&ical_instant(start)), Some(&ical_instant(end)), false)
                .await?;
            if !resp.status.is_success() {
                return Err(SyncError::server(resp.status.as_u16(), ServerErrorKind::TemporarilyUnavailable));
            }
            let parsed = parse_multistatus_bytes(&resp.body)?;
            let entries: Vec<HrefEtag> = parsed.items.into_iter().map(|i| HrefEtag { href: i.href, etag: i.etag }).collect();
            let (fetch, deleted) = diff_against_local(store, calendar, &entries).await?;
            (fetch, deleted, None)
        }
    };

    let mut counts = SyncCounts::default();
    let mut changes = Vec::new();

    for href in &deleted_hrefs {
        if let Some(event) = store.get_event_by_url(&calendar.id, href).await? {
            store.delete_event(&event.id).await?;
            counts.deleted += 1;
            changes.push(ChangeDescriptor { event_id: event.id, summary: event.summary, kind: PendingOpKind::Delete });
        }
    }

    let batch_size = quirks.max_hrefs_per_multiget.max(1);
    for batch in to_fetch.chunks(batch_size) {
        let resources = fetch_batch(client, calendar, quirks, config, batch).await?;
        for resource in resources {
            let Some(body) = resource.body else {
                warn!(href = %resource.href, "failed to fetch resource body, skipping");
                continue;
            };
            let components = match ics.parse(&body) {
                Ok(c) => c,
                Err(_) => {
                    warn!(href = %resource.href, "failed to parse resource, skipping (partial success)");
                    continue;
                }
            };

            let mut touched_master = None;
            for component in components {
                let mut event = component.event;
                event.caldav_url = Some(resource.href.clone());
                event.etag = resource.etag.clone();
                event.calendar_id = calendar.id.clone();

                let existing = store
                    .get_event_by_uid(&calendar.id, &event.uid, event.recurrence_id)
                    .await?;

                let unchanged = match &existing {
                    Some(prior) => fingerprint_of(prior) == fingerprint_of(&event),
                    None => false,
                };
                if unchanged {
                    continue;
                }

                event.sync_status = SyncStatus::Synced;
                let is_update = existing.is_some();
                let summary = event.summary.clone();
                if event.recurrence_id.is_none() {
                    touched_master = Some(event.clone());
                }
                let id = store.upsert_event(event).await?;
                if is_update {
                    counts.updated += 1;
                    changes.push(ChangeDescriptor { event_id: id, summary, kind: PendingOpKind::Update });
                } else {
                    counts.added += 1;
                    changes.push(ChangeDescriptor { event_id: id, summary, kind: PendingOpKind::Create });
                }
            }

            if let Some(master) = touched_master {
                if master.rrule.is_some() {
                    let window = OccurrenceWindow {
                        start: Utc::now() - chrono::Duration::days(config.past_window_days),
                        end: far_future_sentinel(),
                    };
                    for occurrence in occurrences.expand(&master, &[], window) {
                        store.upsert_event(occurrence).await?;
                    }
                }
            }
        }
    }

    Ok(PullOutcome {
        counts,
        changes,
        new_ctag: None,
        new_sync_token,
    })
}

async fn diff_against_local(
    store: &dyn LocalStore,
    calendar: &Calendar,
    entries: &[HrefEtag],
) -> Result<(Vec<String>, Vec<String>), SyncError> {
    let now = Utc::now();
    let window_start = now - chrono::Duration::days(calendar.past_window_days());
    let window_end = far_future_sentinel();
    let local_events = store.list_events_in_range(&calendar.id, window_start, window_end).await?;

    let mut to_fetch = Vec::new();
    let mut seen_hrefs = std::collections::HashSet::new();
    for entry in entries {
        seen_hrefs.insert(entry.href.clone());
        let local = local_events.iter().find(|e| e.caldav_url.as_deref() == Some(entry.href.as_str()));
        let changed = match local {
            Some(e) => e.etag != entry.etag,
            None => true,
        };
        if changed {
            to_fetch.push(entry.href.clone());
        }
    }

    let deleted = local_events
        .iter()
        .filter(|e| e.caldav_url.as_deref().map(|u| !seen_hrefs.contains(u)).unwrap_or(false))
        .map(|e| e.caldav_url.clone().unwrap())
        .collect();

    Ok((to_fetch, deleted))
}

async fn fetch_batch(
    client: &CalDavClient,
    calendar: &Calendar,
    quirks: &Quirks,
    config: &PullConfig,
    hrefs: &[String],
) -> Result<Vec<FetchedResource>, SyncError> {
    if hrefs.is_empty() {
        return Ok(Vec::new());
    }

    if !quirks.multi_href_multiget {
        return fetch_single_href_fanout(client, &calendar.caldav_url, hrefs, config).await;
    }

    let multiget = client.calendar_multiget(&calendar.caldav_url, hrefs.iter().map(|h| h.as_str()), true).await;
    match multiget {
        None => Ok(Vec::new()),
        Some(Ok(resp)) if resp.status.as_u16() == 501 => {
            fetch_each_via_get(client, hrefs).await
        }
        Some(Ok(resp)) if resp.status.is_success() => {
            let parsed = parse_multistatus_bytes(&resp.body)?;
            if parsed.items.is_empty() && quirks.empty_body_200_signals_single_href {
                debug!(count = hrefs.len(), "empty multiget response, falling back to single-href fan-out");
                return fetch_single_href_fanout(client, &calendar.caldav_url, hrefs, config).await;
            }
            Ok(parsed
                .items
                .into_iter()
                .map(|item| FetchedResource {
                    href: item.href,
                    etag: item.etag,
                    body: item.calendar_data.map(|s| s.into_bytes()),
                })
                .collect())
        }
        Some(Ok(resp)) if resp.status.as_u16() >= 500 => {
            Err(SyncError::server(resp.status.as_u16(), ServerErrorKind::TemporarilyUnavailable))
        }
        Some(Ok(resp)) => Err(SyncError::server(resp.status.as_u16(), ServerErrorKind::TemporarilyUnavailable)),
        Some(Err(err)) => Err(err),
    }
}

async fn fetch_single_href_fanout(
    client: &CalDavClient,
    calendar_path: &str,
    hrefs: &[String],
    config: &PullConfig,
) -> Result<Vec<FetchedResource>, SyncError> {
    let semaphore = Arc::new(Semaphore::new(config.single_href_concurrency.max(1)));
    let mut tasks = FuturesUnordered::new();

    for href in hrefs.iter().cloned() {
        let semaphore = Arc::clone(&semaphore);
        let client = client.clone();
        let calendar_path = calendar_path.to_string();
        tasks.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            let result = client.calendar_multiget(&calendar_path, [href.as_str()], true).await;
            (href, result)
        });
    }

    let mut resources = Vec::with_capacity(hrefs.len());
    while let Some((href, result)) = tasks.next().await {
        match result {
            Some(Ok(resp)) if resp.status.is_success() => {
                let parsed = parse_multistatus_bytes(&resp.body)?;
                if let Some(item) = parsed.items.into_iter().next() {
                    resources.push(FetchedResource {
                        href: item.href,
                        etag: item.etag,
                        body: item.calendar_data.map(|s| s.into_bytes()),
                    });
                }
            }
            _ => {
                resources.push(FetchedResource { href, etag: None, body: None });
            }
        }
    }
    Ok(resources)
}

async fn fetch_each_via_get(client: &CalDavClient, hrefs: &[String]) -> Result<Vec<FetchedResource>, SyncError> {
    let mut resources = Vec::with_capacity(hrefs.len());
    for href in hrefs {
        match client.get(href).await {
            Ok(resp) if resp.status.is_success() => {
                resources.push(FetchedResource {
                    href: href.clone(),
                    etag: resp.etag_header(),
                    body: Some(resp.body.to_vec()),
                });
            }
            _ => resources.push(FetchedResource { href: href.clone(), etag: None, body: None }),
        }
    }
    Ok(resources)
}

fn ical_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}
