//! Change detector (§4.E): decides NoChange / TokenDelta / EtagRange /
//! FullResync for one calendar, consulting the ctag and stored sync-token
//! before falling back to a time-ranged ETag listing.
//!
//! The detector never writes to the store; it only reads the calendar's
//! cached tokens and returns a verdict for the pull pipeline to act on.

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};

use crate::caldav::CalDavClient;
use crate::error::{ServerErrorKind, SyncError};
use crate::model::Calendar;
use crate::quirks::{Quirks, Tri};
use crate::xml::parse::parse_multistatus_bytes;

/// One changed or deleted resource surfaced by a sync-collection report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaEntry {
    pub href: String,
    pub etag: Option<String>,
    pub deleted: bool,
}

/// One (href, etag) pair from an EtagRange listing, used to diff against the
/// locally-known resource set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrefEtag {
    pub href: String,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeVerdict {
    NoChange,
    TokenDelta {
        changed: Vec<DeltaEntry>,
        new_sync_token: Option<String>,
    },
    EtagRange {
        entries: Vec<HrefEtag>,
    },
    FullResync,
}

fn far_future_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap()
}

fn ical_instant(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Run the §4.E decision tree for one calendar.
pub async fn detect_changes(
    client: &CalDavClient,
    calendar: &Calendar,
    quirks: &Quirks,
    past_window_days: i64,
) -> Result<ChangeVerdict, SyncError> {
    // Step 1: ctag.
    if quirks.ctag_support != Tri::No {
        if let Some(prior_ctag) = &calendar.ctag {
            match client.getctag(&calendar.caldav_url).await {
                Ok(resp) if resp.status.is_success() => {
                    let parsed = parse_multistatus_bytes(&resp.body)?;
                    let ctag = parsed.into_iter().find_map(|item| item.ctag);
                    match ctag {
                        Some(new_ctag) if &new_ctag == prior_ctag => {
                            debug!(calendar = %calendar.id, "ctag unchanged, no work");
                            return Ok(ChangeVerdict::NoChange);
                        }
                        Some(_) => {
                            // ctag changed: fall through to token/range detection.
                        }
                        None => {
                            // server didn't actually answer the ctag property; quirk: unsupported.
                        }
                    }
                }
                Ok(resp) if resp.status.as_u16() == 401 => {
                    return Err(SyncError::Auth(crate::error::AuthErrorKind::InvalidCredentials));
                }
                Ok(resp) if resp.status.as_u16() == 403 => {
                    return Err(SyncError::server(403, ServerErrorKind::Forbidden));
                }
                Ok(_) => {
                    // 404/5xx on the ctag property: quirk, fall through.
                }
                Err(err) if err.is_auth() => return Err(err),
                Err(_) => {
                    // transport-level failure probing ctag is not fatal here; fall through.
                }
            }
        }
    }

    // Step 2: sync-token.
    if quirks.sync_collection_support {
        if let Some(token) = &calendar.sync_token {
            match client.sync_collection(&calendar.caldav_url, Some(token), None, true).await {
                Ok(resp) if resp.status.is_success() => {
                    let parsed = parse_multistatus_bytes(&resp.body)?;
                    let new_sync_token = parsed.sync_token.clone();
                    let changed = parsed
                        .items
                        .into_iter()
                        .map(|item| DeltaEntry {
                            deleted: item.status.as_deref().map(is_deleted_status).unwrap_or(false),
                            href: item.href,
                            etag: item.etag,
                        })
                        .collect();
                    return Ok(ChangeVerdict::TokenDelta { changed, new_sync_token });
                }
                Ok(resp) if matches!(resp.status.as_u16(), 403 | 410 | 400) => {
                    warn!(calendar = %calendar.id, status = %resp.status, "sync-token rejected, falling back to EtagRange");
                    // fall through to step 3; caller is responsible for discarding the stored token.
                }
                Ok(resp) if resp.status.as_u16() == 401 => {
                    return Err(SyncError::Auth(crate::error::AuthErrorKind::InvalidCredentials));
                }
                Ok(resp) => {
                    return Err(SyncError::server(resp.status.as_u16(), ServerErrorKind::TemporarilyUnavailable));
                }
                Err(err) if err.is_retryable() => return Ok(ChangeVerdict::FullResync),
                Err(err) => return Err(err),
            }
        }
    }

    // Step 3: EtagRange.
    let start = Utc::now() - chrono::Duration::days(past_window_days);
    let end = far_future_sentinel();
    match client
        .calendar_query_timerange(&calendar.caldav_url, "VEVENT", Some(&ical_instant(start)), Some(&ical_instant(end)), false)
        .await
    {
        Ok(resp) if resp.status.is_success() => {
            let parsed = parse_multistatus_bytes(&resp.body)?;
            let entries = parsed
                .items
                .into_iter()
                .map(|item| HrefEtag { href: item.href, etag: item.etag })
                .collect();
            Ok(ChangeVerdict::EtagRange { entries })
        }
        Ok(resp) if resp.status.as_u16() == 401 => Err(SyncError::Auth(crate::error::AuthErrorKind::InvalidCredentials)),
        Ok(resp) => Err(SyncError::server(resp.status.as_u16(), ServerErrorKind::TemporarilyUnavailable)),
        // Step 4: a retryable transport failure here forces a full resync
        // rather than surfacing a hard error (§4.E).
        Err(err) if err.is_retryable() => Ok(ChangeVerdict::FullResync),
        Err(err) => Err(err),
    }
}

fn is_deleted_status(status: &str) -> bool {
    status.contains("404") || status.contains("410")
}
