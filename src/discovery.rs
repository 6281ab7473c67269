//! Discovery (§4.D): from (base URL, credentials) to (principal URL,
//! calendar-home URL, discovered calendars).
//!
//! Grounded on the teacher's `discover_current_user_principal`/
//! `discover_calendar_home_set`/`list_calendars`, generalized with the
//! well-known probe, the quirks-driven path-probing fallback, and the
//! read-only/webcal-filtering edge cases the teacher's version skips.

use tracing::{debug, warn};

use crate::caldav::CalDavClient;
use crate::error::{AuthErrorKind, ServerErrorKind, SyncError};
use crate::model::Calendar;
use crate::quirks::Quirks;
use crate::xml::parse::{parse_multistatus_bytes, PrivilegeLevel};

#[derive(Debug, Clone)]
pub struct DiscoveredCalendar {
    pub caldav_url: String,
    pub display_name: String,
    pub color: Option<String>,
    pub read_only: bool,
    pub ctag: Option<String>,
    pub sync_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub base_url: String,
    pub principal_url: String,
    pub calendar_home_url: String,
    pub calendars: Vec<DiscoveredCalendar>,
}

/// Run the full §4.D algorithm.
pub async fn discover(client: &CalDavClient, base_url: &str, quirks: &Quirks) -> Result<DiscoveryResult, SyncError> {
    let discovery_root = probe_well_known(client, base_url).await.unwrap_or_else(|| base_url.to_string());

    let principal_url = match discover_principal(client, &discovery_root).await {
        Ok(Some(url)) => url,
        Ok(None) | Err(_) => probe_known_roots(client, base_url, quirks).await?,
    };

    let calendar_home_url = discover_calendar_home(client, &principal_url).await?;
    let calendars = list_calendars(client, &calendar_home_url, quirks).await?;

    if calendars.is_empty() {
        return Err(SyncError::server(0, ServerErrorKind::NotFound));
    }

    Ok(DiscoveryResult {
        base_url: base_url.to_string(),
        principal_url,
        calendar_home_url,
        calendars,
    })
}

/// Step 1: `.well-known/caldav`, following at most one redirect. Returns
/// `None` when the server doesn't support it (404/405/501) rather than an
/// error — the caller falls through to the bare base URL.
async fn probe_well_known(client: &CalDavClient, base_url: &str) -> Option<String> {
    let well_known = format!("{}/.well-known/caldav", base_url.trim_end_matches('/'));
    let resp = client.current_user_principal(&well_known).await.ok()?;
    match resp.status.as_u16() {
        404 | 405 | 501 => None,
        301 | 302 | 307 | 308 => resp
            .headers
            .get(hyper::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string()),
        _ if resp.status.is_success() => Some(well_known),
        _ => None,
    }
}

/// Step 2. `Ok(None)` means the property was absent but the request itself
/// succeeded (ambiguous — falls through to path probing); `Err` propagates
/// only a fatal auth failure directly.
async fn discover_principal(client: &CalDavClient, root: &str) -> Result<Option<String>, SyncError> {
    let resp = client.current_user_principal(root).await?;
    if resp.status.as_u16() == 401 {
        return Err(SyncError::Auth(AuthErrorKind::InvalidCredentials));
    }
    if !resp.status.is_success() {
        return Ok(None);
    }
    let parsed = parse_multistatus_bytes(&resp.body)?;
    Ok(parsed.items.into_iter().find_map(|item| item.current_user_principal.into_iter().next()))
}

/// Step 3: probe the quirks-declared ordered list of known roots. Stops on
/// the first 2xx/207; a 401 anywhere is fatal immediately (§4.D edge case a
/// covers servers that 501 one spelling but 2xx another, hence trying the
/// whole ordered list rather than stopping at the first non-2xx).
async fn probe_known_roots(client: &CalDavClient, base_url: &str, quirks: &Quirks) -> Result<String, SyncError> {
    for candidate in &quirks.discovery_probe_paths {
        let url = format!("{}{}", base_url.trim_end_matches('/'), candidate);
        let resp = client.current_user_principal(&url).await?;
        if resp.status.as_u16() == 401 {
            return Err(SyncError::Auth(AuthErrorKind::InvalidCredentials));
        }
        if resp.status.is_success() {
            let parsed = parse_multistatus_bytes(&resp.body)?;
            if let Some(principal) = parsed.items.into_iter().find_map(|i| i.current_user_principal.into_iter().next()) {
                return Ok(principal);
            }
            // Some path-probe targets (e.g. SOGo) are themselves valid
            // principal URLs when current-user-principal is absent.
            debug!(url = %url, "path probe succeeded without a principal property, using probe URL itself");
            return Ok(url);
        }
    }
    Err(SyncError::server(0, ServerErrorKind::NotACalDavServer))
}

/// Step 4. Open-Xchange-style servers where the principal URL doubles as
/// the calendar home are accepted and deduplicated (§4.D edge case b): if
/// the server reports no calendar-home-set, falls back to the principal URL.
async fn discover_calendar_home(client: &CalDavClient, principal_url: &str) -> Result<String, SyncError> {
    let resp = client.calendar_home_set(principal_url).await?;
    if !resp.status.is_success() {
        return Err(SyncError::server(resp.status.as_u16(), ServerErrorKind::NotACalDavServer));
    }
    let parsed = parse_multistatus_bytes(&resp.body)?;
    let home = parsed.items.into_iter().find_map(|i| i.calendar_home_set.into_iter().next());
    Ok(home.unwrap_or_else(|| principal_url.to_string()))
}

/// Step 5. Filters to `resourcetype` calendar collections (§4.D edge case c
/// for read-only, edge case d for webcal subscriptions), and drops the
/// scheduling inbox/outbox collections named by the quirk profile's
/// sentinels — some servers tag these `resourcetype calendar` too, but
/// they're never sync targets.
async fn list_calendars(client: &CalDavClient, home_url: &str, quirks: &Quirks) -> Result<Vec<DiscoveredCalendar>, SyncError> {
    let resp = client.list_calendars(home_url).await?;
    if !resp.status.is_success() {
        return Err(SyncError::server(resp.status.as_u16(), ServerErrorKind::NotACalDavServer));
    }
    let parsed = parse_multistatus_bytes(&resp.body)?;

    let mut calendars = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for item in parsed.items {
        if !item.is_calendar {
            continue;
        }
        if item.href.starts_with("webcal://") {
            warn!(href = %item.href, "dropping webcal subscription URL from discovery");
            continue;
        }
        if is_inbox_or_outbox(&item.href, quirks) {
            warn!(href = %item.href, "dropping scheduling inbox/outbox collection from discovery");
            continue;
        }
        let normalized = normalize_trailing_slash(&item.href);
        if !seen.insert(normalized.clone()) {
            continue;
        }
        let read_only = item.privilege == PrivilegeLevel::ReadOnly;
        calendars.push(DiscoveredCalendar {
            caldav_url: normalized,
            display_name: item.displayname.unwrap_or_default(),
            color: item.calendar_color,
            read_only,
            ctag: item.ctag,
            sync_token: item.sync_token,
        });
    }
    Ok(calendars)
}

fn is_inbox_or_outbox(href: &str, quirks: &Quirks) -> bool {
    quirks.inbox_outbox_sentinels.iter().any(|sentinel| href.contains(sentinel))
}

fn normalize_trailing_slash(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

/// Convert discovery output into bound `Calendar` rows for a given account;
/// the orchestrator decides persistence (§4.D step 6: "persist nothing").
pub fn to_calendars(account_id: &str, discovered: &[DiscoveredCalendar]) -> Vec<Calendar> {
    discovered
        .iter()
        .map(|d| Calendar {
            id: String::new(),
            account_id: account_id.to_string(),
            caldav_url: d.caldav_url.clone(),
            display_name: d.display_name.clone(),
            color: d.color.clone(),
            read_only: d.read_only,
            visible: true,
            ctag: d.ctag.clone(),
            sync_token: d.sync_token.clone(),
            last_sync: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_inbox_and_outbox_collections_are_filtered() {
        let quirks = Quirks::default_for(crate::model::ProviderFamily::Generic);
        assert!(is_inbox_or_outbox("/calendars/testuser1/inbox/", &quirks));
        assert!(is_inbox_or_outbox("/calendars/testuser1/outbox/", &quirks));
        assert!(!is_inbox_or_outbox("/calendars/testuser1/default/", &quirks));
    }

    #[test]
    fn normalize_trailing_slash_adds_missing_slash() {
        assert_eq!(normalize_trailing_slash("/cal/work"), "/cal/work/");
        assert_eq!(normalize_trailing_slash("/cal/work/"), "/cal/work/");
    }

    #[test]
    fn to_calendars_binds_account_id_and_marks_visible() {
        let discovered = vec![DiscoveredCalendar {
            caldav_url: "/cal/work/".to_string(),
            display_name: "Work".to_string(),
            color: None,
            read_only: false,
            ctag: None,
            sync_token: None,
        }];
        let calendars = to_calendars("acct-1", &discovered);
        assert_eq!(calendars.len(), 1);
        assert_eq!(calendars[0].account_id, "acct-1");
        assert!(calendars[0].visible);
    }
}
