//! Account lifecycle (§6, exposed): `discover(base_url, credentials) ->
//! DiscoveryResult`, `attach(account_meta, selected_calendars) -> AccountId`,
//! `detach(account_id)`. Grounded directly on the literal method signatures
//! in §6; persistence of the `Account`/`Calendar` rows this module produces
//! is the embedder's responsibility (§4.D step 6: "persist nothing — the
//! orchestrator decides what becomes an Account").

use std::sync::Arc;

use uuid::Uuid;

use crate::caldav::CalDavClient;
use crate::config::{Credentials, TransportConfig};
use crate::discovery::{self, DiscoveredCalendar};
use crate::error::SyncError;
use crate::interfaces::CredentialStore;
use crate::model::{Account, AccountId, Calendar, ProviderFamily};
use crate::quirks::Quirks;
use crate::transport::Transport;

/// Output of `discover`: enough to let the embedder present a calendar
/// picker and, on confirmation, call `attach` with the subset selected.
#[derive(Debug, Clone)]
pub struct AccountDraft {
    pub provider_family: ProviderFamily,
    pub base_url: String,
    pub principal_url: String,
    pub calendar_home_url: String,
    pub calendars: Vec<DiscoveredCalendar>,
}

/// Run discovery (§4.D) against a bare server URL and a trial credentials
/// value, without binding or persisting anything. The provider family is
/// detected from the URL alone; header-based detection happens once actual
/// requests come back, but the family only steers quirk fallbacks, so a
/// same-session refinement is unnecessary to produce a usable draft.
pub async fn discover(
    base_url: &str,
    credentials: Credentials,
    transport_config: TransportConfig,
) -> Result<AccountDraft, SyncError> {
    let family = Quirks::detect_family(base_url, None, None);
    let quirks = Quirks::default_for(family);

    let transport = Transport::new(base_url, credentials, transport_config)
        .map_err(|err| SyncError::Internal(err.to_string()))?;
    let client = CalDavClient::new(transport);

    let result = discovery::discover(&client, base_url, &quirks).await?;

    Ok(AccountDraft {
        provider_family: family,
        base_url: result.base_url,
        principal_url: result.principal_url,
        calendar_home_url: result.calendar_home_url,
        calendars: result.calendars,
    })
}

/// The entities produced by `attach`, ready for the embedder to persist and
/// then hand to [`crate::scheduler::Scheduler::bind_account`].
#[derive(Debug, Clone)]
pub struct AttachedAccount {
    pub id: AccountId,
    pub account: Account,
    pub calendars: Vec<Calendar>,
}

/// Mint a new account id, stash its credentials, and bind the calendars the
/// user selected from a prior `discover` draft (identified by CalDAV URL;
/// an empty selection attaches every discovered calendar). [I] (provider
/// family, identity label) uniqueness (§3) is the embedder's to enforce —
/// this module has no account store to check against.
pub async fn attach(
    credential_store: &dyn CredentialStore,
    draft: &AccountDraft,
    identity_label: &str,
    credentials: Credentials,
    selected_calendar_urls: &[String],
) -> Result<AttachedAccount, SyncError> {
    let account_id: AccountId = Uuid::new_v4().to_string();
    credential_store.update(&account_id, credentials).await?;

    let account = Account {
        id: account_id.clone(),
        provider_family: draft.provider_family,
        base_url: draft.base_url.clone(),
        principal_url: draft.principal_url.clone(),
        calendar_home_url: draft.calendar_home_url.clone(),
        identity_label: identity_label.to_string(),
    };

    let selected: Vec<DiscoveredCalendar> = draft
        .calendars
        .iter()
        .filter(|c| selected_calendar_urls.is_empty() || selected_calendar_urls.contains(&c.caldav_url))
        .cloned()
        .collect();
    let calendars = discovery::to_calendars(&account_id, &selected);

    Ok(AttachedAccount { id: account_id, account, calendars })
}

/// Detach an account: invalidate its credentials so a later `fetch` fails
/// closed. Removing the `Account`/`Calendar` rows themselves is the
/// embedder's job (the core doesn't own that table, §3).
pub async fn detach(credential_store: &dyn CredentialStore, account_id: &AccountId) -> Result<(), SyncError> {
    credential_store.invalidate(account_id).await
}

/// Convenience: build a ready-to-use [`CalDavClient`] bound to one account's
/// base URL and fresh credentials, for callers that want to drive ad hoc
/// requests (e.g. an immediate re-discover) outside the scheduler.
pub fn client_for(base_url: &str, credentials: Credentials, transport_config: TransportConfig) -> Result<CalDavClient, SyncError> {
    let transport: Arc<Transport> =
        Transport::new(base_url, credentials, transport_config).map_err(|err| SyncError::Internal(err.to_string()))?;
    Ok(CalDavClient::new(transport))
}
