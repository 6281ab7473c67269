//! Scheduler (§6, exposed): `request_sync`/`schedule_periodic`/`cancel`,
//! grounded directly on the literal method signatures in §6 plus the
//! coalescing rule in §5 ("a new scheduled sync enqueued while a sync is
//! running replaces the pending one: at most one future session per
//! calendar beyond the currently-running one"). The in-progress registry is
//! a `parking_lot::Mutex`-guarded map, grounded in `leonardo-matheus-winux`'s
//! use of `parking_lot` for this kind of small shared-state guard (§5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::caldav::CalDavClient;
use crate::config::TransportConfig;
use crate::error::SyncError;
use crate::interfaces::CredentialStore;
use crate::model::{AccountId, Calendar, SessionResultKind};
use crate::quirks::Quirks;
use crate::reconciler::{Reconciler, SessionOutcome};
use crate::transport::Transport;

/// Everything the scheduler needs to rebuild a transport/client pair per
/// session and the calendars to sweep for one account. Bound by the
/// embedder once (typically right after [`crate::account::attach`]).
#[derive(Clone)]
struct AccountBinding {
    base_url: String,
    quirks: Quirks,
    transport_config: TransportConfig,
    calendars: Vec<Calendar>,
}

/// Bookkeeping for one account's currently-running session plus, per §5,
/// at most one coalesced follow-up. `pending_waiters` are the handles of
/// requests that arrived while a session was already in flight; they all
/// resolve to the *next* session's outcome, not the running one's.
struct InProgress {
    token: CancellationToken,
    pending_force_full: Option<bool>,
    pending_waiters: Vec<oneshot::Sender<Vec<SessionOutcome>>>,
}

/// §6 `SyncHandle`: resolves to the outcome of the specific session this
/// request caused to run (directly, or as a coalesced follow-up).
pub struct SyncHandle {
    pub account_id: AccountId,
    result_rx: oneshot::Receiver<Vec<SessionOutcome>>,
    token: CancellationToken,
}

impl SyncHandle {
    /// Await the session result(s) — one [`SessionOutcome`] per calendar
    /// swept for this account, in binding order. Errors only if the
    /// session task was dropped before sending, which does not happen in
    /// normal operation.
    pub async fn result(self) -> Result<Vec<SessionOutcome>, SyncError> {
        self.result_rx
            .await
            .map_err(|_| SyncError::Internal("sync session dropped before completion".to_string()))
    }
}

/// §6 `cancel(handle)`. Cooperative: honored at the next per-calendar
/// suspension point inside the running sweep (§5), not mid-request.
pub fn cancel(handle: &SyncHandle) {
    handle.token.cancel();
}

/// Drives sessions for every account bound to it. One `Scheduler` is shared
/// across a process; construct it behind an `Arc` since `request_sync`/
/// `schedule_periodic` spawn tasks that outlive the calling stack frame.
pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    credential_store: Arc<dyn CredentialStore>,
    bindings: Mutex<HashMap<AccountId, AccountBinding>>,
    in_progress: Mutex<HashMap<AccountId, InProgress>>,
    periodic: Mutex<HashMap<AccountId, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(reconciler: Arc<Reconciler>, credential_store: Arc<dyn CredentialStore>) -> Self {
        Scheduler {
            reconciler,
            credential_store,
            bindings: Mutex::new(HashMap::new()),
            in_progress: Mutex::new(HashMap::new()),
            periodic: Mutex::new(HashMap::new()),
        }
    }

    /// Bind (or rebind) the calendars an account's syncs sweep. The
    /// scheduler itself never persists accounts or calendars (§4.D step 6);
    /// the embedder calls this after `account::attach` or after adding/
    /// removing a visible calendar.
    pub fn bind_account(
        &self,
        account_id: AccountId,
        base_url: String,
        quirks: Quirks,
        transport_config: TransportConfig,
        calendars: Vec<Calendar>,
    ) {
        self.bindings.lock().insert(account_id, AccountBinding { base_url, quirks, transport_config, calendars });
    }

    /// Remove an account from scheduling entirely: drops its binding and
    /// aborts any periodic task. A session already in flight runs to
    /// completion (its handle is unaffected).
    pub fn unbind_account(&self, account_id: &AccountId) {
        self.bindings.lock().remove(account_id);
        if let Some(handle) = self.periodic.lock().remove(account_id) {
            handle.abort();
        }
    }

    /// §6 `request_sync(account_id, force_full) -> SyncHandle`. If a
    /// session for this account is already running, the request coalesces
    /// into that session's successor instead of starting a second one.
    pub async fn request_sync(self: &Arc<Self>, account_id: &AccountId, force_full: bool) -> Result<SyncHandle, SyncError> {
        let coalesced = {
            let mut guard = self.in_progress.lock();
            guard.get_mut(account_id).map(|entry| {
                entry.pending_force_full = Some(entry.pending_force_full.unwrap_or(false) || force_full);
                let (tx, rx) = oneshot::channel();
                entry.pending_waiters.push(tx);
                (rx, entry.token.clone())
            })
        };

        if let Some((rx, token)) = coalesced {
            debug!(account_id = %account_id, "coalesced sync request into the running session's successor");
            return Ok(SyncHandle { account_id: account_id.clone(), result_rx: rx, token });
        }

        self.spawn_session(account_id, force_full)
    }

    /// §6 `schedule_periodic(account_id, interval)`. Spawns a ticking task
    /// that calls `request_sync` on each tick; a previous periodic task for
    /// the same account is aborted and replaced.
    pub fn schedule_periodic(self: &Arc<Self>, account_id: AccountId, interval: Duration) {
        let this = Arc::clone(self);
        let aid = account_id.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(err) = this.request_sync(&aid, false).await {
                    warn!(account_id = %aid, error = %err, "periodic sync request failed to start");
                }
            }
        });
        if let Some(old) = self.periodic.lock().insert(account_id, handle) {
            old.abort();
        }
    }

    fn spawn_session(self: &Arc<Self>, account_id: &AccountId, force_full: bool) -> Result<SyncHandle, SyncError> {
        let binding = self
            .bindings
            .lock()
            .get(account_id)
            .cloned()
            .ok_or_else(|| SyncError::Internal(format!("account {account_id} is not bound to this scheduler")))?;

        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        self.in_progress.lock().insert(
            account_id.clone(),
            InProgress { token: token.clone(), pending_force_full: None, pending_waiters: Vec::new() },
        );

        let this = Arc::clone(self);
        let aid = account_id.clone();
        let tok = token.clone();
        tokio::spawn(async move {
            this.run_loop(aid, binding, force_full, tx, tok).await;
        });

        Ok(SyncHandle { account_id: account_id.clone(), result_rx: rx, token })
    }

    /// Runs sessions for `account_id` until no coalesced follow-up remains.
    /// Every loop iteration is one sweep across the account's bound
    /// calendars; `sender` is fulfilled by the first iteration's outcome,
    /// `carried_waiters` (from requests that arrived mid-sweep) by whichever
    /// iteration runs next.
    async fn run_loop(
        self: Arc<Self>,
        account_id: AccountId,
        binding: AccountBinding,
        mut force_full: bool,
        first_sender: oneshot::Sender<Vec<SessionOutcome>>,
        token: CancellationToken,
    ) {
        let mut sender = Some(first_sender);
        let mut carried_waiters: Vec<oneshot::Sender<Vec<SessionOutcome>>> = Vec::new();

        loop {
            let outcomes = self.run_once(&account_id, &binding, force_full, &token).await;

            if let Some(tx) = sender.take() {
                let _ = tx.send(outcomes.clone());
            }
            for waiter in carried_waiters.drain(..) {
                let _ = waiter.send(outcomes.clone());
            }

            let (next_force_full, waiters) = {
                let mut guard = self.in_progress.lock();
                match guard.get_mut(&account_id) {
                    Some(entry) => (entry.pending_force_full.take(), std::mem::take(&mut entry.pending_waiters)),
                    None => (None, Vec::new()),
                }
            };

            match next_force_full {
                Some(ff) => {
                    force_full = ff;
                    carried_waiters = waiters;
                }
                None => {
                    self.in_progress.lock().remove(&account_id);
                    break;
                }
            }
        }
    }

    /// One sweep across an account's bound calendars. Stops early (§4.H:
    /// "a 401 anywhere in the session terminates it with AuthError") and
    /// invalidates credentials so the next `fetch` fails closed until the
    /// embedder rotates them.
    async fn run_once(
        &self,
        account_id: &AccountId,
        binding: &AccountBinding,
        force_full: bool,
        token: &CancellationToken,
    ) -> Vec<SessionOutcome> {
        let credentials = match self.credential_store.fetch(account_id).await {
            Ok(c) => c,
            Err(err) => {
                warn!(account_id = %account_id, error = %err, "credential fetch failed, aborting session");
                return Vec::new();
            }
        };

        let transport = match Transport::new(&binding.base_url, credentials, binding.transport_config) {
            Ok(t) => t,
            Err(err) => {
                warn!(account_id = %account_id, error = %err, "transport construction failed, aborting session");
                return Vec::new();
            }
        };
        let client = CalDavClient::new(transport);

        let mut outcomes = Vec::with_capacity(binding.calendars.len());
        for calendar in &binding.calendars {
            if token.is_cancelled() {
                debug!(account_id = %account_id, "session cancelled between calendars");
                break;
            }
            let outcome = self.reconciler.run_session(&client, &binding.quirks, account_id, calendar, force_full).await;
            let is_auth_error = outcome.result == SessionResultKind::AuthError;
            outcomes.push(outcome);
            if is_auth_error {
                warn!(account_id = %account_id, "auth error mid-sweep, invalidating credentials and stopping");
                let _ = self.credential_store.invalidate(account_id).await;
                break;
            }
        }
        outcomes
    }
}
