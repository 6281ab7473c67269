//! Credential store interface (§6, consumed): retrieval, rotation, and
//! invalidation of an account's credentials. The core never persists
//! credentials itself (§5: "credentials value is immutable once bound into
//! a transport instance; rotation produces a new transport").

use async_trait::async_trait;

use crate::config::Credentials;
use crate::error::SyncError;
use crate::model::AccountId;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn fetch(&self, account_id: &AccountId) -> Result<Credentials, SyncError>;

    async fn update(&self, account_id: &AccountId, credentials: Credentials) -> Result<(), SyncError>;

    async fn invalidate(&self, account_id: &AccountId) -> Result<(), SyncError>;
}

/// An in-memory reference implementation for local development and testing
/// (§6.1), grounded on the same `parking_lot::Mutex`-guarded-map pattern as
/// `store::test_support::InMemoryStore`.
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct InMemoryCredentialStore {
        state: Mutex<HashMap<AccountId, Credentials>>,
    }

    impl InMemoryCredentialStore {
        pub fn new() -> Self {
            InMemoryCredentialStore { state: Mutex::new(HashMap::new()) }
        }

        pub fn seed(&self, account_id: AccountId, credentials: Credentials) {
            self.state.lock().insert(account_id, credentials);
        }
    }

    #[async_trait]
    impl CredentialStore for InMemoryCredentialStore {
        async fn fetch(&self, account_id: &AccountId) -> Result<Credentials, SyncError> {
            self.state
                .lock()
                .get(account_id)
                .cloned()
                .ok_or_else(|| SyncError::Internal(format!("no credentials for account {account_id}")))
        }

        async fn update(&self, account_id: &AccountId, credentials: Credentials) -> Result<(), SyncError> {
            self.state.lock().insert(account_id.clone(), credentials);
            Ok(())
        }

        async fn invalidate(&self, account_id: &AccountId) -> Result<(), SyncError> {
            self.state.lock().remove(account_id);
            Ok(())
        }
    }
}
