//! Typed error taxonomy for the sync core.
//!
//! Transport and protocol code returns [`SyncError`] so callers can match on
//! kind rather than string-sniff an `anyhow::Error`. The outermost
//! embedder-facing summary (`reconciler::SessionResult`) still wraps
//! unexpected internal failures in `anyhow::Error` for ad hoc context,
//! mirroring the teacher's own boundary convention.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthErrorKind {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("server requires an app-specific password")]
    AppPasswordRequired,
    #[error("session expired")]
    SessionExpired,
    #[error("account locked")]
    AccountLocked,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkErrorKind {
    #[error("offline or unreachable")]
    Offline,
    #[error("timed out")]
    Timeout,
    #[error("TLS handshake failed")]
    Tls,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerErrorKind {
    #[error("resource not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("conflict")]
    Conflict,
    #[error("rate limited")]
    RateLimited,
    #[error("temporarily unavailable")]
    TemporarilyUnavailable,
    #[error("sync token expired")]
    SyncTokenExpired,
    #[error("not a CalDAV server")]
    NotACalDavServer,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataErrorKind {
    #[error("failed to parse resource body")]
    ParseFailure,
    #[error("resource body too large")]
    TooLarge,
}

/// Top-level error kind for every fallible operation in the core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("auth error: {0}")]
    Auth(#[from] AuthErrorKind),
    #[error("network error: {0}")]
    Network(#[from] NetworkErrorKind),
    #[error("server error ({status}): {kind}")]
    Server {
        status: u16,
        kind: ServerErrorKind,
    },
    #[error("data error: {0}")]
    Data(#[from] DataErrorKind),
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn server(status: u16, kind: ServerErrorKind) -> Self {
        SyncError::Server { status, kind }
    }

    /// Whether retrying the same idempotent request is sound.
    ///
    /// Per §4.A: transient transport errors and 5xx (except 501) are
    /// retryable for idempotent verbs.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(NetworkErrorKind::Offline | NetworkErrorKind::Timeout) => true,
            SyncError::Network(NetworkErrorKind::Tls) => false,
            SyncError::Server { status, kind } => {
                *status != 501
                    && (*status >= 500
                        || matches!(
                            kind,
                            ServerErrorKind::RateLimited | ServerErrorKind::TemporarilyUnavailable
                        ))
            }
            SyncError::Auth(_) => false,
            SyncError::Data(_) => false,
            SyncError::Internal(_) => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
