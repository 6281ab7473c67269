//! Ambient configuration structs (§2.1 / §9 "ambient-stack design
//! decisions"). Plain `Copy` structs with literal `Default` impls matching
//! the constants named throughout §4, in the teacher's
//! constructor-with-sane-defaults style rather than an external config file
//! format.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub retry_base_delay: Duration,
    pub retry_factor: u32,
    pub retry_jitter: f64,
    pub retry_cap: Duration,
    pub max_retries: u32,
    pub max_redirects: u32,
    pub trust_insecure: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(60),
            retry_base_delay: Duration::from_millis(250),
            retry_factor: 2,
            retry_jitter: 0.20,
            retry_cap: Duration::from_secs(8),
            max_retries: 3,
            max_redirects: 5,
            trust_insecure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PullConfig {
    /// Batch size for calendar-multiget; overridden per-quirk.
    pub default_batch_size: usize,
    /// Fan-out concurrency for single-href fallback (§4.F/§9 default 4).
    pub single_href_concurrency: usize,
    /// Past window in days (§4.F default 365).
    pub past_window_days: i64,
}

impl Default for PullConfig {
    fn default() -> Self {
        PullConfig {
            default_batch_size: 50,
            single_href_concurrency: 4,
            past_window_days: 365,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PushConfig {
    /// §4.G: after this many attempts an op becomes SYNC_ERROR.
    pub max_attempts: u32,
    /// §4.I/§9 open question: 412-retry cap (initial + 1 retry).
    pub max_conflict_retries: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        PushConfig {
            max_attempts: 5,
            max_conflict_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// §5: session-wide timeout, default 10 minutes.
    pub session_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            session_timeout: Duration::from_secs(10 * 60),
        }
    }
}

/// Credentials bound into one transport instance (§5: "immutable once bound;
/// rotation produces a new transport").
#[derive(Clone)]
pub enum Credentials {
    None,
    Basic { username: String, password: String },
    Digest { username: String, password: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => write!(f, "Credentials::None"),
            Credentials::Basic { username, .. } => {
                write!(f, "Credentials::Basic {{ username: {username:?}, password: \"***\" }}")
            }
            Credentials::Digest { username, .. } => {
                write!(f, "Credentials::Digest {{ username: {username:?}, password: \"***\" }}")
            }
        }
    }
}
