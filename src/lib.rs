//! CalDAV synchronization engine.
//!
//! Bidirectional reconciler between a local event store and a CalDAV server
//! (iCloud, Nextcloud, Baikal, SOGo, Radicale, Zoho, Open-Xchange, Stalwart,
//! mailbox.org and RFC-4791-generic servers). Built on hyper 1.x, rustls, and
//! tokio.
//!
//! # Layout
//!
//! - [`transport`] — authenticated HTTP/1.1+HTTP/2 client with retry/backoff
//!   and Digest/Basic auth (§4.A).
//! - [`caldav`] — the CalDAV verb layer (PROPFIND/REPORT/PUT/DELETE/MKCALENDAR).
//! - [`xml`] — request body builders and the multistatus parser (§4.B).
//! - [`quirks`] — the per-provider-family quirks registry (§4.C).
//! - [`discovery`] — principal/calendar-home/collection discovery (§4.D).
//! - [`detector`] — change detection: ctag/sync-token/etag-range/full-resync
//!   (§4.E).
//! - [`fingerprint`] — content fingerprinting and conflict arbitration (§4.F/§4.I).
//! - [`pull`] — the pull pipeline (§4.F).
//! - [`push`] — the push pipeline (§4.G).
//! - [`reconciler`] — the top-level session state machine (§4.H).
//! - [`interfaces`] — traits this engine consumes from its host application
//!   (§6), plus in-memory reference implementations for tests.
//! - [`scheduler`] and [`account`] — the engine's exposed interface (§6).
//! - [`model`] — shared data model (§3).
//! - [`config`] — tunables for transport, pull, push and session behavior.
//! - [`error`] — the typed error taxonomy (§7).

pub mod account;
pub mod caldav;
pub mod common;
pub mod config;
pub mod detector;
pub mod discovery;
pub mod error;
pub mod fingerprint;
pub mod interfaces;
pub mod model;
pub mod pull;
pub mod push;
pub mod quirks;
pub mod reconciler;
pub mod scheduler;
pub mod transport;
pub mod xml;

pub use caldav::{CalDavClient, Depth};
pub use config::{Credentials, PullConfig, PushConfig, SessionConfig, TransportConfig};
pub use error::{Result, SyncError};
pub use model::{Account, Calendar, Event, ProviderFamily};
pub use reconciler::{Reconciler, SessionOutcome};
pub use transport::Transport;
