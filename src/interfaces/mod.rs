//! External interfaces (§6): the boundary between this core and the host
//! application. The core consumes a [`store::LocalStore`], an
//! [`occurrence::OccurrenceEngine`], an [`ics::IcsCodec`] and a
//! [`credentials::CredentialStore`]; it exposes a scheduler and account
//! lifecycle (see [`crate::scheduler`], [`crate::account`]).
//!
//! §6.1: in-memory reference implementations of the consumed interfaces
//! live under `store::test_support` and as [`occurrence::SingleOccurrenceEngine`],
//! for local development and testing without a real host application.

pub mod credentials;
pub mod ics;
pub mod occurrence;
pub mod store;

pub use credentials::CredentialStore;
pub use ics::{IcalComponent, IcsCodec};
pub use occurrence::{OccurrenceEngine, OccurrenceWindow};
pub use store::LocalStore;
