//! ICS interface (§6, consumed): `parse(bytes) -> [iCalComponent]` and
//! `serialize(event, exceptions) -> bytes`. The core never inspects
//! interior iCalendar text — it forwards bytes verbatim to this interface
//! and only reads back structured fields.

use crate::error::SyncError;
use crate::model::Event;

/// One parsed iCalendar VEVENT component: either a recurrence master or an
/// exception (identified by a present `recurrence_id`). A single `.ics`
/// resource may parse into several of these sharing a UID (§4.F step 2).
#[derive(Debug, Clone, PartialEq)]
pub struct IcalComponent {
    pub event: Event,
}

pub trait IcsCodec: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Vec<IcalComponent>, SyncError>;

    fn serialize(&self, event: &Event, exceptions: &[Event]) -> Result<Vec<u8>, SyncError>;
}
