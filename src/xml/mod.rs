pub mod parse;
pub mod request;

pub use parse::{normalize_etag, parse_multistatus_bytes, DavItem, ParseResult, PrivilegeLevel};
pub use request::{
    build_calendar_home_set_body, build_calendar_multiget_body, build_calendar_query_body,
    build_collection_listing_body, build_current_user_principal_body, build_getctag_body,
    build_getetag_body, build_sync_collection_body, escape_xml,
};
