//! CalDAV verb layer (§4.A/§4.B), built on top of [`crate::transport::Transport`].
//! Grounded on the teacher's `CalDavClient` (`propfind`/`report`/`put_if_match`/
//! `delete_if_match`/`mkcalendar`), generalized to route through the typed
//! transport instead of a bare Basic-auth-only Hyper client.

use std::sync::Arc;

use bytes::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Method;

use crate::error::SyncError;
use crate::transport::{RawResponse, Transport};
use crate::xml::request::{
    build_calendar_home_set_body, build_calendar_multiget_body, build_calendar_query_body,
    build_collection_listing_body, build_current_user_principal_body, build_getctag_body,
    build_getetag_body, build_sync_collection_body,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Depth {
    pub fn as_str(self) -> &'static str {
        match self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        }
    }
}

/// A thin, cloneable handle around the shared [`Transport`]. Cheap to clone
/// because it only holds an `Arc`.
#[derive(Clone)]
pub struct CalDavClient {
    transport: Arc<Transport>,
}

fn xml_headers(depth: Option<Depth>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", HeaderValue::from_static("application/xml; charset=utf-8"));
    if let Some(d) = depth {
        headers.insert("Depth", HeaderValue::from_static(d.as_str()));
    }
    headers
}

impl CalDavClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        CalDavClient { transport }
    }

    pub async fn propfind(&self, path: &str, depth: Depth, body: &str) -> Result<RawResponse, SyncError> {
        self.transport
            .request(
                Method::from_bytes(b"PROPFIND").unwrap(),
                path,
                xml_headers(Some(depth)),
                Bytes::from(body.to_string()),
            )
            .await
    }

    pub async fn report(&self, path: &str, depth: Depth, body: &str) -> Result<RawResponse, SyncError> {
        self.transport
            .request(
                Method::from_bytes(b"REPORT").unwrap(),
                path,
                xml_headers(Some(depth)),
                Bytes::from(body.to_string()),
            )
            .await
    }

    pub async fn get(&self, path: &str) -> Result<RawResponse, SyncError> {
        self.transport.request(Method::GET, path, HeaderMap::new(), Bytes::new()).await
    }

    pub async fn options(&self, path: &str) -> Result<RawResponse, SyncError> {
        self.transport.request(Method::OPTIONS, path, HeaderMap::new(), Bytes::new()).await
    }

    pub async fn mkcalendar(&self, path: &str, body: &str) -> Result<RawResponse, SyncError> {
        self.transport
            .request(
                Method::from_bytes(b"MKCALENDAR").unwrap(),
                path,
                xml_headers(None),
                Bytes::from(body.to_string()),
            )
            .await
    }

    pub async fn put(&self, path: &str, body: Bytes, extra: &[(HeaderName, &str)]) -> Result<RawResponse, SyncError> {
        let mut headers = Transport::header_map(extra);
        headers.insert("Content-Type", HeaderValue::from_static("text/calendar; charset=utf-8"));
        self.transport.request(Method::PUT, path, headers, body).await
    }

    pub async fn put_if_match(&self, path: &str, body: Bytes, etag: &str) -> Result<RawResponse, SyncError> {
        self.put(path, body, &[(HeaderName::from_static("if-match"), &format!("\"{etag}\""))])
            .await
    }

    pub async fn put_if_none_match(&self, path: &str, body: Bytes) -> Result<RawResponse, SyncError> {
        self.put(path, body, &[(HeaderName::from_static("if-none-match"), "*")]).await
    }

    pub async fn delete(&self, path: &str) -> Result<RawResponse, SyncError> {
        self.transport.request(Method::DELETE, path, HeaderMap::new(), Bytes::new()).await
    }

    pub async fn delete_if_match(&self, path: &str, etag: &str) -> Result<RawResponse, SyncError> {
        let headers = Transport::header_map(&[(HeaderName::from_static("if-match"), &format!("\"{etag}\""))]);
        self.transport.request(Method::DELETE, path, headers, Bytes::new()).await
    }

    pub async fn current_user_principal(&self, path: &str) -> Result<RawResponse, SyncError> {
        self.propfind(path, Depth::Zero, &build_current_user_principal_body()).await
    }

    pub async fn calendar_home_set(&self, principal_path: &str) -> Result<RawResponse, SyncError> {
        self.propfind(principal_path, Depth::Zero, &build_calendar_home_set_body()).await
    }

    pub async fn list_calendars(&self, home_set_path: &str) -> Result<RawResponse, SyncError> {
        self.propfind(home_set_path, Depth::One, &build_collection_listing_body()).await
    }

    pub async fn getetag(&self, resource_path: &str) -> Result<RawResponse, SyncError> {
        self.propfind(resource_path, Depth::Zero, &build_getetag_body()).await
    }

    pub async fn getctag(&self, calendar_path: &str) -> Result<RawResponse, SyncError> {
        self.propfind(calendar_path, Depth::Zero, &build_getctag_body()).await
    }

    pub async fn calendar_query_timerange(
        &self,
        calendar_path: &str,
        component: &str,
        start: Option<&str>,
        end: Option<&str>,
        include_data: bool,
    ) -> Result<RawResponse, SyncError> {
        let body = build_calendar_query_body(component, start, end, include_data);
        self.report(calendar_path, Depth::One, &body).await
    }

    /// Returns `None` (no request issued) when `hrefs` is empty.
    pub async fn calendar_multiget<I, S>(
        &self,
        calendar_path: &str,
        hrefs: I,
        include_data: bool,
    ) -> Option<Result<RawResponse, SyncError>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let body = build_calendar_multiget_body(hrefs, include_data)?;
        Some(self.report(calendar_path, Depth::One, &body).await)
    }

    pub async fn sync_collection(
        &self,
        calendar_path: &str,
        sync_token: Option<&str>,
        limit: Option<u32>,
        include_data: bool,
    ) -> Result<RawResponse, SyncError> {
        let body = build_sync_collection_body(sync_token, limit, include_data);
        self.report(calendar_path, Depth::One, &body).await
    }

    /// OPTIONS-based capability probe for `sync-collection` support, used as
    /// an ambient availability check alongside the quirks-declared default
    /// (kept from the teacher's `supports_webdav_sync`).
    pub async fn supports_webdav_sync(&self, calendar_path: &str) -> bool {
        if let Ok(resp) = self.options(calendar_path).await {
            if let Some(allow) = resp.headers.get("Allow").and_then(|v| v.to_str().ok()) {
                if allow.to_ascii_uppercase().contains("REPORT") {
                    return true;
                }
            }
        }
        let probe = build_sync_collection_body(None, Some(1), false);
        matches!(self.report(calendar_path, Depth::One, &probe).await, Ok(r) if r.status.is_success() || r.status.as_u16() == 415)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_values_match_webdav_spec() {
        assert_eq!(Depth::Zero.as_str(), "0");
        assert_eq!(Depth::One.as_str(), "1");
        assert_eq!(Depth::Infinity.as_str(), "infinity");
    }
}
