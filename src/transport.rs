//! HTTP transport (§4.A): a single authenticated HTTP/1.1+HTTP/2 client
//! bound to one immutable [`Credentials`] value (§5: "rotation produces a
//! new transport"). Generalizes the teacher's `caldav::client::CalDavClient`
//! `send`/`send_stream`/`build_uri` into a standalone transport that adds
//! Digest auth, redirect handling restricted to idempotent verbs, and
//! jittered retry-with-backoff.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Method, Request, StatusCode, Uri};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::common::compression::{
    add_accept_encoding, decompress_body, detect_encoding,
};
use crate::common::http::{build_hyper_client, HyperClient};
use crate::config::{Credentials, TransportConfig};
use crate::error::{NetworkErrorKind, ServerErrorKind, SyncError};

/// A raw transport response: status, headers, and the fully-decompressed
/// body. Callers decide how to parse it (§4.A: "the caller decides").
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub fn etag_header(&self) -> Option<String> {
        self.headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

struct DigestState {
    prompt: digest_auth::WwwAuthenticateHeader,
}

pub struct Transport {
    base: Uri,
    client: HyperClient,
    credentials: Credentials,
    config: TransportConfig,
    digest_state: Mutex<Option<DigestState>>,
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        method.as_str(),
        "GET" | "HEAD" | "PUT" | "DELETE" | "OPTIONS" | "PROPFIND" | "REPORT"
    )
}

fn is_conditional_write(headers: &HeaderMap) -> bool {
    headers.contains_key("If-Match") || headers.contains_key("If-None-Match")
}

/// Retry eligibility (§4.A): PUT and DELETE are only safe to re-issue when
/// they carry a precondition (`If-Match` or `If-None-Match: *`); every other
/// idempotent verb is retryable unconditionally. Distinct from
/// [`is_idempotent`], which also governs redirect-following and has no such
/// carve-out.
fn is_retry_eligible(method: &Method, headers: &HeaderMap) -> bool {
    match method.as_str() {
        "PUT" | "DELETE" => is_conditional_write(headers),
        _ => is_idempotent(method),
    }
}

impl Transport {
    pub fn new(base_url: &str, credentials: Credentials, config: TransportConfig) -> anyhow::Result<Arc<Self>> {
        let base: Uri = base_url.parse()?;
        let client = build_hyper_client(config.trust_insecure)?;
        Ok(Arc::new(Transport {
            base,
            client,
            credentials,
            config,
            digest_state: Mutex::new(None),
        }))
    }

    pub fn build_uri(&self, path_or_url: &str) -> anyhow::Result<Uri> {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            return Ok(path_or_url.parse()?);
        }
        let base = url::Url::parse(&self.base.to_string())?;
        let joined = base.join(path_or_url)?;
        Ok(joined.as_str().parse()?)
    }

    fn basic_auth_header(username: &str, password: &str) -> HeaderValue {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        HeaderValue::from_str(&format!("Basic {encoded}")).expect("ascii header value")
    }

    fn digest_auth_header(&self, method: &Method, uri: &Uri, username: &str, password: &str) -> Option<HeaderValue> {
        let http_method = digest_auth::HttpMethod::from(method.as_str());
        let mut guard = self.digest_state.lock();
        let state = guard.as_mut()?;
        let context = digest_auth::AuthContext::new_with_method(username, password, uri.path(), http_method);
        let answer = state.prompt.respond(&context).ok()?;
        HeaderValue::from_str(&answer.to_string()).ok()
    }

    async fn send_once(
        &self,
        method: Method,
        uri: Uri,
        mut headers: HeaderMap,
        body: Bytes,
    ) -> Result<RawResponse, SyncError> {
        match &self.credentials {
            Credentials::None => {}
            Credentials::Basic { username, password } => {
                headers.insert(
                    header::AUTHORIZATION,
                    Self::basic_auth_header(username, password),
                );
            }
            Credentials::Digest { username, password } => {
                if let Some(h) = self.digest_auth_header(&method, &uri, username, password) {
                    headers.insert(header::AUTHORIZATION, h);
                }
            }
        }
        add_accept_encoding(&mut headers);

        let mut builder = Request::builder().method(method.clone()).uri(uri.clone());
        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Full::new(body))
            .map_err(|_| SyncError::Internal("malformed request".to_string()))?;

        let timeout = self.config.read_timeout;
        let response = tokio::time::timeout(timeout, self.client.request(request))
            .await
            .map_err(|_| SyncError::Network(NetworkErrorKind::Timeout))?
            .map_err(|_| SyncError::Network(NetworkErrorKind::Offline))?;

        let status = response.status();
        let resp_headers = response.headers().clone();

        if status == StatusCode::UNAUTHORIZED {
            if let Credentials::Digest { .. } = &self.credentials {
                if let Some(www_auth) = resp_headers
                    .get(header::WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                {
                    if let Ok(prompt) = digest_auth::parse(www_auth) {
                        *self.digest_state.lock() = Some(DigestState { prompt });
                        // signal caller to retry with the now-primed challenge
                        return Err(SyncError::server(401, ServerErrorKind::Forbidden));
                    }
                }
            }
        }

        let encoding = detect_encoding(&resp_headers);
        let body_bytes = decompress_body(response.into_body(), encoding)
            .await
            .map_err(|_| SyncError::Data(crate::error::DataErrorKind::ParseFailure))?;

        Ok(RawResponse {
            status,
            headers: resp_headers,
            body: body_bytes,
        })
    }

    fn classify_status(status: StatusCode) -> Option<SyncError> {
        match status.as_u16() {
            200..=299 | 300..=399 => None,
            401 => Some(SyncError::Auth(crate::error::AuthErrorKind::InvalidCredentials)),
            403 => Some(SyncError::server(403, ServerErrorKind::Forbidden)),
            404 => Some(SyncError::server(404, ServerErrorKind::NotFound)),
            409 => Some(SyncError::server(409, ServerErrorKind::Conflict)),
            429 => Some(SyncError::server(429, ServerErrorKind::RateLimited)),
            s if (500..600).contains(&s) => Some(SyncError::server(s, ServerErrorKind::TemporarilyUnavailable)),
            _ => None,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_delay.as_millis() as f64;
        let factor = self.config.retry_factor as f64;
        let raw = base * factor.powi(attempt as i32);
        let capped = raw.min(self.config.retry_cap.as_millis() as f64);
        let jitter_span = capped * self.config.retry_jitter;
        let jitter = rand::thread_rng().gen_range(-jitter_span..=jitter_span);
        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Issue a request, following redirects (idempotent verbs only, at most
    /// `max_redirects` hops) and retrying transient failures (§4.A).
    pub async fn request(
        &self,
        method: Method,
        path_or_url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<RawResponse, SyncError> {
        let mut uri = self
            .build_uri(path_or_url)
            .map_err(|_| SyncError::Internal("invalid URL".to_string()))?;
        let mut redirects = 0u32;
        let mut attempt = 0u32;
        let retryable_verb = is_retry_eligible(&method, &headers);

        loop {
            let result = self.send_once(method.clone(), uri.clone(), headers.clone(), body.clone()).await;

            match result {
                Ok(resp) if resp.status.is_redirection() && is_idempotent(&method) => {
                    if redirects >= self.config.max_redirects {
                        return Ok(resp);
                    }
                    if let Some(location) = resp.headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) {
                        uri = self
                            .build_uri(location)
                            .map_err(|_| SyncError::Internal("invalid redirect location".to_string()))?;
                        redirects += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Ok(resp) => {
                    if let Some(err) = Self::classify_status(resp.status) {
                        if err.is_retryable() && retryable_verb && attempt < self.config.max_retries {
                            warn!(status = %resp.status, attempt, "retrying after server error");
                            tokio::time::sleep(self.backoff_delay(attempt)).await;
                            attempt += 1;
                            continue;
                        }
                    }
                    return Ok(resp);
                }
                Err(SyncError::Server { status: 401, .. }) => {
                    // Digest challenge just primed; replay once without
                    // counting against the retry budget.
                    if attempt == 0 {
                        attempt += 1;
                        continue;
                    }
                    return Err(SyncError::Auth(crate::error::AuthErrorKind::InvalidCredentials));
                }
                Err(err) => {
                    if err.is_retryable() && retryable_verb && attempt < self.config.max_retries {
                        debug!(attempt, "retrying after transient transport error");
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    pub fn header_map(pairs: &[(HeaderName, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name.clone(), v);
            }
        }
        headers
    }
}
