//! HTTP round trips with retry, decoration, and header ingestion.
//!
//! Two policies live here. Coordinator calls (`/v1/statement` and its
//! continuation pages) retry transient gateway statuses indefinitely with
//! golden-ratio backoff, honoring the statement deadline and cancel token,
//! and feed 200-response headers back into the connection session state.
//! Segment fetches retry at most five times and also retry network
//! timeouts, since spooled segments are served by object stores rather than
//! the coordinator.

use crate::auth::{AuthProvider, RequestDecorator};
use crate::cancel::CancelToken;
use crate::error::{Result, TrinoLinkError};
use crate::session::SessionHeaders;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Backoff growth factor between retries.
const GOLDEN_RATIO: f64 = 1.618033988749895;

/// First retry delay for coordinator calls.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Retry delays are capped here.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(15);

/// First retry delay for segment fetches.
const SEGMENT_INITIAL_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Maximum retries for one segment fetch.
const SEGMENT_MAX_RETRIES: u32 = 5;

/// At most this much of an error response body is kept as the failure
/// reason.
const MAX_ERROR_BODY_BYTES: usize = 8 * 1024;

fn is_transient(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

fn grow_delay(delay: Duration) -> Duration {
    Duration::from_secs_f64((delay.as_secs_f64() * GOLDEN_RATIO).min(MAX_RETRY_DELAY.as_secs_f64()))
}

/// Shared per-connection transport: the HTTP client, the session header
/// state, and the authentication layers.
pub(crate) struct Transport {
    http: reqwest::Client,
    session: Mutex<SessionHeaders>,
    auth: AuthProvider,
    decorator: Option<Arc<dyn RequestDecorator>>,
}

impl Transport {
    pub fn new(
        http: reqwest::Client,
        session: SessionHeaders,
        auth: AuthProvider,
        decorator: Option<Arc<dyn RequestDecorator>>,
    ) -> Self {
        Self {
            http,
            session: Mutex::new(session),
            auth,
            decorator,
        }
    }

    /// Snapshot the current values of one session header.
    pub fn session_values(&self, name: &str) -> Vec<String> {
        self.session
            .lock()
            .expect("session lock poisoned")
            .values(name)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Issue a coordinator request, retrying transient gateway failures
    /// until the deadline or cancellation. On 200 the response headers are
    /// ingested into the session state before the response is returned.
    pub async fn round_trip(
        &self,
        method: Method,
        url: &str,
        body: Option<String>,
        override_headers: &[(String, String)],
        cancel: &CancelToken,
        deadline: Instant,
    ) -> Result<reqwest::Response> {
        let host = host_of(url);
        let mut delay = INITIAL_RETRY_DELAY;
        loop {
            if cancel.is_cancelled() {
                return Err(TrinoLinkError::Cancelled);
            }

            let request = self.build_request(&method, url, body.clone(), override_headers, &host)?;
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TrinoLinkError::Cancelled),
                outcome = tokio::time::timeout_at(deadline, request.send()) => match outcome {
                    Err(_) => return Err(TrinoLinkError::Timeout(format!(
                        "query deadline elapsed during {} {}", method, url
                    ))),
                    Ok(Err(e)) => return Err(e.into()),
                    Ok(Ok(response)) => response,
                },
            };

            let status = response.status();
            if status == StatusCode::OK {
                self.session
                    .lock()
                    .expect("session lock poisoned")
                    .ingest(response.headers())?;
                return Ok(response);
            }
            if is_transient(status) {
                debug!(
                    "[TRANSPORT] transient status {} from {}, retrying in {:?}",
                    status, url, delay
                );
                drop(response);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(TrinoLinkError::Cancelled),
                }
                delay = grow_delay(delay);
                continue;
            }
            return Err(error_from_response(response).await);
        }
    }

    fn build_request(
        &self,
        method: &Method,
        url: &str,
        body: Option<String>,
        override_headers: &[(String, String)],
        host: &str,
    ) -> Result<reqwest::RequestBuilder> {
        let mut headers = HeaderMap::new();
        {
            let session = self.session.lock().expect("session lock poisoned");
            for (name, value) in session.entries() {
                headers.append(header_name(name)?, header_value(value)?);
            }
        }
        // Per-call headers replace the connection values for their name.
        let mut replaced: HashSet<&str> = HashSet::new();
        for (name, value) in override_headers {
            let parsed = header_name(name)?;
            if replaced.insert(name.as_str()) {
                headers.remove(&parsed);
            }
            headers.append(parsed, header_value(value)?);
        }

        let mut request = self.http.request(method.clone(), url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }
        if let Some(decorator) = &self.decorator {
            request = decorator.decorate(host, request)?;
        }
        Ok(self.auth.apply_to_request(request))
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TrinoLinkError::Configuration(format!("invalid header name: {}", name)))
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| TrinoLinkError::Configuration(format!("invalid header value for: {}", value)))
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Map a non-200, non-transient response to a query-failed error carrying
/// up to 8 KiB of the body as the reason.
async fn error_from_response(response: reqwest::Response) -> TrinoLinkError {
    let status_code = response.status().as_u16();
    let content_length = response.content_length();
    match response.bytes().await {
        Err(e) => TrinoLinkError::QueryFailed {
            status_code,
            reason: e.to_string(),
        },
        Ok(bytes) => {
            let truncated = bytes.len() > MAX_ERROR_BODY_BYTES
                || content_length.is_some_and(|l| l as usize > MAX_ERROR_BODY_BYTES);
            let kept = &bytes[..bytes.len().min(MAX_ERROR_BODY_BYTES)];
            let mut reason = String::from_utf8_lossy(kept).into_owned();
            if truncated {
                reason.push_str("...");
            }
            TrinoLinkError::QueryFailed {
                status_code,
                reason,
            }
        }
    }
}

/// Fetch round trip for spooled segments: bounded retries with the same
/// golden-ratio growth, also retrying network timeouts. No session state is
/// involved; only the headers from the segment descriptor are sent.
pub(crate) async fn segment_round_trip(
    http: &reqwest::Client,
    url: &str,
    headers: &[(String, String)],
    cancel: &CancelToken,
) -> Result<reqwest::Response> {
    let mut delay = SEGMENT_INITIAL_RETRY_DELAY;
    let mut retries: u32 = 0;
    loop {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            header_map.append(header_name(name)?, header_value(value)?);
        }
        let request = http.get(url).headers(header_map);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TrinoLinkError::Cancelled),
            outcome = request.send() => outcome,
        };

        match outcome {
            Err(e) if e.is_timeout() => {
                retries += 1;
                if retries > SEGMENT_MAX_RETRIES {
                    return Err(TrinoLinkError::QueryFailed {
                        status_code: 0,
                        reason: format!("max retries reached: {}", e),
                    });
                }
                warn!(
                    "[SPOOLING] timeout fetching segment from {}, retry {}/{}",
                    url, retries, SEGMENT_MAX_RETRIES
                );
                delay = grow_delay(delay);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(TrinoLinkError::Cancelled),
                }
            }
            Err(e) => return Err(e.into()),
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::OK {
                    return Ok(response);
                }
                if is_transient(status) {
                    drop(response);
                    retries += 1;
                    if retries > SEGMENT_MAX_RETRIES {
                        return Err(TrinoLinkError::QueryFailed {
                            status_code: status.as_u16(),
                            reason: format!("max retries reached for status code {}", status),
                        });
                    }
                    delay = grow_delay(delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(TrinoLinkError::Cancelled),
                    }
                    continue;
                }
                return Err(error_from_response(response).await);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_growth_is_capped() {
        let mut delay = INITIAL_RETRY_DELAY;
        for _ in 0..3 {
            delay = grow_delay(delay);
        }
        // 100ms * φ^3 ≈ 423ms
        assert!(delay > Duration::from_millis(420) && delay < Duration::from_millis(426));

        for _ in 0..20 {
            delay = grow_delay(delay);
        }
        assert_eq!(delay, MAX_RETRY_DELAY);
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_transient(StatusCode::OK));
        assert!(!is_transient(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_transient(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("http://coordinator:8080/v1/statement"), "coordinator");
        assert_eq!(host_of("not a url"), "");
    }
}
