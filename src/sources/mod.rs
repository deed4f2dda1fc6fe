//! Shared HTTP plumbing for the openFDA client: the middleware client, retry policy, and body guards.

use std::borrow::Cow;
use std::future::Future;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tracing::warn;

use crate::error::FaersLensError;

pub mod openfda;
pub(crate) mod rate_limit;

const ERROR_BODY_MAX_BYTES: usize = 2048;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

static HTTP_CLIENT: OnceLock<ClientWithMiddleware> = OnceLock::new();

pub(crate) fn env_base(default: &'static str, env_var: &str) -> Cow<'static, str> {
    std::env::var(env_var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(Cow::Owned)
        .unwrap_or_else(|| Cow::Borrowed(default))
}

/// Reads and parses an environment variable, falling back to `default` when unset or unparsable.
pub(crate) fn env_parse<T: FromStr>(env_var: &str, default: T) -> T {
    let Ok(raw) = std::env::var(env_var) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(var = env_var, value = raw.as_str(), "ignoring unparsable setting");
            default
        }
    }
}

/// Bounded retry with exponential backoff for transient backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retrying after `attempt` (0-based). `Retry-After` raises the delay, never lowers it.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        let backoff = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match retry_after {
            Some(floor) if floor > backoff => floor,
            _ => backoff,
        }
    }
}

pub(crate) fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_transient_transport(err: &reqwest_middleware::Error) -> bool {
    match err {
        reqwest_middleware::Error::Reqwest(err) => {
            err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
        }
        reqwest_middleware::Error::Middleware(_) => false,
    }
}

fn parse_retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    // Retry-After is interpreted as integer seconds when present.
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Returns the shared HTTP client with the openFDA rate-limit middleware.
///
/// Timeouts here bound a single HTTP exchange; whole-call deadlines live in the client config.
pub(crate) fn shared_client() -> Result<ClientWithMiddleware, FaersLensError> {
    if let Some(client) = HTTP_CLIENT.get() {
        return Ok(client.clone());
    }

    let base_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("faers-lens/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FaersLensError::HttpClientInit)?;

    let client = ClientBuilder::new(base_client)
        .with(rate_limit::RateLimitMiddleware::new())
        .build();

    match HTTP_CLIENT.set(client.clone()) {
        Ok(()) => Ok(client),
        Err(_) => HTTP_CLIENT
            .get()
            .cloned()
            .ok_or_else(|| FaersLensError::BackendProtocol {
                api: "http-client".into(),
                message: "Shared HTTP client initialization race".into(),
            }),
    }
}

/// Sends a request under `policy`, retrying timeouts, connection failures, 5xx and 429.
///
/// Any other response (success, 404, remaining 4xx) is handed back for the caller to interpret.
/// `build_request` runs once per attempt.
pub(crate) async fn retry_send<F, Fut>(
    api: &str,
    policy: &RetryPolicy,
    build_request: F,
) -> Result<reqwest::Response, FaersLensError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest_middleware::Error>>,
{
    let total_attempts = policy.total_attempts();
    let mut last_reason = String::new();

    for attempt in 0..total_attempts {
        let mut retry_after = None;
        match build_request().await {
            Ok(resp) if is_transient_status(resp.status()) => {
                let status = resp.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    retry_after = parse_retry_after_header(resp.headers());
                }
                last_reason = format!("HTTP {status}");
            }
            Ok(resp) => return Ok(resp),
            Err(err) if is_transient_transport(&err) => {
                last_reason = err.to_string();
            }
            Err(err) => {
                return Err(FaersLensError::BackendUnavailable {
                    api: api.to_string(),
                    attempts: attempt + 1,
                    reason: err.to_string(),
                });
            }
        }

        if attempt + 1 < total_attempts {
            let delay = policy.delay_for(attempt, retry_after);
            warn!(
                source = api,
                attempt = attempt + 1,
                reason = last_reason.as_str(),
                delay_ms = delay.as_millis() as u64,
                "transient backend failure; retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(FaersLensError::BackendUnavailable {
        api: api.to_string(),
        attempts: total_attempts,
        reason: last_reason,
    })
}

pub(crate) fn body_excerpt(bytes: &[u8]) -> String {
    let full = String::from_utf8_lossy(bytes);

    let truncated: &str = if full.len() > ERROR_BODY_MAX_BYTES {
        let mut end = ERROR_BODY_MAX_BYTES;
        while end > 0 && !full.is_char_boundary(end) {
            end -= 1;
        }
        &full[..end]
    } else {
        full.as_ref()
    };

    let mut s = truncated.trim().replace(['\n', '\r', '\t'], " ");
    if full.len() > ERROR_BODY_MAX_BYTES {
        s.push_str(" …");
    }
    s
}

pub(crate) fn ensure_json_content_type(
    api: &str,
    content_type: Option<&HeaderValue>,
    body: &[u8],
) -> Result<(), FaersLensError> {
    let Some(content_type) = content_type else {
        return Ok(());
    };

    let raw = match content_type.to_str() {
        Ok(v) => v.trim(),
        Err(_) => {
            warn!(
                source = api,
                "Response content-type header was not valid UTF-8; attempting JSON parse"
            );
            return Ok(());
        }
    };
    if raw.is_empty() {
        return Ok(());
    }

    let media_type = raw
        .split(';')
        .next()
        .map(str::trim)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let is_html = matches!(media_type.as_str(), "text/html" | "application/xhtml+xml");
    if is_html {
        return Err(FaersLensError::BackendProtocol {
            api: api.to_string(),
            message: format!(
                "Unexpected HTML response (content-type: {raw}): {}",
                body_excerpt(body)
            ),
        });
    }

    let is_json = media_type == "application/json"
        || media_type == "text/json"
        || media_type.ends_with("+json");
    if !is_json {
        warn!(
            source = api,
            content_type = raw,
            "Unexpected non-JSON content type; attempting JSON parse for compatibility"
        );
    }

    Ok(())
}

pub(crate) async fn read_limited_body(
    mut resp: reqwest::Response,
    api: &str,
) -> Result<Vec<u8>, FaersLensError> {
    let mut body: Vec<u8> = Vec::new();

    loop {
        let chunk = resp
            .chunk()
            .await
            .map_err(|err| FaersLensError::BackendUnavailable {
                api: api.to_string(),
                attempts: 1,
                reason: format!("reading response body: {err}"),
            })?;
        let Some(chunk) = chunk else {
            break;
        };
        let next_len = body.len().saturating_add(chunk.len());
        if next_len > DEFAULT_MAX_BODY_BYTES {
            return Err(FaersLensError::BackendProtocol {
                api: api.to_string(),
                message: format!("Response body exceeded {DEFAULT_MAX_BODY_BYTES} bytes"),
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn ensure_json_content_type_rejects_html() {
        let err = ensure_json_content_type(
            "openfda",
            Some(&HeaderValue::from_static("text/html; charset=utf-8")),
            b"<html><body>upstream error</body></html>",
        )
        .expect_err("html should be rejected");
        assert!(matches!(err, FaersLensError::BackendProtocol { .. }));
        assert!(err.to_string().contains("HTML"));
    }

    #[test]
    fn ensure_json_content_type_accepts_json() {
        let ok = ensure_json_content_type(
            "openfda",
            Some(&HeaderValue::from_static("application/json; charset=utf-8")),
            b"{\"ok\":true}",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn ensure_json_content_type_allows_non_json_compat_mode() {
        let ok = ensure_json_content_type(
            "openfda",
            Some(&HeaderValue::from_static("text/plain")),
            b"{\"ok\":true}",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn parse_retry_after_header_parses_integer_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(
            parse_retry_after_header(&headers),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn retry_policy_backs_off_exponentially_up_to_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.total_attempts(), 4);
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, None), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10, None), Duration::from_secs(5));
    }

    #[test]
    fn retry_policy_uses_retry_after_as_floor() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(
            policy.delay_for(2, Some(Duration::from_millis(100))),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn transient_statuses_are_5xx_and_rate_limit_only() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }

    async fn send_counting(
        url: String,
        attempts: Arc<AtomicUsize>,
    ) -> Result<reqwest::Response, reqwest_middleware::Error> {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst);
        let client = ClientBuilder::new(reqwest::Client::new()).build();
        client
            .get(&url)
            .query(&[("attempt", attempt.to_string())])
            .send()
            .await
    }

    #[tokio::test]
    async fn retry_send_retries_on_too_many_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/retry"))
            .and(query_param("attempt", "0"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/retry"))
            .and(query_param("attempt", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/retry", server.uri());
        let attempts = Arc::new(AtomicUsize::new(0));
        let resp = retry_send("test-api", &fast_policy(2), || {
            send_counting(url.clone(), attempts.clone())
        })
        .await
        .expect("retry_send should retry on 429");

        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_send_gives_up_after_policy_bound() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let url = format!("{}/down", server.uri());
        let attempts = Arc::new(AtomicUsize::new(0));
        let err = retry_send("test-api", &fast_policy(2), || {
            send_counting(url.clone(), attempts.clone())
        })
        .await
        .expect_err("502 should exhaust retries");

        assert!(matches!(
            err,
            FaersLensError::BackendUnavailable { attempts: 3, .. }
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_send_returns_client_errors_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/bad", server.uri());
        let attempts = Arc::new(AtomicUsize::new(0));
        let resp = retry_send("test-api", &fast_policy(3), || {
            send_counting(url.clone(), attempts.clone())
        })
        .await
        .expect("400 is returned to the caller");

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
