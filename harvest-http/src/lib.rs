//! Small JSON-over-HTTP client with safe logging and an opt-in retry budget.
//!
//! - Per-request options: headers, [`Auth`], query params, timeout, retries
//! - Secrets never reach the logs: bearer values and sensitive query params are
//!   redacted, only the auth kind is recorded
//! - 429/5xx responses are retried with exponential backoff (honouring
//!   `Retry-After`, capped) when the retry budget allows it; the default
//!   budget is 0
//! - An optional [`RetryGate`] is awaited before every retry, so callers that
//!   pace their requests can pace the retries too
//!
//! ```no_run
//! # async fn demo() -> Result<(), harvest_http::HttpError> {
//! let client = harvest_http::HttpClient::new("https://api.example.com/")?;
//! let got: serde_json::Value = client
//!     .get_json("v1/items", harvest_http::RequestOpts::default())
//!     .await?;
//! # Ok(()) }
//! ```

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

const SNIPPET_MAX: usize = 500;
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
const SECRET_PARAMS: &[&str] = &[
    "access_token",
    "authorization",
    "auth",
    "auth_token",
    "key",
    "api_key",
    "token",
    "secret",
    "client_secret",
    "bearer",
];

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("request build failed: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}, body_snippet: {1}")]
    Decode(String, String),
    #[error("server returned error {status}: {message}, request_id={request_id}")]
    Api {
        status: StatusCode,
        message: String,
        request_id: String,
    },
    #[error("retry not permitted: {0}")]
    RetryDenied(String),
}

pub type GateError = Box<dyn std::error::Error + Send + Sync>;

/// Awaited before each retry attempt is sent. An error abandons the request
/// with [`HttpError::RetryDenied`].
#[async_trait::async_trait]
pub trait RetryGate: Send + Sync {
    async fn before_retry(&self) -> Result<(), GateError>;
}

impl HttpError {
    /// Status code for API errors, `None` for transport/decoding failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Authentication strategies supported by [`HttpClient`].
///
/// ```
/// use harvest_http::Auth;
///
/// let bearer = Auth::Bearer("token");
/// assert_eq!(bearer.kind(), "bearer");
/// assert_eq!(Auth::None.kind(), "none");
/// ```
#[derive(Clone, Debug)]
pub enum Auth<'a> {
    /// `Authorization: Bearer <token>`
    Bearer(&'a str),
    /// Custom header carrying the credential.
    Header {
        name: HeaderName,
        value: HeaderValue,
    },
    None,
}

impl Auth<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Auth::Bearer(_) => "bearer",
            Auth::Header { .. } => "header",
            Auth::None => "none",
        }
    }
}

/// Per-request tuning knobs.
///
/// ```
/// use harvest_http::{Auth, RequestOpts};
/// use std::time::Duration;
///
/// let opts = RequestOpts {
///     timeout: Some(Duration::from_secs(30)),
///     retries: Some(1),
///     auth: Some(Auth::Bearer("demo")),
///     ..Default::default()
/// };
/// assert_eq!(opts.timeout.unwrap().as_secs(), 30);
/// assert!(opts.query.is_none());
/// ```
#[derive(Clone, Debug, Default)]
pub struct RequestOpts<'a> {
    pub timeout: Option<Duration>,
    pub retries: Option<usize>,
    pub auth: Option<Auth<'a>>,
    pub headers: Option<HeaderMap>,
    pub query: Option<Vec<(&'a str, Cow<'a, str>)>>,
}

#[derive(Clone)]
pub struct HttpClient {
    base: Url,
    inner: Client,
    retry_gate: Option<Arc<dyn RetryGate>>,
    pub default_timeout: Duration,
    pub max_retries: usize,
}

impl HttpClient {
    /// Construct a client anchored to a base URL. Relative request paths are
    /// joined onto it, so bases should end with `/`.
    ///
    /// ```
    /// use harvest_http::{HttpClient, HttpError};
    /// use std::time::Duration;
    ///
    /// let client = HttpClient::new("https://api.example.com/")?;
    /// assert_eq!(client.default_timeout, Duration::from_secs(15));
    /// assert_eq!(client.max_retries, 0);
    /// # Ok::<(), HttpError>(())
    /// ```
    pub fn new(base: &str) -> Result<Self, HttpError> {
        let base = Url::parse(base).map_err(|e| HttpError::Url(e.to_string()))?;
        let inner = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| HttpError::Build(e.to_string()))?;
        Ok(Self {
            base,
            inner,
            retry_gate: None,
            default_timeout: Duration::from_secs(15),
            max_retries: 0,
        })
    }

    pub fn with_timeout(mut self, dur: Duration) -> Self {
        self.default_timeout = dur;
        self
    }

    /// Retry budget for 429/5xx and transport failures.
    ///
    /// ```
    /// use harvest_http::{HttpClient, HttpError};
    ///
    /// let client = HttpClient::new("https://api.example.com/")?.with_retries(3);
    /// assert_eq!(client.max_retries, 3);
    /// # Ok::<(), HttpError>(())
    /// ```
    pub fn with_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_retry_gate(mut self, gate: Arc<dyn RetryGate>) -> Self {
        self.retry_gate = Some(gate);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    async fn pass_retry_gate(&self, req_id: &str) -> Result<(), HttpError> {
        let Some(gate) = &self.retry_gate else {
            return Ok(());
        };
        gate.before_retry().await.map_err(|e| {
            tracing::warn!(req_id, error=%e, "http.retry.denied");
            HttpError::RetryDenied(e.to_string())
        })
    }

    /// GET `path` (relative to the base URL) and decode the JSON body.
    pub async fn get_json<T>(&self, path: &str, opts: RequestOpts<'_>) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        let url = self
            .base
            .join(path)
            .map_err(|e| HttpError::Url(e.to_string()))?;
        let bearer = match &opts.auth {
            Some(Auth::Bearer(tok)) => Some(sanitize_token(tok)?),
            _ => None,
        };
        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let max_retries = opts.retries.unwrap_or(self.max_retries);
        let auth_kind = opts.auth.as_ref().map(Auth::kind).unwrap_or("none");
        let req_id = format!("r{}", REQUEST_SEQ.fetch_add(1, Ordering::Relaxed));
        let mut attempt = 0usize;

        loop {
            let mut rb = self
                .inner
                .request(Method::GET, url.clone())
                .timeout(timeout);
            if let Some(q) = &opts.query {
                let pairs: Vec<(&str, &str)> = q.iter().map(|(k, v)| (*k, v.as_ref())).collect();
                rb = rb.query(&pairs);
            }
            if let Some(hdrs) = &opts.headers {
                rb = rb.headers(hdrs.clone());
            }
            if let Some(tok) = &bearer {
                rb = rb.bearer_auth(tok);
            }
            if let Some(Auth::Header { name, value }) = &opts.auth {
                rb = rb.header(name, value);
            }

            tracing::debug!(
                req_id=%req_id,
                attempt=attempt + 1,
                max_retries,
                host_path=%format!("{}{}", url.host_str().unwrap_or("-"), url.path()),
                query=?redact_query(opts.query.as_deref()),
                timeout_ms=timeout.as_millis() as u64,
                auth_kind,
                "http.request.start"
            );

            let started = std::time::Instant::now();
            let sent = match rb.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let headers = resp.headers().clone();
                    resp.bytes().await.map(|b| (status, headers, b))
                }
                Err(err) => Err(err),
            };
            let (status, headers, bytes) = match sent {
                Ok(parts) => parts,
                Err(err) => {
                    let message = err.to_string();
                    if attempt < max_retries {
                        attempt += 1;
                        let delay = backoff(attempt);
                        tracing::warn!(
                            req_id=%req_id,
                            attempt,
                            backoff_ms=delay.as_millis() as u64,
                            message=%message,
                            "http.retrying.network"
                        );
                        sleep(delay).await;
                        self.pass_retry_gate(&req_id).await?;
                        continue;
                    }
                    tracing::warn!(req_id=%req_id, attempt, message=%message, "http.network_error");
                    return Err(HttpError::Network(message));
                }
            };

            let request_id = header_str(&headers, "x-transaction-id")
                .or_else(|| header_str(&headers, "x-request-id"))
                .unwrap_or("-")
                .to_string();
            tracing::debug!(
                req_id=%req_id,
                %status,
                duration_ms=started.elapsed().as_millis() as u64,
                body_len=bytes.len(),
                x_request_id=%request_id,
                rate_limit.limit=?header_str(&headers, "x-rate-limit-limit"),
                rate_limit.remaining=?header_str(&headers, "x-rate-limit-remaining"),
                rate_limit.reset=?header_str(&headers, "x-rate-limit-reset"),
                "http.response.headers"
            );

            if status.is_success() {
                return serde_json::from_slice::<T>(&bytes).map_err(|e| {
                    let snippet = snip_body(&bytes);
                    tracing::warn!(
                        req_id=%req_id,
                        serde_err=%e,
                        body_snippet=%snippet,
                        "http.response.decode_error"
                    );
                    HttpError::Decode(e.to_string(), snippet)
                });
            }

            let message = extract_error_message(&bytes);
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < max_retries {
                attempt += 1;
                let delay = retry_after(&headers).unwrap_or_else(|| {
                    let exp = backoff(attempt);
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        exp.max(Duration::from_millis(1100))
                    } else {
                        exp
                    }
                });
                tracing::warn!(
                    req_id=%req_id,
                    %status,
                    attempt,
                    backoff_ms=delay.as_millis() as u64,
                    message=%message,
                    "http.retrying"
                );
                sleep(delay).await;
                self.pass_retry_gate(&req_id).await?;
                continue;
            }

            tracing::warn!(
                req_id=%req_id,
                %status,
                message=%message,
                x_request_id=%request_id,
                "http.error"
            );
            return Err(HttpError::Api {
                status,
                message,
                request_id,
            });
        }
    }
}

fn backoff(attempt: usize) -> Duration {
    let shift = attempt.saturating_sub(1).min(16) as u32;
    Duration::from_millis(200u64.saturating_mul(1 << shift))
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `Retry-After` in delta-seconds, capped at [`MAX_RETRY_AFTER`].
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, RETRY_AFTER.as_str())?
        .trim()
        .parse()
        .ok()
        .map(|secs| Duration::from_secs(secs).min(MAX_RETRY_AFTER))
}

fn redact_query(query: Option<&[(&str, Cow<'_, str>)]>) -> Vec<(String, String)> {
    query
        .unwrap_or_default()
        .iter()
        .map(|(k, v)| {
            let value = if SECRET_PARAMS.contains(&k.to_ascii_lowercase().as_str()) {
                "<redacted>".to_string()
            } else {
                v.to_string()
            };
            (k.to_string(), value)
        })
        .collect()
}

/// Pull a human-readable message out of common API error envelopes.
fn extract_error_message(body: &[u8]) -> String {
    // {"errors":[{"message":"...", "detail":"...", "title":"..."}]}
    #[derive(Deserialize)]
    struct Errors {
        errors: Vec<Detail>,
    }
    // {"message":"..."} / {"detail":"..."} / {"error":"..."}
    #[derive(Deserialize)]
    struct Detail {
        #[serde(default)]
        message: String,
        #[serde(default)]
        detail: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        error: String,
    }

    fn first_non_empty(d: Detail) -> Option<String> {
        [d.message, d.detail, d.title, d.error]
            .into_iter()
            .find(|s| !s.is_empty())
    }

    if let Ok(env) = serde_json::from_slice::<Errors>(body) {
        if let Some(msg) = env.errors.into_iter().next().and_then(first_non_empty) {
            return msg;
        }
    }
    if let Ok(d) = serde_json::from_slice::<Detail>(body) {
        if let Some(msg) = first_non_empty(d) {
            return msg;
        }
    }
    snip_body(body)
}

fn snip_body(body: &[u8]) -> String {
    let mut snip = String::from_utf8_lossy(body).to_string();
    if snip.len() > SNIPPET_MAX {
        let mut cut = SNIPPET_MAX;
        while !snip.is_char_boundary(cut) {
            cut -= 1;
        }
        snip.truncate(cut);
        snip.push_str("...");
    }
    snip
}

fn sanitize_token(raw: &str) -> Result<String, HttpError> {
    let mut s = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .to_string();
    s.retain(|ch| !ch.is_ascii_whitespace());

    if !s.is_ascii() {
        return Err(HttpError::Build("token contains non-ASCII bytes".into()));
    }
    if s.bytes().any(|b| b < 0x20 || b == 0x7F) {
        return Err(HttpError::Build("token contains control characters".into()));
    }
    HeaderValue::from_str(&format!("Bearer {s}"))
        .map_err(|e| HttpError::Build(format!("invalid Authorization header: {e}")))?;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn sanitize_strips_quotes_and_whitespace() {
        assert_eq!(sanitize_token(" \"abc def\"\n").unwrap(), "abcdef");
        assert!(sanitize_token("tök").is_err());
    }

    #[test]
    fn error_message_prefers_errors_array() {
        let body = br#"{"errors":[{"message":"Rate limit exceeded","code":88}]}"#;
        assert_eq!(extract_error_message(body), "Rate limit exceeded");
        let body = br#"{"detail":"Not Found"}"#;
        assert_eq!(extract_error_message(body), "Not Found");
        assert_eq!(extract_error_message(b"plain text"), "plain text");
    }

    #[test]
    fn secret_query_params_are_redacted() {
        let q = vec![("auth_token", Cow::from("s3cret")), ("count", Cow::from("20"))];
        let redacted = redact_query(Some(&q));
        assert_eq!(redacted[0].1, "<redacted>");
        assert_eq!(redacted[1].1, "20");
    }

    #[test]
    fn retry_after_is_capped() {
        let mut h = HeaderMap::new();
        h.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&h), Some(Duration::from_secs(2)));
        h.insert(RETRY_AFTER, HeaderValue::from_static("86400"));
        assert_eq!(retry_after(&h), Some(MAX_RETRY_AFTER));
        h.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&h), None);
    }

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff(1), Duration::from_millis(200));
        assert_eq!(backoff(2), Duration::from_millis(400));
        assert_eq!(backoff(3), Duration::from_millis(800));
    }

    #[tokio::test]
    async fn get_json_sends_query_and_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/items"))
            .and(query_param("count", "5"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = HttpClient::new(&format!("{}/", server.uri())).unwrap();
        let got: serde_json::Value = client
            .get_json(
                "v1/items",
                RequestOpts {
                    auth: Some(Auth::Bearer("tok")),
                    query: Some(vec![("count", "5".into())]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(got["ok"], true);
    }

    #[tokio::test]
    async fn api_errors_are_not_retried_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_json(serde_json::json!({"errors":[{"message":"slow down"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(&format!("{}/", server.uri())).unwrap();
        let err = client
            .get_json::<serde_json::Value>("x", RequestOpts::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
        assert!(err.to_string().contains("slow down"));
    }

    #[tokio::test]
    async fn server_errors_retry_within_budget() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1, 2])))
            .mount(&server)
            .await;

        let client = HttpClient::new(&format!("{}/", server.uri()))
            .unwrap()
            .with_retries(1);
        let got: Vec<u32> = client.get_json("x", RequestOpts::default()).await.unwrap();
        assert_eq!(got, vec![1, 2]);
    }

    #[derive(Default)]
    struct CountingGate {
        passed: AtomicU64,
        deny: bool,
    }

    #[async_trait::async_trait]
    impl RetryGate for CountingGate {
        async fn before_retry(&self) -> Result<(), GateError> {
            if self.deny {
                return Err("quota exhausted".into());
            }
            self.passed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn unavailable_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).insert_header("retry-after", "0"))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn every_retry_passes_the_gate() {
        let server = unavailable_server().await;
        let gate = Arc::new(CountingGate::default());
        let client = HttpClient::new(&format!("{}/", server.uri()))
            .unwrap()
            .with_retries(3)
            .with_retry_gate(gate.clone());

        let err = client
            .get_json::<serde_json::Value>("x", RequestOpts::default())
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
        assert_eq!(gate.passed.load(Ordering::SeqCst), 3);
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn denied_gate_abandons_the_request() {
        let server = unavailable_server().await;
        let gate = Arc::new(CountingGate {
            deny: true,
            ..Default::default()
        });
        let client = HttpClient::new(&format!("{}/", server.uri()))
            .unwrap()
            .with_retries(3)
            .with_retry_gate(gate);

        let err = client
            .get_json::<serde_json::Value>("x", RequestOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::RetryDenied(ref m) if m == "quota exhausted"));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = HttpClient::new(&format!("{}/", server.uri())).unwrap();
        let err = client
            .get_json::<serde_json::Value>("x", RequestOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Decode(_, ref snip) if snip == "<html>"));
    }
}
