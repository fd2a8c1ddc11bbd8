use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

/// How many times a collaborator call is tried and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    /// Total tries including the first; 1 never repeats.
    pub attempts: u32,
    pub first_wait: Duration,
    pub wait_cap: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            attempts: 3,
            first_wait: Duration::from_millis(250),
            wait_cap: Duration::from_secs(2),
        }
    }
}

impl RetrySchedule {
    pub fn single_attempt() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Pause after `tries_made` failed tries. The wait doubles per try; a
    /// server-sent Retry-After replaces it. Both are bounded by `wait_cap`.
    pub fn wait_before(&self, tries_made: u32, server_hint: Option<Duration>) -> Duration {
        let doublings = tries_made.saturating_sub(1).min(16);
        server_hint
            .unwrap_or_else(|| self.first_wait.saturating_mul(1 << doublings))
            .min(self.wait_cap)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-request timeout; each retry gets a fresh one.
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub bearer_token: Option<String>,
    pub retry: RetrySchedule,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: Some("catlink/0.1".to_string()),
            bearer_token: None,
            retry: RetrySchedule::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("no answer from {url}: {source}")]
    Unanswered {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered http status {status}")]
    Rejected {
        url: String,
        status: u16,
        retry_after: Option<Duration>,
    },
    #[error("undecodable response from {url}: {source}")]
    Undecodable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl HttpError {
    /// Throttling, server failures and requests that timed out or never
    /// connected may succeed if asked again. A request that could not even
    /// be built will not.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::Unanswered { source, .. } => !source.is_builder(),
            HttpError::Rejected { status, .. } => *status == 429 || (500..600).contains(status),
            HttpError::Undecodable { .. } => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            HttpError::Rejected { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Run `call` until it succeeds, fails permanently, or the schedule runs out.
async fn with_retries<T, F, Fut>(schedule: RetrySchedule, mut call: F) -> Result<T, HttpError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HttpError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if tries >= schedule.attempts || !err.is_transient() {
            return Err(err);
        }
        let wait = schedule.wait_before(tries, err.retry_after());
        debug!(error = %err, tries, ?wait, "repeating collaborator call");
        tokio::time::sleep(wait).await;
    }
}

/// Seconds form only; HTTP-date hints fall back to the schedule.
fn retry_after_hint(headers: &HeaderMap) -> Option<Duration> {
    let seconds = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

/// Thin JSON client shared by the HTTP source and semantic collaborators.
#[derive(Debug, Clone)]
pub struct JsonHttpClient {
    client: reqwest::Client,
    bearer_token: Option<String>,
    retry: RetrySchedule,
}

impl JsonHttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            bearer_token: config.bearer_token,
            retry: config.retry,
        })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, HttpError> {
        let span = info_span!("http_get_json", url);
        with_retries(self.retry, move || self.exchange(url, self.client.get(url).query(query)))
            .instrument(span)
            .await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, HttpError> {
        let span = info_span!("http_post_json", url);
        with_retries(self.retry, move || self.exchange(url, self.client.post(url).json(body)))
            .instrument(span)
            .await
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, HttpError> {
        let request = match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await.map_err(|source| HttpError::Unanswered {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Rejected {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after: retry_after_hint(response.headers()),
            });
        }
        response.json::<T>().await.map_err(|source| HttpError::Undecodable {
            url: url.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use reqwest::header::HeaderValue;

    fn rejected(status: u16, retry_after: Option<Duration>) -> HttpError {
        HttpError::Rejected {
            url: "http://supplier.test/items".to_string(),
            status,
            retry_after,
        }
    }

    fn instant(attempts: u32) -> RetrySchedule {
        RetrySchedule {
            attempts,
            first_wait: Duration::ZERO,
            wait_cap: Duration::ZERO,
        }
    }

    #[test]
    fn waits_double_until_the_cap_and_follow_server_hints() {
        let schedule = RetrySchedule {
            attempts: 6,
            first_wait: Duration::from_millis(100),
            wait_cap: Duration::from_millis(350),
        };

        assert_eq!(schedule.wait_before(1, None), Duration::from_millis(100));
        assert_eq!(schedule.wait_before(2, None), Duration::from_millis(200));
        assert_eq!(schedule.wait_before(3, None), Duration::from_millis(350));
        assert_eq!(schedule.wait_before(60, None), Duration::from_millis(350));
        assert_eq!(
            schedule.wait_before(1, Some(Duration::from_millis(300))),
            Duration::from_millis(300)
        );
        assert_eq!(schedule.wait_before(1, Some(Duration::from_secs(30))), Duration::from_millis(350));
    }

    #[test]
    fn only_throttling_and_server_failures_are_transient() {
        assert!(rejected(429, None).is_transient());
        assert!(rejected(503, None).is_transient());
        assert!(!rejected(401, None).is_transient());
        assert!(!rejected(404, None).is_transient());
        assert_eq!(rejected(404, None).status(), Some(404));
    }

    #[test]
    fn retry_after_seconds_are_read_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_hint(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 7 "));
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(7)));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"));
        assert_eq!(retry_after_hint(&headers), None);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = with_retries(instant(3), move || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(rejected(503, None)),
                1 => Err(rejected(429, Some(Duration::ZERO))),
                _ => Ok("page"),
            }
        })
        .await
        .expect("third try succeeds");
        assert_eq!(value, "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_and_exhausted_schedules_stop() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = with_retries(instant(5), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(rejected(403, None))
        })
        .await
        .unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = with_retries(instant(2), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(rejected(502, None))
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let counter = AtomicU32::new(0);
        let calls = &counter;
        with_retries(RetrySchedule::single_attempt(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(rejected(503, None))
        })
        .await
        .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
