//! Text completion client boundary.
//!
//! The pipeline treats the underlying model as an opaque capability: given
//! a prompt and a temperature, return text or structured JSON, or fail with
//! a transient/permanent error. Everything network-shaped lives behind
//! [`TextCompletionClient`] so the pipeline can be driven by the real
//! Anthropic API in production and by scripted stubs in tests.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::CompletionError;

/// Default per-call timeout when the caller does not override it.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f64,
    /// When set, the client must return [`Completion::Structured`] JSON
    /// conforming to this schema, or fail permanently.
    pub schema: Option<Value>,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn text(prompt: impl Into<String>, temperature: f64) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            schema: None,
            timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }

    pub fn structured(prompt: impl Into<String>, temperature: f64, schema: Value) -> Self {
        Self {
            prompt: prompt.into(),
            temperature,
            schema: Some(schema),
            timeout: DEFAULT_COMPLETION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// What a completion call produced.
#[derive(Debug, Clone)]
pub enum Completion {
    Text(String),
    Structured(Value),
}

impl Completion {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Completion::Text(t) => Some(t),
            Completion::Structured(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Completion::Structured(v) => Some(v),
            Completion::Text(_) => None,
        }
    }
}

/// The opaque text completion capability.
#[async_trait]
pub trait TextCompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError>;
}

/// Exponential backoff with jitter for transient completion failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    /// Adds up to 50% of the computed delay, desynchronizing concurrent
    /// pipelines that trip the same rate limit.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// No retries, for tests and latency-sensitive callers.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64() * self.factor.powi(attempt as i32);
        let with_jitter = if self.jitter {
            use rand::Rng;
            base + rand::thread_rng().gen_range(0.0..base * 0.5)
        } else {
            base
        };
        Duration::from_secs_f64(with_jitter)
    }
}

/// Run a completion call through the retry policy.
///
/// Transient errors back off and retry; permanent errors and exhausted
/// retries propagate to the caller, which rejects the affected stage only.
pub async fn complete_with_retry(
    client: &dyn TextCompletionClient,
    request: CompletionRequest,
    policy: &RetryPolicy,
) -> Result<Completion, CompletionError> {
    let mut attempt = 0u32;
    loop {
        match client.complete(request.clone()).await {
            Ok(completion) => return Ok(completion),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient completion failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Anthropic Messages API client.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: api_key.into(),
            model: "claude-3-haiku-20240307".to_string(),
            max_tokens: 1024,
        }
    }

    /// Read the key from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Self {
        Self::new(std::env::var("ANTHROPIC_API_KEY").unwrap_or_default())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Pull a JSON object out of a text reply, tolerating code fences.
    fn extract_json(text: &str) -> Option<Value> {
        let trimmed = text.trim();
        if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
            return Some(v);
        }
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        serde_json::from_str(&trimmed[start..=end]).ok()
    }
}

#[async_trait]
impl TextCompletionClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CompletionError> {
        if self.api_key.is_empty() {
            return Err(CompletionError::Permanent(
                "ANTHROPIC_API_KEY not set".to_string(),
            ));
        }

        let prompt = match &request.schema {
            Some(schema) => format!(
                "{}\n\nRespond with ONLY a JSON object matching this schema, no prose:\n{}",
                request.prompt, schema
            ),
            None => request.prompt.clone(),
        };

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": prompt}]
        });

        let response = self
            .http
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| CompletionError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CompletionError::Transient(format!(
                "API returned {status}: {detail}"
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CompletionError::Permanent(format!(
                "API returned {status}: {detail}"
            )));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| CompletionError::Transient(format!("malformed response body: {e}")))?;

        let text = json["content"][0]["text"]
            .as_str()
            .ok_or_else(|| CompletionError::Permanent("response missing content text".into()))?;

        if request.schema.is_some() {
            let value = Self::extract_json(text).ok_or_else(|| {
                CompletionError::Permanent("response did not contain the requested JSON".into())
            })?;
            Ok(Completion::Structured(value))
        } else {
            Ok(Completion::Text(text.to_string()))
        }
    }
}

#[cfg(test)]
pub(crate) mod stub {
    //! Scripted completion clients for tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type RouteFn =
        Box<dyn Fn(&CompletionRequest) -> Result<Completion, CompletionError> + Send + Sync>;

    /// Routes each request through a closure, recording every prompt seen.
    pub struct StubClient {
        route: RouteFn,
        pub calls: Mutex<Vec<CompletionRequest>>,
    }

    impl StubClient {
        pub fn new(
            route: impl Fn(&CompletionRequest) -> Result<Completion, CompletionError>
                + Send
                + Sync
                + 'static,
        ) -> Self {
            Self {
                route: Box::new(route),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        /// Synchronous routing core, reusable from other stubs that wrap
        /// this one.
        pub fn route(&self, request: &CompletionRequest) -> Result<Completion, CompletionError> {
            self.calls.lock().unwrap().push(request.clone());
            (self.route)(request)
        }
    }

    #[async_trait]
    impl TextCompletionClient for StubClient {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<Completion, CompletionError> {
            self.route(&request)
        }
    }

    /// Fails transiently `failures` times, then succeeds.
    pub struct FlakyClient {
        failures: usize,
        attempts: AtomicUsize,
        reply: String,
    }

    impl FlakyClient {
        pub fn new(failures: usize, reply: impl Into<String>) -> Self {
            Self {
                failures,
                attempts: AtomicUsize::new(0),
                reply: reply.into(),
            }
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextCompletionClient for FlakyClient {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<Completion, CompletionError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(CompletionError::Transient(format!("flaky failure #{n}")))
            } else {
                Ok(Completion::Text(self.reply.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::stub::*;
    use super::*;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn jitter_stays_within_half_the_base_delay() {
        let policy = RetryPolicy::default();
        for attempt in 0..3 {
            let base = policy.base_delay.as_secs_f64() * policy.factor.powi(attempt);
            let delay = policy.delay_for(attempt as u32).as_secs_f64();
            assert!(delay >= base);
            assert!(delay < base * 1.5);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_until_success() {
        let client = FlakyClient::new(2, "recovered");
        let result = complete_with_retry(
            &client,
            CompletionRequest::text("hello", 0.5),
            &RetryPolicy::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.as_text(), Some("recovered"));
        assert_eq!(client.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_exhausted_after_the_configured_budget() {
        let client = FlakyClient::new(10, "never");
        let err = complete_with_retry(
            &client,
            CompletionRequest::text("hello", 0.5),
            &RetryPolicy::default(),
        )
        .await
        .unwrap_err();

        assert!(err.is_transient());
        // 1 initial attempt + 3 retries
        assert_eq!(client.attempts(), 4);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let client = StubClient::new(|_| Err(CompletionError::Permanent("bad prompt".into())));
        let err = complete_with_retry(
            &client,
            CompletionRequest::text("hello", 0.5),
            &RetryPolicy::default(),
        )
        .await
        .unwrap_err();

        assert!(!err.is_transient());
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn json_extraction_tolerates_code_fences() {
        let wrapped = "```json\n{\"score\": 7}\n```";
        let value = AnthropicClient::extract_json(wrapped).unwrap();
        assert_eq!(value["score"], 7);

        assert!(AnthropicClient::extract_json("no json here").is_none());
    }
}
