//! Completion gateway — the contract boundary to the language-model service.
//!
//! Defines the `CompletionGateway` trait the research stages call, the
//! transient-error retry helper used by concrete gateways, and a scripted
//! `MockGateway` for tests.

pub mod openai_compat;

use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::types::{CompletionOutcome, CompletionRequest};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

pub use openai_compat::OpenAiCompatibleGateway;

/// Trait for completion services.
///
/// With `enable_search` set, the implementation is responsible for resolving
/// any search tool use internally. Returning `ToolInvocation` tells the caller
/// that it did not.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Invoke a model and return its content or unresolved tool call.
    async fn invoke(&self, request: CompletionRequest) -> Result<CompletionOutcome, LlmError>;

    /// Human-readable name used in logs.
    fn name(&self) -> &str {
        "gateway"
    }
}

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Retries on `LlmError::RateLimited` (respects `retry_after_secs`), `LlmError::Connection`,
/// and `LlmError::Timeout`. Permanent errors (auth, parse, HTTP 4xx) return immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !is_retryable(&e) || attempt == config.max_retries {
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| LlmError::Connection {
        message: "All retry attempts exhausted".to_string(),
    }))
}

/// Check if an error is retryable (transient).
fn is_retryable(err: &LlmError) -> bool {
    matches!(
        err,
        LlmError::RateLimited { .. } | LlmError::Connection { .. } | LlmError::Timeout { .. }
    )
}

/// Compute backoff delay, respecting rate limit retry-after hints.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &LlmError) -> u64 {
    if let LlmError::RateLimited { retry_after_secs } = err {
        let server_ms = retry_after_secs * 1000;
        return server_ms.max(compute_exponential_backoff(config, attempt));
    }
    compute_exponential_backoff(config, attempt)
}

/// Pure exponential backoff with optional jitter.
fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        // Up to 25% jitter
        let jitter = (capped as f64 * 0.25 * jitter_fraction()) as u64;
        capped + jitter
    } else {
        capped
    }
}

/// Cheap pseudo-random fraction in [0, 1) from the clock.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

type RequestMatcher = Box<dyn Fn(&CompletionRequest) -> bool + Send + Sync>;

struct MockRule {
    matcher: RequestMatcher,
    reply: Result<CompletionOutcome, LlmError>,
}

/// A scripted gateway for tests.
///
/// Rules registered with [`MockGateway::respond_when`] are checked first, in
/// registration order, and answer every matching request. Otherwise queued
/// replies are consumed in FIFO order. Every request is recorded.
pub struct MockGateway {
    rules: Mutex<Vec<MockRule>>,
    queue: Mutex<VecDeque<Result<CompletionOutcome, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a text reply for the next unmatched request.
    pub fn queue_content(&self, text: &str) {
        self.queue_reply(Ok(CompletionOutcome::content(text)));
    }

    /// Queue an error for the next unmatched request.
    pub fn queue_error(&self, error: LlmError) {
        self.queue_reply(Err(error));
    }

    /// Queue any reply for the next unmatched request.
    pub fn queue_reply(&self, reply: Result<CompletionOutcome, LlmError>) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(reply);
    }

    /// Answer every request matching `matcher` with `reply`.
    pub fn respond_when<F>(&self, matcher: F, reply: Result<CompletionOutcome, LlmError>)
    where
        F: Fn(&CompletionRequest) -> bool + Send + Sync + 'static,
    {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(MockRule {
                matcher: Box::new(matcher),
                reply,
            });
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of queued replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionGateway for MockGateway {
    async fn invoke(&self, request: CompletionRequest) -> Result<CompletionOutcome, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        {
            let rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(rule) = rules.iter().find(|r| (r.matcher)(&request)) {
                return rule.reply.clone();
            }
        }

        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Ok(CompletionOutcome::content(
                    "I'm a mock gateway. No scripted replies available.",
                ))
            })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
