//! Rule-based retry policy with exponential backoff and jitter.
//!
//! A [`RetryPolicy`] is an immutable set of [`ResponseRule`]s and
//! [`ExceptionRule`]s plus global limits. Each logical call gets its own
//! [`RetryContext`] which tracks how much of each budget has been spent.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::response::Response;
use crate::transport::{TransportError, TransportErrorKind};

/// Default per-rule retry allowance.
pub const DEFAULT_RULE_MAX_RETRIES: u32 = 3;

type SyncPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type AsyncPredicate<T> = Arc<dyn Fn(Arc<T>) -> BoxFuture<'static, bool> + Send + Sync>;

enum Predicate<T> {
    /// Cheap built-in check evaluated in place.
    Inline(fn(&T) -> bool),
    /// User function, run on the blocking pool.
    Blocking(SyncPredicate<T>),
    /// User future.
    Async(AsyncPredicate<T>),
}

impl<T> Clone for Predicate<T> {
    fn clone(&self) -> Self {
        match self {
            Predicate::Inline(f) => Predicate::Inline(*f),
            Predicate::Blocking(f) => Predicate::Blocking(Arc::clone(f)),
            Predicate::Async(f) => Predicate::Async(Arc::clone(f)),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Predicate<T> {
    async fn matches(&self, value: &T) -> bool {
        match self {
            Predicate::Inline(f) => f(value),
            Predicate::Blocking(f) => {
                let f = Arc::clone(f);
                let value = value.clone();
                match tokio::task::spawn_blocking(move || f(&value)).await {
                    Ok(matched) => matched,
                    Err(err) => {
                        warn!(error = %err, "Retry predicate panicked, treating as no match");
                        false
                    }
                }
            }
            Predicate::Async(f) => f(Arc::new(value.clone())).await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Predicate::Inline(_) => "inline",
            Predicate::Blocking(_) => "blocking",
            Predicate::Async(_) => "async",
        }
    }
}

/// Retries a request based on its (non-success) response.
#[derive(Clone)]
pub struct ResponseRule {
    predicate: Predicate<Response>,
    max_retries: u32,
}

impl fmt::Debug for ResponseRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseRule")
            .field("predicate", &self.predicate.kind())
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ResponseRule {
    /// Rule with a synchronous predicate. The predicate runs on the blocking
    /// thread pool so it may do expensive work.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Predicate::Blocking(Arc::new(predicate)),
            max_retries: DEFAULT_RULE_MAX_RETRIES,
        }
    }

    /// Rule with an async predicate.
    pub fn new_async<F, Fut>(predicate: F) -> Self
    where
        F: Fn(Arc<Response>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        Self {
            predicate: Predicate::Async(Arc::new(move |r| predicate(r).boxed())),
            max_retries: DEFAULT_RULE_MAX_RETRIES,
        }
    }

    /// Matches any 5xx response.
    pub fn server_errors() -> Self {
        Self::inline(|r| r.status() >= 500)
    }

    /// Matches HTTP 429 or a `REQUEST_LIMIT_EXCEEDED` error body.
    pub fn rate_limited() -> Self {
        Self::inline(|r| r.status() == 429 || body_has_error_code(r, "REQUEST_LIMIT_EXCEEDED"))
    }

    /// Matches `UNABLE_TO_LOCK_ROW` errors caused by record lock contention.
    pub fn row_lock() -> Self {
        Self::inline(|r| body_has_error_code(r, "UNABLE_TO_LOCK_ROW"))
    }

    fn inline(predicate: fn(&Response) -> bool) -> Self {
        Self {
            predicate: Predicate::Inline(predicate),
            max_retries: DEFAULT_RULE_MAX_RETRIES,
        }
    }

    /// Set how many times this rule may trigger a retry within one call.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    async fn matches(&self, response: &Response) -> bool {
        self.predicate.matches(response).await
    }
}

/// Retries a request after a transport failure.
///
/// The error's kind must be in the rule's kind set (an empty set matches
/// every kind); the optional predicate must then also pass.
#[derive(Clone)]
pub struct ExceptionRule {
    kinds: Vec<TransportErrorKind>,
    predicate: Option<Predicate<TransportError>>,
    max_retries: u32,
}

impl fmt::Debug for ExceptionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionRule")
            .field("kinds", &self.kinds)
            .field("predicate", &self.predicate.as_ref().map(Predicate::kind))
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ExceptionRule {
    /// Rule matching the given transport error kinds.
    pub fn new(kinds: impl IntoIterator<Item = TransportErrorKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            predicate: None,
            max_retries: DEFAULT_RULE_MAX_RETRIES,
        }
    }

    /// Rule matching every transport error kind.
    pub fn any() -> Self {
        Self::new([])
    }

    /// Add a synchronous secondary predicate, run on the blocking pool.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TransportError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Predicate::Blocking(Arc::new(predicate)));
        self
    }

    /// Add an async secondary predicate.
    pub fn with_async_predicate<F, Fut>(mut self, predicate: F) -> Self
    where
        F: Fn(Arc<TransportError>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        self.predicate = Some(Predicate::Async(Arc::new(move |e| predicate(e).boxed())));
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    async fn matches(&self, error: &TransportError) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&error.kind) {
            return false;
        }
        match &self.predicate {
            Some(predicate) => predicate.matches(error).await,
            None => true,
        }
    }
}

fn body_has_error_code(response: &Response, code: &str) -> bool {
    #[derive(serde::Deserialize)]
    struct ErrorEntry {
        #[serde(rename = "errorCode")]
        error_code: String,
    }

    match response.json::<Vec<ErrorEntry>>() {
        Ok(entries) => entries.iter().any(|e| e.error_code == code),
        Err(_) => false,
    }
}

/// Backoff strategy for determining retry delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Constant delay between retries.
    Constant,
    /// Linear increase in delay (delay * attempt).
    Linear,
    /// Exponential increase in delay (delay * factor^attempt).
    Exponential { factor: f64 },
    /// Exponential plus a random amount up to the exponential delay.
    ExponentialWithJitter { factor: f64 },
    /// Uniformly random delay between zero and the exponential delay.
    FullJitter { factor: f64 },
}

impl BackoffStrategy {
    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay(&self, attempt: u32, initial_delay: Duration, max_delay: Duration) -> Duration {
        let max_secs = max_delay.as_secs_f64();
        // Negative or NaN products clamp to zero.
        let clamp = |secs: f64| if secs > 0.0 { secs.min(max_secs) } else { 0.0 };
        let exponential = |factor: f64| clamp(initial_delay.as_secs_f64() * factor.powi(attempt as i32));
        let seconds = |secs: f64| Duration::from_secs_f64(clamp(secs));

        let delay = match self {
            BackoffStrategy::Constant => initial_delay,
            BackoffStrategy::Linear => initial_delay.saturating_mul(attempt.saturating_add(1)),
            BackoffStrategy::Exponential { factor } => seconds(exponential(*factor)),
            BackoffStrategy::ExponentialWithJitter { factor } => {
                let base = exponential(*factor);
                let jitter = rand::rng().random::<f64>() * base;
                seconds(base + jitter)
            }
            BackoffStrategy::FullJitter { factor } => {
                let base = exponential(*factor);
                seconds(rand::rng().random::<f64>() * base)
            }
        };

        std::cmp::min(delay, max_delay)
    }
}

/// Immutable retry policy shared by every call of a client.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    response_rules: Vec<ResponseRule>,
    exception_rules: Vec<ExceptionRule>,
    /// Total retries allowed per call across all rules.
    pub max_retries: u32,
    /// Stop retrying once this much time has passed since the first attempt.
    pub timeout: Option<Duration>,
    /// Backoff strategy to use.
    pub backoff: BackoffStrategy,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Whether to respect Retry-After headers.
    pub respect_retry_after: bool,
    /// Maximum time to wait from Retry-After header.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    /// Retries transient transport failures, 5xx responses, row lock
    /// contention and rate limiting.
    fn default() -> Self {
        Self::new()
            .with_exception_rule(ExceptionRule::new([
                TransportErrorKind::Connect,
                TransportErrorKind::Request,
                TransportErrorKind::Body,
                TransportErrorKind::Other,
            ]))
            .with_response_rule(ResponseRule::server_errors())
            .with_response_rule(ResponseRule::row_lock())
            .with_response_rule(ResponseRule::rate_limited())
    }
}

impl RetryPolicy {
    /// A policy with no rules, 3 total retries and a 60 second timeout.
    pub fn new() -> Self {
        Self {
            response_rules: Vec::new(),
            exception_rules: Vec::new(),
            max_retries: 3,
            timeout: Some(Duration::from_secs(60)),
            backoff: BackoffStrategy::FullJitter { factor: 2.0 },
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            respect_retry_after: true,
            max_retry_after: Duration::from_secs(60),
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::new()
        }
    }

    /// Append a response rule. Rules are evaluated in insertion order.
    pub fn with_response_rule(mut self, rule: ResponseRule) -> Self {
        self.response_rules.push(rule);
        self
    }

    /// Append an exception rule. Rules are evaluated in insertion order.
    pub fn with_exception_rule(mut self, rule: ExceptionRule) -> Self {
        self.exception_rules.push(rule);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn response_rules(&self) -> &[ResponseRule] {
        &self.response_rules
    }

    pub fn exception_rules(&self) -> &[ExceptionRule] {
        &self.exception_rules
    }

    /// Start tracking a new logical call.
    pub fn context(self: &Arc<Self>) -> RetryContext {
        RetryContext::new(Arc::clone(self))
    }

    fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(retry_after) if self.respect_retry_after => {
                std::cmp::min(retry_after, self.max_retry_after)
            }
            _ => self
                .backoff
                .delay(retry.saturating_sub(1), self.initial_delay, self.max_delay),
        }
    }
}

/// Where a logical call is in its retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    Evaluating,
    Retrying,
    Success,
    Exhausted,
}

/// Outcome of evaluating a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`; `attempt` is the 1-based retry number.
    Retry { attempt: u32, delay: Duration },
    /// Give up and surface the failure.
    Exhausted,
}

/// Per-call retry bookkeeping.
#[derive(Debug)]
pub struct RetryContext {
    policy: Arc<RetryPolicy>,
    total: u32,
    response_counts: Vec<u32>,
    exception_counts: Vec<u32>,
    started: Instant,
    state: RetryState,
}

impl RetryContext {
    pub fn new(policy: Arc<RetryPolicy>) -> Self {
        let response_counts = vec![0; policy.response_rules.len()];
        let exception_counts = vec![0; policy.exception_rules.len()];
        Self {
            policy,
            total: 0,
            response_counts,
            exception_counts,
            started: Instant::now(),
            state: RetryState::Attempting,
        }
    }

    /// Retries granted so far.
    pub fn retries(&self) -> u32 {
        self.total
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Retries granted by the response rule at `index`.
    pub fn response_rule_count(&self, index: usize) -> u32 {
        self.response_counts.get(index).copied().unwrap_or(0)
    }

    /// Retries granted by the exception rule at `index`.
    pub fn exception_rule_count(&self, index: usize) -> u32 {
        self.exception_counts.get(index).copied().unwrap_or(0)
    }

    pub fn mark_attempting(&mut self) {
        self.state = RetryState::Attempting;
    }

    pub fn mark_success(&mut self) {
        self.state = RetryState::Success;
    }

    /// Decide whether a failed response should be retried.
    pub async fn evaluate_response(&mut self, response: &Response) -> RetryDecision {
        self.state = RetryState::Evaluating;
        if self.limits_reached() {
            return self.exhaust();
        }

        let policy = Arc::clone(&self.policy);
        for (index, rule) in policy.response_rules.iter().enumerate() {
            if self.response_counts[index] >= rule.max_retries {
                continue;
            }
            if rule.matches(response).await {
                self.response_counts[index] += 1;
                debug!(
                    rule = index,
                    rule_retries = self.response_counts[index],
                    rule_max = rule.max_retries,
                    status = response.status(),
                    "Response rule matched"
                );
                return self.grant(response.retry_after());
            }
        }

        self.exhaust()
    }

    /// Decide whether a transport failure should be retried.
    pub async fn evaluate_error(&mut self, error: &TransportError) -> RetryDecision {
        self.state = RetryState::Evaluating;
        if self.limits_reached() {
            return self.exhaust();
        }

        let policy = Arc::clone(&self.policy);
        for (index, rule) in policy.exception_rules.iter().enumerate() {
            if self.exception_counts[index] >= rule.max_retries {
                continue;
            }
            if rule.matches(error).await {
                self.exception_counts[index] += 1;
                debug!(
                    rule = index,
                    rule_retries = self.exception_counts[index],
                    rule_max = rule.max_retries,
                    error = %error,
                    "Exception rule matched"
                );
                return self.grant(None);
            }
        }

        self.exhaust()
    }

    /// Retry without consulting any rule, still bounded by the global limits.
    pub fn force_retry(&mut self) -> RetryDecision {
        self.state = RetryState::Evaluating;
        if self.limits_reached() {
            return self.exhaust();
        }
        self.grant(None)
    }

    fn limits_reached(&self) -> bool {
        if self.total >= self.policy.max_retries {
            debug!(retries = self.total, "Max retries reached");
            return true;
        }
        if let Some(timeout) = self.policy.timeout {
            if self.started.elapsed() >= timeout {
                debug!(elapsed_ms = self.started.elapsed().as_millis(), "Retry timeout reached");
                return true;
            }
        }
        false
    }

    fn grant(&mut self, retry_after: Option<Duration>) -> RetryDecision {
        self.total += 1;
        self.state = RetryState::Retrying;
        RetryDecision::Retry {
            attempt: self.total,
            delay: self.policy.delay_for(self.total, retry_after),
        }
    }

    fn exhaust(&mut self) -> RetryDecision {
        self.state = RetryState::Exhausted;
        RetryDecision::Exhausted
    }
}
