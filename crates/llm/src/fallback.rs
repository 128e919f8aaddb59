//! Provider Fallback Chain
//!
//! Runs a plan request against an ordered list of planners. Each planner is
//! retried `retries_per_provider` times on transient failures before the chain
//! falls through to the next one. Cancellation never falls back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::plan::{PlanOutcome, PlanRequest, Planner};
use crate::rate_limit::RateLimiterRegistry;
use crate::error::{LlmError, LlmResult};
use pixlie_core::streaming::ProviderEvent;

/// Capacity of the per-attempt event channel.
const ATTEMPT_CHANNEL_CAPACITY: usize = 64;

/// Reasons a provider attempt can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Provider is not reachable or misconfigured
    Unavailable,
    /// Attempt timed out
    Timeout,
    /// Provider returned an error
    Error,
    /// Rate limited
    RateLimited,
    /// Network/connection error
    NetworkError,
    /// Invalid response
    InvalidResponse,
    /// Credentials rejected
    Authentication,
    /// Caller cancelled
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::Unavailable => "unavailable",
            FailureReason::Timeout => "timeout",
            FailureReason::Error => "error",
            FailureReason::RateLimited => "rate_limited",
            FailureReason::NetworkError => "network_error",
            FailureReason::InvalidResponse => "invalid_response",
            FailureReason::Authentication => "authentication",
            FailureReason::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FailureReason {
    /// Classify a provider error.
    pub fn from_llm_error(err: &LlmError) -> Self {
        match err {
            LlmError::AuthenticationFailed { .. } => FailureReason::Authentication,
            LlmError::RateLimited { .. } => FailureReason::RateLimited,
            LlmError::ModelNotFound { .. } | LlmError::ProviderUnavailable { .. } => {
                FailureReason::Unavailable
            }
            LlmError::NetworkError { .. } => FailureReason::NetworkError,
            LlmError::Timeout { .. } => FailureReason::Timeout,
            LlmError::ParseError { .. } | LlmError::InvalidRequest { .. } => {
                FailureReason::InvalidResponse
            }
            LlmError::Cancelled => FailureReason::Cancelled,
            LlmError::ServerError { .. } | LlmError::Other { .. } => FailureReason::Error,
        }
    }

    /// Whether the chain may move on to the next provider
    pub fn should_fallback(&self) -> bool {
        !matches!(self, FailureReason::Cancelled)
    }

    /// Whether repeating the attempt on the same provider is worthwhile
    pub fn should_retry(&self) -> bool {
        !matches!(
            self,
            FailureReason::Cancelled | FailureReason::Authentication | FailureReason::Unavailable
        )
    }
}

/// Errors from chain execution
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("No providers configured")]
    NoProviders,

    #[error("All providers failed after {} attempts: {last_error}", .log.attempts.len())]
    AllProvidersFailed {
        log: FallbackExecutionLog,
        last_error: LlmError,
    },

    #[error("Planning cancelled")]
    Cancelled { log: FallbackExecutionLog },
}

impl ChainError {
    /// Attempt log, when any attempt was made.
    pub fn log(&self) -> Option<&FallbackExecutionLog> {
        match self {
            ChainError::NoProviders => None,
            ChainError::AllProvidersFailed { log, .. } | ChainError::Cancelled { log } => Some(log),
        }
    }

    pub fn attempts(&self) -> usize {
        self.log().map(|l| l.attempts.len()).unwrap_or(0)
    }
}

impl From<ChainError> for LlmError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::NoProviders => LlmError::ProviderUnavailable {
                message: "No providers configured".to_string(),
            },
            ChainError::AllProvidersFailed { last_error, .. } => last_error,
            ChainError::Cancelled { .. } => LlmError::Cancelled,
        }
    }
}

/// Configuration for fallback behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Extra attempts on the same provider before falling through
    #[serde(default = "default_retries_per_provider")]
    pub retries_per_provider: u32,
    /// Timeout per attempt in seconds
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    /// Delay between attempts in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_between_attempts_ms: u64,
}

fn default_retries_per_provider() -> u32 {
    1
}

fn default_attempt_timeout() -> u64 {
    120
}

fn default_delay_ms() -> u64 {
    500
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            retries_per_provider: default_retries_per_provider(),
            attempt_timeout_secs: default_attempt_timeout(),
            delay_between_attempts_ms: default_delay_ms(),
        }
    }
}

/// Record of a single provider attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackAttempt {
    /// Planner that was tried
    pub provider: String,
    /// 1-based attempt number on this provider
    pub attempt: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub started_at: String,
}

impl FallbackAttempt {
    /// Create a successful attempt record
    pub fn success(provider: impl Into<String>, attempt: u32, duration_ms: u64) -> Self {
        Self {
            provider: provider.into(),
            attempt,
            success: true,
            failure_reason: None,
            error_message: None,
            duration_ms,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Create a failed attempt record
    pub fn failure(
        provider: impl Into<String>,
        attempt: u32,
        reason: FailureReason,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            provider: provider.into(),
            attempt,
            success: false,
            failure_reason: Some(reason),
            error_message: Some(error.into()),
            duration_ms,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Log of all attempts made for one plan request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackExecutionLog {
    pub attempts: Vec<FallbackAttempt>,
    pub total_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_provider: Option<String>,
    pub overall_success: bool,
}

impl FallbackExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attempt to the log
    pub fn add_attempt(&mut self, attempt: FallbackAttempt) {
        self.total_duration_ms += attempt.duration_ms;
        if attempt.success {
            self.successful_provider = Some(attempt.provider.clone());
            self.overall_success = true;
        }
        self.attempts.push(attempt);
    }

    /// Get the number of failed attempts
    pub fn failed_attempts_count(&self) -> usize {
        self.attempts.iter().filter(|a| !a.success).count()
    }
}

/// Ordered planners with retry, timeout, rate limiting and fallback.
pub struct ProviderChain {
    planners: Vec<Arc<dyn Planner>>,
    config: FallbackConfig,
    limiter: Option<Arc<RateLimiterRegistry>>,
    label: String,
}

impl ProviderChain {
    pub fn new(planners: Vec<Arc<dyn Planner>>) -> Self {
        let label = planners
            .iter()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        Self {
            planners,
            config: FallbackConfig::default(),
            limiter: None,
            label,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: FallbackConfig) -> Self {
        self.config = config;
        self
    }

    /// Consume one workspace token per attempt.
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiterRegistry>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.planners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planners.is_empty()
    }

    /// Plan with fallback, streaming text when `tx` is given.
    ///
    /// On success a single `Complete` marker is sent after the text.
    pub async fn run(
        &self,
        request: &PlanRequest,
        tx: Option<mpsc::Sender<ProviderEvent>>,
    ) -> Result<(PlanOutcome, FallbackExecutionLog), ChainError> {
        if self.planners.is_empty() {
            return Err(ChainError::NoProviders);
        }

        let mut log = FallbackExecutionLog::new();
        let mut last_error: Option<LlmError> = None;
        let attempts_per_provider = self.config.retries_per_provider.saturating_add(1);
        let timeout = Duration::from_secs(self.config.attempt_timeout_secs.max(1));

        for planner in &self.planners {
            for attempt in 1..=attempts_per_provider {
                if !log.attempts.is_empty() && self.config.delay_between_attempts_ms > 0 {
                    debug!(
                        delay_ms = self.config.delay_between_attempts_ms,
                        "waiting before next provider attempt"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.delay_between_attempts_ms))
                        .await;
                }
                if let Some(limiter) = &self.limiter {
                    limiter.acquire(&request.workspace).await;
                }

                info!(provider = planner.name(), attempt, "planning attempt");
                let started = Instant::now();
                let result = self
                    .attempt(planner.as_ref(), request, tx.as_ref(), timeout)
                    .await;
                let duration_ms = started.elapsed().as_millis() as u64;

                match result {
                    Ok(mut outcome) => {
                        info!(provider = planner.name(), attempt, duration_ms, "planning succeeded");
                        log.add_attempt(FallbackAttempt::success(planner.name(), attempt, duration_ms));
                        outcome.attempts = log.attempts.len() as u32;
                        if let Some(tx) = &tx {
                            let _ = tx
                                .send(ProviderEvent::Complete {
                                    stop_reason: Some(outcome.decision.kind().to_string()),
                                })
                                .await;
                        }
                        return Ok((outcome, log));
                    }
                    Err(err) => {
                        let reason = FailureReason::from_llm_error(&err);
                        warn!(
                            provider = planner.name(),
                            attempt,
                            reason = %reason,
                            error = %err,
                            "planning attempt failed"
                        );
                        log.add_attempt(FallbackAttempt::failure(
                            planner.name(),
                            attempt,
                            reason,
                            err.to_string(),
                            duration_ms,
                        ));
                        if !reason.should_fallback() {
                            return Err(ChainError::Cancelled { log });
                        }
                        let retry = reason.should_retry();
                        last_error = Some(err);
                        if !retry {
                            break;
                        }
                    }
                }
            }
        }

        error!(
            chain = %self.label,
            attempts = log.attempts.len(),
            "all providers in chain failed"
        );
        Err(ChainError::AllProvidersFailed {
            log,
            last_error: last_error.unwrap_or_else(|| LlmError::other("no attempt completed")),
        })
    }

    async fn attempt(
        &self,
        planner: &dyn Planner,
        request: &PlanRequest,
        tx: Option<&mpsc::Sender<ProviderEvent>>,
        timeout: Duration,
    ) -> LlmResult<PlanOutcome> {
        let timed_out = |_| LlmError::Timeout {
            message: format!("{} did not answer within {}s", planner.name(), timeout.as_secs()),
        };

        let Some(tx) = tx else {
            return tokio::time::timeout(timeout, planner.plan(request))
                .await
                .map_err(timed_out)?;
        };

        // Forward everything but the planner's own Complete; the chain sends one.
        let (inner_tx, mut inner_rx) = mpsc::channel(ATTEMPT_CHANNEL_CAPACITY);
        let call = tokio::time::timeout(timeout, planner.plan_stream(request, inner_tx));
        let forward = async {
            while let Some(event) = inner_rx.recv().await {
                if !event.is_complete() {
                    let _ = tx.send(event).await;
                }
            }
        };
        let (result, ()) = tokio::join!(call, forward);
        result.map_err(timed_out)?
    }
}

#[async_trait]
impl Planner for ProviderChain {
    fn name(&self) -> &str {
        &self.label
    }

    async fn plan(&self, request: &PlanRequest) -> LlmResult<PlanOutcome> {
        self.run(request, None)
            .await
            .map(|(outcome, _)| outcome)
            .map_err(LlmError::from)
    }

    async fn plan_stream(
        &self,
        request: &PlanRequest,
        tx: mpsc::Sender<ProviderEvent>,
    ) -> LlmResult<PlanOutcome> {
        self.run(request, Some(tx))
            .await
            .map(|(outcome, _)| outcome)
            .map_err(LlmError::from)
    }
}
