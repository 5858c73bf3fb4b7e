//! The Request Governor: every outbound inference call goes through here.
//!
//! - **Admission:** at most `max_concurrent` calls execute at once (async semaphore; waiters
//!   queue fairly instead of polling).
//! - **Retry:** transient failures are retried up to `max_retries` times with delay
//!   `base_delay * backoff_multiplier^attempt`. The slot is released during the backoff sleep
//!   and re-acquired for the next attempt.
//! - **Quota signal:** when retries are exhausted on a quota failure, the breaker is told.
//!
//! There is no per-call timeout here; a dispatched call is always awaited to resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::breaker::QuotaCircuitBreaker;
use crate::config::GovernorSettings;
use crate::error::{ServiceError, ServiceResult};

/// Who issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// User-triggered; never gated by the quota breaker.
    Interactive,
    /// Timer-triggered background work.
    Autonomous,
}

impl Origin {
    /// Breaker policy: only autonomous traffic is suspended on quota exhaustion. Interactive
    /// calls always reach the governor so user-facing features keep working.
    pub fn respects_breaker(self) -> bool {
        matches!(self, Origin::Autonomous)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Interactive => "interactive",
            Origin::Autonomous => "autonomous",
        }
    }
}

/// Metadata for one governed call. The payload itself lives in the call closure.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub label: String,
    pub origin: Origin,
    pub created_at: DateTime<Utc>,
}

impl InferenceRequest {
    pub fn new(label: impl Into<String>, origin: Origin) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            origin,
            created_at: Utc::now(),
        }
    }
}

struct GovernorInner {
    slots: Semaphore,
    settings: GovernorSettings,
    breaker: QuotaCircuitBreaker,
}

/// Cloneable handle; clones share the same slot pool and breaker.
#[derive(Clone)]
pub struct RequestGovernor {
    inner: Arc<GovernorInner>,
}

impl RequestGovernor {
    pub fn new(settings: GovernorSettings, breaker: QuotaCircuitBreaker) -> Self {
        let permits = settings.max_concurrent.max(1);
        Self {
            inner: Arc::new(GovernorInner {
                slots: Semaphore::new(permits),
                settings: GovernorSettings {
                    max_concurrent: permits,
                    ..settings
                },
                breaker,
            }),
        }
    }

    pub fn settings(&self) -> &GovernorSettings {
        &self.inner.settings
    }

    pub fn breaker(&self) -> &QuotaCircuitBreaker {
        &self.inner.breaker
    }

    /// Slots currently held by executing attempts.
    pub fn in_flight(&self) -> usize {
        self.inner.settings.max_concurrent - self.inner.slots.available_permits()
    }

    pub fn available(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let s = &self.inner.settings;
        let factor = s.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(s.base_delay().as_secs_f64() * factor)
    }

    /// Run `call` under admission control and retry policy.
    pub async fn execute<T, F, Fut>(&self, origin: Origin, call: F) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        self.execute_request(InferenceRequest::new("inference", origin), call)
            .await
    }

    /// Same as [`execute`](Self::execute) with caller-supplied request metadata (for logging).
    pub async fn execute_request<T, F, Fut>(
        &self,
        request: InferenceRequest,
        mut call: F,
    ) -> ServiceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let max_retries = self.inner.settings.max_retries;
        let mut attempt: u32 = 0;

        loop {
            let outcome = {
                let _slot = self
                    .inner
                    .slots
                    .acquire()
                    .await
                    .map_err(|_| ServiceError::fatal("request governor closed"))?;
                debug!(
                    request_id = %request.id,
                    label = %request.label,
                    origin = request.origin.as_str(),
                    attempt,
                    in_flight = self.in_flight(),
                    "dispatching inference call"
                );
                call().await
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }

            if attempt >= max_retries {
                if err.is_quota() {
                    self.inner.breaker.report_quota_exhausted();
                }
                warn!(
                    request_id = %request.id,
                    label = %request.label,
                    attempts = attempt + 1,
                    error = %err,
                    "retries exhausted"
                );
                return Err(err);
            }

            let delay = self.backoff_delay(attempt);
            warn!(
                request_id = %request.id,
                label = %request.label,
                origin = request.origin.as_str(),
                retry = attempt + 1,
                max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure; backing off before retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
