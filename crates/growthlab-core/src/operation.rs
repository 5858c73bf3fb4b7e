//! Long-running operations: start a job, then poll its handle at a fixed interval until the
//! backend reports `done`. Each poll is an ordinary governed call, so polling shares the
//! admission pool and retry policy with everything else.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ServiceError, ServiceResult};
use crate::governor::{InferenceRequest, Origin, RequestGovernor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStatus {
    pub done: bool,
    /// Where the finished result can be fetched from.
    pub result_uri: Option<String>,
    pub error: Option<String>,
}

#[async_trait]
pub trait OperationBackend: Send + Sync {
    async fn poll(&self, handle: &OperationHandle) -> ServiceResult<OperationStatus>;
}

pub struct OperationPoller {
    governor: RequestGovernor,
    interval: Duration,
    origin: Origin,
}

impl OperationPoller {
    pub fn new(governor: RequestGovernor, interval: Duration) -> Self {
        Self {
            governor,
            interval,
            origin: Origin::Interactive,
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Poll until done and return the result location.
    pub async fn wait(
        &self,
        backend: &dyn OperationBackend,
        handle: &OperationHandle,
    ) -> ServiceResult<String> {
        let mut polls: u32 = 0;
        loop {
            tokio::time::sleep(self.interval).await;
            polls += 1;

            let request = InferenceRequest::new(format!("poll {}", handle.name), self.origin);
            let status = self
                .governor
                .execute_request(request, || backend.poll(handle))
                .await?;

            if !status.done {
                debug!(operation = %handle.name, polls, "operation still running");
                continue;
            }

            if let Some(err) = status.error {
                return Err(ServiceError::fatal(format!(
                    "operation {} failed: {}",
                    handle.name, err
                )));
            }

            info!(operation = %handle.name, polls, "operation complete");
            return status.result_uri.ok_or_else(|| {
                ServiceError::fatal(format!("operation {} finished without a result", handle.name))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::QuotaCircuitBreaker;
    use crate::config::GovernorSettings;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Countdown {
        remaining: AtomicU32,
        polls: AtomicU32,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl OperationBackend for Countdown {
        async fn poll(&self, _handle: &OperationHandle) -> ServiceResult<OperationStatus> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let left = self.remaining.fetch_sub(1, Ordering::SeqCst);
            if left > 1 {
                return Ok(OperationStatus::default());
            }
            Ok(OperationStatus {
                done: true,
                result_uri: self.fail_with.is_none().then(|| "https://files/video.mp4".to_string()),
                error: self.fail_with.clone(),
            })
        }
    }

    fn poller() -> OperationPoller {
        let governor =
            RequestGovernor::new(GovernorSettings::default(), QuotaCircuitBreaker::default());
        OperationPoller::new(governor, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_at_fixed_interval_until_done() {
        let backend = Countdown {
            remaining: AtomicU32::new(3),
            polls: AtomicU32::new(0),
            fail_with: None,
        };
        let handle = OperationHandle {
            name: "operations/abc".to_string(),
        };
        let started = tokio::time::Instant::now();

        let uri = poller().wait(&backend, &handle).await.unwrap();

        assert_eq!(uri, "https://files/video.mp4");
        assert_eq!(backend.polls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_operation_is_fatal() {
        let backend = Countdown {
            remaining: AtomicU32::new(1),
            polls: AtomicU32::new(0),
            fail_with: Some("safety filter".to_string()),
        };
        let handle = OperationHandle {
            name: "operations/x".to_string(),
        };
        let err = poller().wait(&backend, &handle).await.unwrap_err();
        assert!(matches!(err, ServiceError::Fatal(ref m) if m.contains("safety filter")));
    }
}
