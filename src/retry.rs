use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use log::debug;
use reqwest::StatusCode;

use crate::config::PipelineOptions;
use crate::error::{Error, Result};

/// 指数退避重试策略
///
/// 只有 [`Error::is_retryable`] 为真的错误才会重试，其余错误立即返回。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 总尝试次数，包含第一次
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay, max_delay: Duration::from_secs(30) }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }

    /// 执行操作，按策略重试
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        op.retry(self.backoff())
            .when(Error::is_retryable)
            .notify(|err: &Error, delay: Duration| {
                debug!("{err}，{}ms 后重试", delay.as_millis());
            })
            .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_millis(500))
    }
}

impl From<&PipelineOptions> for RetryPolicy {
    fn from(opts: &PipelineOptions) -> Self {
        Self::new(opts.max_attempts, Duration::from_millis(opts.retry_base_delay))
    }
}

/// 429 和 5xx 值得重试，其余状态码直接失败
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_exhausts_attempts() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let result: Result<()> = policy
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::TransientUpstream("503".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::TransientUpstream(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_fails_fast() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100));
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let result: Result<()> = policy
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::PermanentAsset("404".to_string()))
            })
            .await;

        assert!(matches!(result, Err(Error::PermanentAsset(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_error() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        let result = policy
            .run(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::TransientUpstream("timeout".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
