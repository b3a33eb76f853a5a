//! 요청/응답 호출을 위한 고정 간격 재시도.
//!
//! 과거 시세 조회는 재시도 가능한 에러([`FeedError::is_retryable`])에 대해서만
//! 정해진 횟수까지 일정 간격으로 다시 시도합니다. 진행 중인 재시도는 취소할 수
//! 없으며 예산을 모두 소진해야 끝납니다.

use std::future::Future;
use std::time::Duration;

use market_core::RetrySettings;
use tracing::{debug, warn};

use crate::error::{FeedError, FeedResult};

/// 재시도 설정.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 시도 간 대기 시간
    pub interval: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    /// 재시도 없이 한 번만 시도.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self::new(settings.max_attempts, settings.interval())
    }
}

/// 재시도 가능한 에러에 대해 작업을 반복합니다.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, f: F) -> FeedResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FeedResult<T>>,
{
    with_retry_if(config, operation, f, FeedError::is_retryable).await
}

/// 조건을 만족하는 에러에 대해 작업을 반복합니다.
pub async fn with_retry_if<T, F, Fut, P>(
    config: &RetryConfig,
    operation: &str,
    mut f: F,
    should_retry: P,
) -> FeedResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FeedResult<T>>,
    P: Fn(&FeedError) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Retrying in {:?}",
                    config.interval
                );
                tokio::time::sleep(config.interval).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
