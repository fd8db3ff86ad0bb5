use std::future::Future;
use std::time::Duration;

use reglens_error::Result;
use tracing::warn;

/// 统一的有界重试策略
///
/// 以前每个调用点各写一份退避逻辑，这里收敛为一个工具：
/// 最大次数 + 基础延迟 + 倍率。只对 `is_retryable()` 的错误生效；
/// 生成类操作（可能已在后端产生副作用）不允许走这里。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// 不重试（生成类操作使用）
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1,
        }
    }
}

pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts.max(1) => {
                warn!(operation, attempt, error = %e, "调用失败，退避后重试");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(policy.multiplier.max(1));
            }
            Err(e) => return Err(e),
        }
    }
}
