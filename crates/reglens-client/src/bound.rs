use std::future::Future;
use std::time::Duration;

use reglens_error::{RegError, Result};

/// 操作时限分级：元数据/历史读取用短时限，查询处理与上传用中时限，
/// 报告生成用长时限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub short: Duration,
    pub medium: Duration,
    pub long: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(30),
            medium: Duration::from_secs(60),
            long: Duration::from_secs(120),
        }
    }
}

impl TimeoutConfig {
    pub fn ceiling(&self, class: OpClass) -> Duration {
        match class {
            OpClass::Short => self.short,
            OpClass::Medium => self.medium,
            OpClass::Long => self.long,
        }
    }
}

/// 有界执行：为调用套上可取消的计时器
///
/// 到期时 future 被 drop（在途调用随之取消），返回 408 类超时错误，
/// 绝不允许静默挂死。
pub async fn bounded<T>(
    operation: &str,
    ceiling: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(ceiling, fut).await {
        Ok(result) => result,
        Err(_) => Err(RegError::Timeout {
            operation: operation.to_string(),
            timeout_ms: ceiling.as_millis() as u64,
        }),
    }
}
