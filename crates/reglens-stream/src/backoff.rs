use std::time::Duration;

/// 重连退避：base * 2^n，封顶 max；连接成功后归零。
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// 取下一次重连的等待时长并递增计数
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16);
        let delay = self
            .base
            .saturating_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// 任何一次成功进入 OPEN 都会把计数重置到最小值
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}
