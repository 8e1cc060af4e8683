//! 重试策略 - 业务能力层
//!
//! 只负责回答两个问题：还能不能重试、失败后等多久。
//! 等待本身由派发流程执行，等待期间不占用并发名额。

use std::time::Duration;

use crate::config::Config;

/// 瞬时错误的重试策略
///
/// 指数退避 + 随机抖动；上游给出 Retry-After 提示时，
/// 实际等待时长取提示值和计算值中的较大者。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_attempts,
            config.backoff_base_ms,
            config.backoff_max_ms,
        )
    }

    /// 最大尝试次数（含首次请求）
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 `attempt` 次尝试失败后的等待时长（attempt 从 1 开始）
    ///
    /// 计算值 = min(base * 2^(attempt-1), max) 再乘以 [0.5, 1.0) 的
    /// 随机抖动系数；`retry_after_hint` 为上游建议的等待秒数。
    pub fn delay_for(&self, attempt: u32, retry_after_hint: Option<u64>) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(32))
            .min(self.max_delay_ms);
        let jittered = (exp as f64 * (0.5 + rand::random::<f64>() * 0.5)) as u64;

        let hint_ms = retry_after_hint.map(|s| s.saturating_mul(1000)).unwrap_or(0);
        Duration::from_millis(jittered.max(hint_ms))
    }
}
