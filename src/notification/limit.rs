//! # 通知限流
//!
//! 每个 (用户, 通知类型) 一个计数器，首次计数时开窗，窗口到期后整体失效。

use moka::future::Cache;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// 计数器上限，超出后最早的窗口被淘汰
const MAX_TRACKED_KEYS: u64 = 100_000;

/// 限流检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitOutcome {
    pub allowed: bool,
    pub current: u32,
    pub limit: u32,
}

/// 固定窗口计数限流器
#[derive(Clone)]
pub struct NotificationLimiter {
    counters: Cache<String, Arc<AtomicU32>>,
    limit: u32,
}

impl NotificationLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        let counters = Cache::builder()
            .max_capacity(MAX_TRACKED_KEYS)
            .time_to_live(window)
            .build();
        Self { counters, limit }
    }

    fn key(user_id: i64, notify_type: &str) -> String {
        format!("notify_limit:{user_id}:{notify_type}")
    }

    /// 原子自增并判断是否仍在限额内
    pub async fn check(&self, user_id: i64, notify_type: &str) -> LimitOutcome {
        let counter = self
            .counters
            .get_with(Self::key(user_id, notify_type), async { Arc::new(AtomicU32::new(0)) })
            .await;
        let current = counter.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        LimitOutcome {
            allowed: current <= self.limit,
            current,
            limit: self.limit,
        }
    }
}

impl std::fmt::Debug for NotificationLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationLimiter")
            .field("limit", &self.limit)
            .field("tracked", &self.counters.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_per_user_and_type() {
        let limiter = NotificationLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check(1, "quota_exceed").await.allowed);
        assert!(limiter.check(1, "quota_exceed").await.allowed);
        let third = limiter.check(1, "quota_exceed").await;
        assert!(!third.allowed);
        assert_eq!(third.current, 3);

        assert!(limiter.check(1, "channel_update").await.allowed);
        assert!(limiter.check(2, "quota_exceed").await.allowed);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_counter() {
        let limiter = NotificationLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.check(7, "t").await.allowed);
        assert!(!limiter.check(7, "t").await.allowed);
        tokio::time::sleep(Duration::from_millis(120)).await;
        limiter.counters.run_pending_tasks().await;
        assert!(limiter.check(7, "t").await.allowed);
    }
}
