//! 调用限流
//! 限流器以 trait 形式注入，默认实现为进程内滑动窗口：
//! 每个键保留窗口内的调用时间戳，超出上限的调用被拒绝。
//! 多副本部署时各实例独立计数。

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::RateLimitSettings;

/// 限流端口
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 尝试占用一次调用额度
    async fn try_acquire(&self, key: &str) -> bool;

    /// 当前窗口内剩余额度
    async fn remaining(&self, key: &str) -> u32;

    /// 清理长时间不活跃的键，返回清理数量
    async fn cleanup(&self) -> usize;

    fn stats(&self) -> RateLimiterStats;
}

/// 限流器统计
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub tracked_keys: usize,
    pub max_calls: u32,
    pub window_ms: u64,
}

/// 滑动窗口限流器
pub struct SlidingWindowRateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    max_calls: u32,
    window: Duration,
    idle_evict: Duration,
}

impl SlidingWindowRateLimiter {
    pub fn new(max_calls: u32, window: Duration, idle_evict: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_calls,
            window,
            idle_evict,
        }
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.max_calls,
            Duration::from_millis(settings.window_ms),
            Duration::from_secs(settings.idle_evict_secs),
        )
    }

    fn prune(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&front) = calls.front() {
            if now.duration_since(front) < window {
                break;
            }
            calls.pop_front();
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut calls = self.windows.entry(key.to_owned()).or_default();
        Self::prune(&mut calls, now, self.window);

        if calls.len() < self.max_calls as usize {
            calls.push_back(now);
            true
        } else {
            metrics::counter!("rate_limit_rejections_total").increment(1);
            false
        }
    }

    async fn remaining(&self, key: &str) -> u32 {
        let Some(mut calls) = self.windows.get_mut(key) else {
            return self.max_calls;
        };
        Self::prune(&mut calls, Instant::now(), self.window);
        self.max_calls.saturating_sub(calls.len() as u32)
    }

    async fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, calls| {
            calls
                .back()
                .is_some_and(|last| now.duration_since(*last) < self.idle_evict)
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, "Evicted idle rate limit keys");
        }
        removed
    }

    fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            tracked_keys: self.windows.len(),
            max_calls: self.max_calls,
            window_ms: self.window.as_millis() as u64,
        }
    }
}
