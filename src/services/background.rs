//! 后台周期任务
//! 过期结算、设备离线判定与限流器清理三个循环共用一个取消令牌，
//! 由 TaskTracker 统一等待退出。令牌只在两轮之间检查，进行中的一轮总会完整执行。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::rate_limit::RateLimiter;
use crate::services::{DeviceSweeper, ExpirySweeper};

pub struct BackgroundTasks {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl BackgroundTasks {
    /// 启动全部后台循环
    pub fn start(
        config: &AppConfig,
        expiry: Arc<ExpirySweeper>,
        devices: Arc<DeviceSweeper>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        tracker.spawn(run_periodic(
            "expiry_sweeper",
            Duration::from_secs(config.scheduler.expiry_sweep_interval_secs),
            token.clone(),
            move || {
                let expiry = expiry.clone();
                async move {
                    match expiry.run_once().await {
                        Ok(report) => debug!(?report, "Expiry pass complete"),
                        Err(e) => error!(error = %e, "Expiry sweep failed"),
                    }
                }
            },
        ));

        tracker.spawn(run_periodic(
            "device_sweeper",
            Duration::from_secs(config.scheduler.device_sweep_interval_secs),
            token.clone(),
            move || {
                let devices = devices.clone();
                async move {
                    if let Err(e) = devices.mark_offline().await {
                        error!(error = %e, "Device offline sweep failed");
                    }
                }
            },
        ));

        tracker.spawn(run_periodic(
            "rate_limit_cleanup",
            Duration::from_secs(config.rate_limit.cleanup_interval_secs),
            token.clone(),
            move || {
                let limiter = rate_limiter.clone();
                async move {
                    limiter.cleanup().await;
                }
            },
        ));

        tracker.close();
        info!("Background tasks started");

        Self { token, tracker }
    }

    /// 取消令牌，HTTP 服务的优雅关闭也监听它
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 通知全部循环退出并等待，超时返回 false
    pub async fn shutdown(self, timeout: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("Background tasks stopped");
                true
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Background tasks did not stop in time"
                );
                false
            }
        }
    }
}

/// 按固定间隔执行 job，首轮立即执行
async fn run_periodic<F, Fut>(name: &'static str, period: Duration, token: CancellationToken, mut job: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(task = name, "Background loop cancelled");
                break;
            }
            _ = ticker.tick() => job().await,
        }
    }
}
