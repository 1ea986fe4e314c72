//! 设备离线判定
//! 心跳超过阈值的设备标记为 offline，下次轮询时会恢复为 idle

use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Postgres};
use tracing::{info, instrument};

use crate::config::MAX_DEVICE_OFFLINE_AFTER_SECS;
use crate::error::Result;

pub struct DeviceSweeper {
    db: Pool<Postgres>,
    offline_after: Duration,
}

impl DeviceSweeper {
    pub fn new(db: Pool<Postgres>, offline_after_secs: u64) -> Self {
        Self {
            db,
            offline_after: Duration::seconds(offline_after_secs.min(MAX_DEVICE_OFFLINE_AFTER_SECS) as i64),
        }
    }

    /// 标记心跳超时的设备，返回受影响的设备数
    #[instrument(skip(self))]
    pub async fn mark_offline(&self) -> Result<u64> {
        self.mark_offline_at(Utc::now()).await
    }

    pub async fn mark_offline_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE devices SET status = 'offline', updated_at = $2
            WHERE status <> 'offline' AND last_heartbeat < $1
            "#,
        )
        .bind(now - self.offline_after)
        .bind(now)
        .execute(&self.db)
        .await?;

        let affected = result.rows_affected();
        if affected > 0 {
            info!(devices = affected, "Devices marked offline");
        }

        Ok(affected)
    }
}
