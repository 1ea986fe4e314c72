//! 代理均衡分配
//! 每次分配选择使用次数最少的启用代理，计数加一并记录分配日志

use sqlx::{Pool, Postgres};
use tracing::{info, instrument};
use validator::Validate;

use crate::db;
use crate::error::{AppError, Result};
use crate::models::proxy::{AssignProxyRequest, Proxy, ProxyAssignment, ProxyStatistics, ProxyUsageLog};

/// 使用日志单次返回上限
pub const MAX_USAGE_LOGS: i64 = 200;

pub struct ProxyService {
    db: Pool<Postgres>,
}

impl ProxyService {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    /// 分配代理，usage_count 相同时取 id 最小者
    #[instrument(skip(self, request), fields(device_id = %request.device_id))]
    pub async fn assign(&self, request: AssignProxyRequest) -> Result<ProxyAssignment> {
        request.validate()?;

        let mut tx = db::begin(&self.db).await?;

        // 普通行锁，并发分配依次执行，计数不会丢失
        let proxy = sqlx::query_as::<_, Proxy>(
            r#"
            SELECT * FROM proxies
            WHERE is_active = TRUE
            ORDER BY usage_count ASC, id ASC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("no proxy available"))?;

        let proxy = sqlx::query_as::<_, Proxy>(
            r#"
            UPDATE proxies SET usage_count = usage_count + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(proxy.id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO proxy_usage_logs (proxy_id, device_id, device_sn, ip, port)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(proxy.id)
        .bind(request.device_id.trim())
        .bind(&request.device_sn)
        .bind(&proxy.ip)
        .bind(proxy.port)
        .execute(&mut *tx)
        .await?;

        db::commit(tx).await?;

        metrics::counter!("proxy_assignments_total").increment(1);
        info!(proxy_id = proxy.id, usage_count = proxy.usage_count, "Proxy assigned");

        Ok(ProxyAssignment::from(&proxy))
    }

    pub async fn statistics(&self) -> Result<ProxyStatistics> {
        let stats = sqlx::query_as::<_, ProxyStatistics>(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE is_active) AS active,
                COUNT(*) FILTER (WHERE NOT is_active) AS inactive,
                COALESCE(SUM(usage_count), 0)::BIGINT AS total_usage,
                COALESCE(AVG(usage_count), 0)::FLOAT8 AS avg_usage
            FROM proxies
            "#,
        )
        .fetch_one(&self.db)
        .await?;

        Ok(stats)
    }

    /// 某个代理最近的分配记录
    pub async fn usage_logs(&self, proxy_id: i64, limit: i64) -> Result<Vec<ProxyUsageLog>> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM proxies WHERE id = $1)")
            .bind(proxy_id)
            .fetch_one(&self.db)
            .await?;
        if !exists {
            return Err(AppError::not_found("proxy"));
        }

        let logs = sqlx::query_as::<_, ProxyUsageLog>(
            r#"
            SELECT * FROM proxy_usage_logs
            WHERE proxy_id = $1
            ORDER BY assigned_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(proxy_id)
        .bind(limit.clamp(1, MAX_USAGE_LOGS))
        .fetch_all(&self.db)
        .await?;

        Ok(logs)
    }
}
