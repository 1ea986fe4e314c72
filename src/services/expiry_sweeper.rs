//! 过期任务结算
//! 开始时间超过 24 小时仍未完成的任务按未完成比例退款，并置为 partial_completed。
//! 每个任务独立一个事务，单个任务失败只记录错误，不影响同一轮的其余任务。

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{Pool, Postgres};
use tracing::{error, info, instrument};

use crate::db;
use crate::error::{AppError, Result};
use crate::models::ledger::{LedgerEntry, OperationType};
use crate::models::task::{append_remark, expiry_note, prorated_refund, Task, TaskStatus};
use crate::services::assignment_service::EXPIRY_WINDOW_HOURS;
use crate::services::ledger_service::LedgerService;
use crate::services::task_service::insert_task_log;
use crate::services::task_type_service::TaskTypeService;

/// 一轮扫描的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub refunded: i64,
    pub failed: usize,
}

pub struct ExpirySweeper {
    db: Pool<Postgres>,
    registry: Arc<TaskTypeService>,
}

impl ExpirySweeper {
    pub fn new(db: Pool<Postgres>, registry: Arc<TaskTypeService>) -> Self {
        Self { db, registry }
    }

    /// 执行一轮扫描
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport> {
        self.run_at(Utc::now()).await
    }

    /// 以给定时刻为基准扫描
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now - Duration::hours(EXPIRY_WINDOW_HOURS);

        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM tasks
            WHERE start_time < $1
              AND status IN ('waiting', 'running')
              AND executed_count < execute_count
            ORDER BY id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.db)
        .await?;

        let mut report = SweepReport {
            scanned: ids.len(),
            ..Default::default()
        };

        for task_id in ids {
            match self.expire_task(task_id, cutoff, now).await {
                Ok(Some(refund)) => {
                    report.expired += 1;
                    report.refunded += refund;
                }
                // 扫描与加锁之间被其他流程收尾
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(task_id, error = %e, "Failed to settle expired task");
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                refunded = report.refunded,
                failed = report.failed,
                "Expiry sweep finished"
            );
        }

        Ok(report)
    }

    /// 结算单个过期任务，返回退款额；任务已不满足过期条件时返回 None
    async fn expire_task(
        &self,
        task_id: i64,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let mut tx = db::begin(&self.db).await?;

        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE id = $1
              AND start_time < $2
              AND status IN ('waiting', 'running')
              AND executed_count < execute_count
            FOR UPDATE
            "#,
        )
        .bind(task_id)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(task) = task else {
            return Ok(None);
        };

        let task_type = self
            .registry
            .find(&task.task_type)
            .await?
            .ok_or_else(|| AppError::TaskTypeInvalid(task.task_type.clone()))?;

        let refund = prorated_refund(task.consume_jingdou, task.execute_count, task.executed_count);

        if refund > 0 {
            let remark = format!(
                "任务过期自动退款 - SKU:{} (完成{}/{})",
                task.sku, task.executed_count, task.execute_count
            );
            LedgerService::credit(
                &mut tx,
                LedgerEntry::credit(task.user_id, refund, OperationType::Refund, Some(task.id), remark),
            )
            .await?;
        }

        let note = expiry_note(task.executed_count, task.execute_count, refund);

        sqlx::query(
            r#"
            UPDATE tasks SET status = $2, remark = $3, updated_at = $4
            WHERE id = $1 AND status IN ('waiting', 'running')
            "#,
        )
        .bind(task.id)
        .bind(TaskStatus::PartialCompleted)
        .bind(append_remark(&task.remark, &note))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE task_assignments SET finished_at = $2 WHERE task_id = $1 AND finished_at IS NULL",
        )
        .bind(task.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        insert_task_log(&mut tx, task.id, None, TaskStatus::PartialCompleted.as_str(), &note).await?;

        db::commit(tx).await?;

        metrics::counter!("tasks_expired_total").increment(1);
        metrics::counter!("jingdou_refunded_total").increment(refund.max(0) as u64);
        info!(
            task_id = task.id,
            user_id = task.user_id,
            price = task_type.jingdou_price,
            executed = task.executed_count,
            target = task.execute_count,
            refund,
            "Expired task settled"
        );

        Ok(Some(refund))
    }
}
