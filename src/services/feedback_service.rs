//! 设备回报处理
//! 无论设备回报成功还是失败，都按任务类型的执行倍数推进 executed_count；
//! 达到目标次数则完成，否则回到 waiting 等待再次派发。回报不产生任何账本变动。

use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::db::{self, PgTx};
use crate::error::{AppError, Result};
use crate::models::device::{FeedbackOutcome, TaskFeedbackRequest};
use crate::models::task::{feedback_outcome, Task};
use crate::services::task_service::insert_task_log;

pub struct FeedbackService {
    db: Pool<Postgres>,
}

impl FeedbackService {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    /// 处理一次设备回报
    #[instrument(skip(self, request), fields(device_id = %request.device_id, task_id = request.task_id))]
    pub async fn submit_feedback(&self, request: TaskFeedbackRequest) -> Result<FeedbackOutcome> {
        request.validate()?;

        let now = Utc::now();
        let mut tx = db::begin(&self.db).await?;

        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(request.task_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found("task"))?;

        let multiplier = sqlx::query_scalar::<_, i32>(
            "SELECT execute_multiplier FROM task_types WHERE type_code = $1",
        )
        .bind(&task.task_type)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(1)
        .max(1);

        let device_id = request.device_id.trim();
        let result = request.status.as_str();

        let outcome = if task.status.is_terminal() {
            // 任务已被取消或过期结算，回报只留痕，不再推进计数
            warn!(status = %task.status, "Feedback for a task that is already closed");
            let message = format!("任务已结束({})，回报未计数: {}", task.status, request.message);
            insert_task_log(&mut tx, task.id, Some(device_id), result, &message).await?;

            FeedbackOutcome {
                task_id: task.id,
                executed_count: task.executed_count,
                execute_count: task.execute_count,
                status: task.status,
                counted: false,
            }
        } else {
            let (executed, next) =
                feedback_outcome(task.executed_count, task.execute_count, multiplier);

            let updated = sqlx::query_as::<_, Task>(
                r#"
                UPDATE tasks SET executed_count = $2, status = $3, updated_at = $4
                WHERE id = $1 AND status IN ('waiting', 'running')
                RETURNING *
                "#,
            )
            .bind(task.id)
            .bind(executed)
            .bind(next)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            insert_task_log(&mut tx, task.id, Some(device_id), result, &request.message).await?;

            FeedbackOutcome {
                task_id: updated.id,
                executed_count: updated.executed_count,
                execute_count: updated.execute_count,
                status: updated.status,
                counted: true,
            }
        };

        Self::finish_assignment(&mut tx, task.id, device_id, now).await?;

        sqlx::query(
            r#"
            INSERT INTO device_task_history (device_id, task_id, sku, execute_time, status)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(device_id)
        .bind(task.id)
        .bind(&task.sku)
        .bind(now)
        .bind(result)
        .execute(&mut *tx)
        .await?;

        let credited = if outcome.counted { i64::from(multiplier) } else { 0 };
        sqlx::query(
            r#"
            UPDATE devices
            SET status = 'idle',
                last_heartbeat = $2,
                last_active = $2,
                last_task_time = $2,
                task_count = task_count + $3,
                updated_at = $2
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .bind(now)
        .bind(credited)
        .execute(&mut *tx)
        .await?;

        db::commit(tx).await?;

        metrics::counter!("task_feedback_total", "result" => result).increment(1);
        info!(
            executed_count = outcome.executed_count,
            execute_count = outcome.execute_count,
            status = %outcome.status,
            counted = outcome.counted,
            "Task feedback processed"
        );

        Ok(outcome)
    }

    /// 关闭该设备在此任务上最早的一条未结束派发记录
    async fn finish_assignment(
        tx: &mut PgTx,
        task_id: i64,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE task_assignments SET finished_at = $3
            WHERE id = (
                SELECT id FROM task_assignments
                WHERE task_id = $1 AND device_id = $2 AND finished_at IS NULL
                ORDER BY assigned_at ASC
                LIMIT 1
            )
            "#,
        )
        .bind(task_id)
        .bind(device_id)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
