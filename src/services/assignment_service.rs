//! 任务派发引擎
//! 设备轮询领取任务：登记设备存活状态，选出一个可执行的任务并置为 running。
//!
//! 选择与状态变更在同一事务内完成，候选行以 `FOR UPDATE ... SKIP LOCKED` 锁定，
//! 并发轮询的设备不会拿到同一个执行名额。running 的任务仍可继续派发，
//! 因此每次派发都会登记一条带租约的派发记录，未到期的派发记录占用名额。

use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Postgres};
use tracing::{debug, info, instrument};
use validator::Validate;

use crate::config::MAX_ASSIGNMENT_LEASE_SECS;
use crate::db::{self, PgTx};
use crate::error::Result;
use crate::models::device::{AssignedTask, Device, RequestTaskRequest};
use crate::models::task::{Task, TaskStatus};
use crate::models::task_type::requires_anti_duplicate;

/// 任务过期窗口与防重窗口均为 24 小时
pub const EXPIRY_WINDOW_HOURS: i64 = 24;

pub struct AssignmentService {
    db: Pool<Postgres>,
    lease: Duration,
}

impl AssignmentService {
    pub fn new(db: Pool<Postgres>, lease_secs: u64) -> Self {
        Self {
            db,
            lease: Duration::seconds(lease_secs.min(MAX_ASSIGNMENT_LEASE_SECS) as i64),
        }
    }

    /// 设备领取任务，没有可执行任务时返回 None
    #[instrument(skip(self, request), fields(device_id = %request.device_id))]
    pub async fn request_task(&self, request: RequestTaskRequest) -> Result<Option<AssignedTask>> {
        request.validate()?;

        let now = Utc::now();
        let device = self.touch_device(&request, now).await?;
        if device.is_blocked {
            info!("Blocked device polled for work");
            return Ok(None);
        }

        let mut tx = db::begin(&self.db).await?;

        let Some(task) = Self::select_candidate(&mut tx, now).await? else {
            debug!("No eligible task");
            return Ok(None);
        };

        // 行锁拿到后用新的语句重新确认名额，避免与刚提交的派发重复
        let open_leases = Self::open_leases(&mut tx, task.id, now).await?;
        if i64::from(task.executed_count) + open_leases >= i64::from(task.execute_count) {
            debug!(task_id = task.id, open_leases, "Task slots already taken");
            return Ok(None);
        }

        if requires_anti_duplicate(&task.task_type)
            && Self::recently_executed(&mut tx, &device.device_id, &task.sku, now).await?
        {
            debug!(task_id = task.id, sku = %task.sku, "Device executed this SKU within 24h");
            return Ok(None);
        }

        debug_assert!(task.status.can_transition_to(TaskStatus::Running));

        sqlx::query(
            r#"
            UPDATE tasks SET status = 'running', updated_at = $2
            WHERE id = $1 AND status IN ('waiting', 'running')
            "#,
        )
        .bind(task.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let lease_expires_at = now + self.lease;
        sqlx::query(
            r#"
            INSERT INTO task_assignments (task_id, device_id, assigned_at, lease_expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(task.id)
        .bind(&device.device_id)
        .bind(now)
        .bind(lease_expires_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE devices SET status = 'working', last_active = $2, updated_at = $2 WHERE device_id = $1",
        )
        .bind(&device.device_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        db::commit(tx).await?;

        metrics::counter!("tasks_assigned_total").increment(1);
        info!(task_id = task.id, task_type = %task.task_type, "Task assigned");

        Ok(Some(AssignedTask::from_task(&task, lease_expires_at)))
    }

    /// 登记设备：新设备为 idle，离线设备恢复 idle，并刷新心跳
    async fn touch_device(&self, request: &RequestTaskRequest, now: DateTime<Utc>) -> Result<Device> {
        let device = sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (
                device_id, device_name, device_type, device_model, os_version, app_version, ip,
                status, last_heartbeat, last_active
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'idle', $8, $8)
            ON CONFLICT (device_id) DO UPDATE SET
                device_name = COALESCE(NULLIF(EXCLUDED.device_name, ''), devices.device_name),
                device_type = COALESCE(NULLIF(EXCLUDED.device_type, ''), devices.device_type),
                device_model = COALESCE(NULLIF(EXCLUDED.device_model, ''), devices.device_model),
                os_version = COALESCE(NULLIF(EXCLUDED.os_version, ''), devices.os_version),
                app_version = COALESCE(NULLIF(EXCLUDED.app_version, ''), devices.app_version),
                ip = COALESCE(NULLIF(EXCLUDED.ip, ''), devices.ip),
                status = CASE WHEN devices.status = 'offline' THEN 'idle'::device_status ELSE devices.status END,
                last_heartbeat = EXCLUDED.last_heartbeat,
                last_active = EXCLUDED.last_active,
                updated_at = EXCLUDED.last_active
            RETURNING *
            "#,
        )
        .bind(request.device_id.trim())
        .bind(&request.device_name)
        .bind(&request.device_type)
        .bind(&request.device_model)
        .bind(&request.os_version)
        .bind(&request.app_version)
        .bind(&request.ip)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(device)
    }

    /// 按优先级降序、创建时间升序选出一个到期、未过期且仍有名额的任务
    async fn select_candidate(tx: &mut PgTx, now: DateTime<Utc>) -> Result<Option<Task>> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            SELECT t.* FROM tasks t
            WHERE t.status IN ('waiting', 'running')
              AND t.executed_count + (
                    SELECT COUNT(*) FROM task_assignments a
                    WHERE a.task_id = t.id
                      AND a.finished_at IS NULL
                      AND a.lease_expires_at > $1
                  ) < t.execute_count
              AND (t.start_time IS NULL OR t.start_time <= $1)
              AND (t.start_time IS NULL OR t.start_time > $2)
            ORDER BY t.priority DESC, t.created_at ASC, t.id ASC
            LIMIT 1
            FOR UPDATE OF t SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(now - Duration::hours(EXPIRY_WINDOW_HOURS))
        .fetch_optional(&mut **tx)
        .await?;

        Ok(task)
    }

    async fn open_leases(tx: &mut PgTx, task_id: i64, now: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM task_assignments
            WHERE task_id = $1 AND finished_at IS NULL AND lease_expires_at > $2
            "#,
        )
        .bind(task_id)
        .bind(now)
        .fetch_one(&mut **tx)
        .await?;

        Ok(count)
    }

    /// 设备 24 小时内是否执行过同一 SKU
    async fn recently_executed(
        tx: &mut PgTx,
        device_id: &str,
        sku: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM device_task_history
                WHERE device_id = $1 AND sku = $2 AND execute_time > $3
            )
            "#,
        )
        .bind(device_id)
        .bind(sku)
        .bind(now - Duration::hours(EXPIRY_WINDOW_HOURS))
        .fetch_one(&mut **tx)
        .await?;

        Ok(exists)
    }
}
