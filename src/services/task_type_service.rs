//! 任务类型注册表
//! 创建类操作都先经由这里校验类型是否存在、是否启用，以及当前是否处于允许的创建时段

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use sqlx::{Pool, Postgres};
use tracing::{error, instrument};

use crate::error::{AppError, Result};
use crate::models::task_type::{check_time_slots, SlotCheck, TaskType};
use crate::repository::TaskTypeRepository;

pub struct TaskTypeService {
    repo: TaskTypeRepository,
    /// 业务时区，时段按该时区的墙钟时间判断
    business_tz: FixedOffset,
}

impl TaskTypeService {
    pub fn new(db: Pool<Postgres>, utc_offset_hours: i32) -> Self {
        let business_tz =
            FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix());
        Self {
            repo: TaskTypeRepository::new(db),
            business_tz,
        }
    }

    /// 获取可用的任务类型：不存在返回 TaskTypeInvalid，停用返回 TaskTypeDisabled
    #[instrument(skip(self))]
    pub async fn get_active_task_type(&self, code: &str) -> Result<TaskType> {
        let task_type = self
            .repo
            .find_by_code(code)
            .await?
            .ok_or_else(|| AppError::TaskTypeInvalid(code.to_string()))?;

        if !task_type.is_active {
            return Err(AppError::TaskTypeDisabled(code.to_string()));
        }

        Ok(task_type)
    }

    /// 按代码查找，不校验启用状态
    pub async fn find(&self, code: &str) -> Result<Option<TaskType>> {
        self.repo.find_by_code(code).await
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<TaskType>> {
        self.repo.list(active_only).await
    }

    /// 业务时区的当前时刻
    pub fn local_time_now(&self) -> NaiveTime {
        Utc::now().with_timezone(&self.business_tz).time()
    }

    /// 校验创建时段，管理员不受限制
    pub fn ensure_creation_window(
        &self,
        task_type: &TaskType,
        is_admin: bool,
        local_time: NaiveTime,
    ) -> Result<()> {
        if is_admin {
            return Ok(());
        }

        let windows = task_type.time_windows().map_err(|e| {
            error!(type_code = %task_type.type_code, error = %e, "Invalid time slot configuration");
            AppError::internal_error("invalid time slot configuration")
        })?;

        match check_time_slots(&windows, local_time) {
            SlotCheck::Allowed => Ok(()),
            SlotCheck::Denied(slots) => Err(AppError::TimeSlotLimit(slots)),
        }
    }
}
