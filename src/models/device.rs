//! 设备模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::task::Task;

/// 设备状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Idle,
    Working,
    Offline,
}

/// 设备
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub id: i64,
    pub device_id: String,
    pub device_name: String,
    pub device_type: String,
    pub device_model: String,
    pub os_version: String,
    pub app_version: String,
    pub ip: String,
    pub status: DeviceStatus,
    pub is_blocked: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    pub last_task_time: Option<DateTime<Utc>>,
    pub task_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 设备执行历史，用于 24 小时同 SKU 防重
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceTaskHistory {
    pub id: i64,
    pub device_id: String,
    pub task_id: i64,
    pub sku: String,
    pub execute_time: DateTime<Utc>,
    pub status: String,
}

/// 设备领取任务请求
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RequestTaskRequest {
    #[validate(length(min = 1, max = 128, message = "设备ID不能为空"))]
    pub device_id: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub device_model: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub ip: String,
}

/// 派发给设备的任务
#[derive(Debug, Clone, Serialize)]
pub struct AssignedTask {
    pub task_id: i64,
    pub task_type: String,
    pub sku: String,
    pub shop_name: String,
    pub keyword: String,
    pub priority: i32,
    pub lease_expires_at: DateTime<Utc>,
}

impl AssignedTask {
    pub fn from_task(task: &Task, lease_expires_at: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            task_type: task.task_type.clone(),
            sku: task.sku.clone(),
            shop_name: task.shop_name.clone(),
            keyword: task.keyword.clone(),
            priority: task.priority,
            lease_expires_at,
        }
    }
}

/// 设备回报的执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionResult {
    Success,
    Failed,
}

impl ExecutionResult {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionResult::Success => "success",
            ExecutionResult::Failed => "failed",
        }
    }
}

/// 设备回报请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TaskFeedbackRequest {
    #[validate(length(min = 1, max = 128, message = "设备ID不能为空"))]
    pub device_id: String,
    pub task_id: i64,
    pub status: ExecutionResult,
    #[serde(default)]
    pub message: String,
}

/// 回报处理结果
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackOutcome {
    pub task_id: i64,
    pub executed_count: i32,
    pub execute_count: i32,
    pub status: super::task::TaskStatus,
    /// 任务已处于终态时回报只被记录，不推进计数
    pub counted: bool,
}
