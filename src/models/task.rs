//! 任务领域模型
//! 生命周期状态机、任务实体、请求 DTO 以及退款与备注的纯计算

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::task_type::SEARCH_BROWSE;

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待派发
    Waiting,
    /// 已派发，等待设备回报
    Running,
    /// 全部执行完成
    Completed,
    /// 过期时未完成，已按比例退款
    PartialCompleted,
    /// 用户取消，已全额退款
    Cancelled,
    /// 管理员标记失败
    Failed,
}

impl TaskStatus {
    /// 除 waiting 与 running 外均为终态
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Waiting | TaskStatus::Running)
    }

    /// 状态迁移表
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Waiting, Running) | (Running, Running) => true,
            (Running, Waiting) => true,
            (Waiting, Completed) | (Running, Completed) => true,
            (Waiting, Cancelled) => true,
            (Waiting, PartialCompleted) | (Running, PartialCompleted) => true,
            (Waiting, Failed) | (Running, Failed) => true,
            (Waiting, _) | (Running, _) => false,
            (Completed, _) | (PartialCompleted, _) | (Cancelled, _) | (Failed, _) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::PartialCompleted => "partial_completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub task_type: String,
    pub sku: String,
    pub shop_name: String,
    /// 仅 search_browse 类型非空
    pub keyword: String,
    /// 最早可执行时间，同时是 24 小时过期窗口的起点
    pub start_time: Option<DateTime<Utc>>,
    pub execute_count: i32,
    pub executed_count: i32,
    pub priority: i32,
    pub status: TaskStatus,
    /// 创建与追加时累计扣除的京豆，管理员任务为 0
    pub consume_jingdou: i64,
    pub remark: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务执行日志
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskLog {
    pub id: i64,
    pub task_id: i64,
    pub device_id: Option<String>,
    pub status: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// 创建任务请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, max = 64, message = "任务类型不能为空"))]
    pub task_type: String,
    #[validate(length(min = 1, max = 64, message = "SKU不能为空"))]
    pub sku: String,
    #[serde(default)]
    pub shop_name: String,
    #[serde(default)]
    pub keyword: String,
    pub start_time: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "执行次数必须大于0"))]
    pub execute_count: i32,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub remark: String,
}

/// 批量创建任务请求
#[derive(Debug, Clone, Deserialize)]
pub struct BatchCreateTaskRequest {
    pub tasks: Vec<CreateTaskRequest>,
}

/// 快速创建任务请求：指定模板或直接给出 SKU 与类型
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuickCreateTaskRequest {
    pub template_id: Option<i64>,
    pub sku: Option<String>,
    pub task_type: Option<String>,
    pub shop_name: Option<String>,
    pub keyword: Option<String>,
    pub execute_count: i32,
    pub start_time: Option<DateTime<Utc>>,
}

/// 更新任务请求（追加执行次数或修改参数）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub execute_count: Option<i32>,
    pub keyword: Option<String>,
    pub shop_name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub priority: Option<i32>,
}

/// 任务查询过滤器
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListFilters {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub sku: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl TaskListFilters {
    /// 归一化分页参数，返回 (page, page_size, offset)
    pub fn pagination(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self.page_size.unwrap_or(20).clamp(1, 100);
        (page, page_size, (page - 1) * page_size)
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// 关键词归一化：search_browse 必须有关键词，其余类型强制清空
pub fn normalize_keyword(task_type: &str, keyword: &str) -> Result<String, &'static str> {
    let keyword = keyword.trim();
    if task_type == SEARCH_BROWSE {
        if keyword.is_empty() {
            return Err("关键词搜索任务(search_browse)必须填写关键词");
        }
        Ok(keyword.to_string())
    } else {
        Ok(String::new())
    }
}

/// 过期按比例退款：consume × remaining / execute_count，整数除法，余数不退
pub fn prorated_refund(consume_jingdou: i64, execute_count: i32, executed_count: i32) -> i64 {
    if consume_jingdou <= 0 || execute_count <= 0 {
        return 0;
    }
    let remaining = i64::from((execute_count - executed_count).max(0));
    consume_jingdou * remaining / i64::from(execute_count)
}

/// 设备回报后的执行进度与下一状态
pub fn feedback_outcome(
    executed_count: i32,
    execute_count: i32,
    multiplier: i32,
) -> (i32, TaskStatus) {
    let executed = (executed_count + multiplier.max(1)).min(execute_count);
    if executed >= execute_count {
        (executed, TaskStatus::Completed)
    } else {
        (executed, TaskStatus::Waiting)
    }
}

/// 追加系统备注，保留原有内容
pub fn append_remark(existing: &str, note: &str) -> String {
    if existing.trim().is_empty() {
        note.to_string()
    } else {
        format!("{} | {}", existing, note)
    }
}

/// 过期处理的系统备注
pub fn expiry_note(executed_count: i32, execute_count: i32, refund: i64) -> String {
    let mut note = format!(
        "【系统自动处理】任务过期，完成{}/{}次",
        executed_count, execute_count
    );
    if refund > 0 {
        note.push_str(&format!("，退还{}京豆", refund));
    }
    note
}
