//! 任务服务
//! 负责任务的创建、批量创建、快速创建、追加、取消与查询。
//! 每个会改动余额的操作都在一个事务内同时完成任务变更与账本记账。

use chrono::{DateTime, NaiveTime, Utc};
use sqlx::{Acquire, Pool, Postgres};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use crate::db::{self, PgTx};
use crate::error::{AppError, Result};
use crate::models::ledger::{LedgerEntry, OperationType};
use crate::models::task::*;
use crate::models::task_type::SEARCH_BROWSE;
use crate::models::template::{latest_keyword, TaskTemplate, TemplateUsage};
use crate::models::user::{Caller, UserRole};
use crate::repository::TemplateRepository;
use crate::services::ledger_service::LedgerService;
use crate::services::task_type_service::TaskTypeService;

/// 单次批量创建的上限
pub const MAX_BATCH_SIZE: usize = 100;

/// 校验通过、待写入的任务
#[derive(Debug, Clone)]
struct PreparedTask {
    task_type: String,
    sku: String,
    shop_name: String,
    keyword: String,
    start_time: Option<DateTime<Utc>>,
    execute_count: i32,
    priority: i32,
    remark: String,
    consume_jingdou: i64,
}

/// 任务服务
pub struct TaskService {
    db: Pool<Postgres>,
    registry: Arc<TaskTypeService>,
    templates: TemplateRepository,
}

impl TaskService {
    pub fn new(db: Pool<Postgres>, registry: Arc<TaskTypeService>) -> Self {
        Self {
            templates: TemplateRepository::new(db.clone()),
            db,
            registry,
        }
    }

    /// 创建任务
    #[instrument(skip(self, caller, request), fields(user_id = caller.user_id))]
    pub async fn create_task(&self, caller: &Caller, request: CreateTaskRequest) -> Result<Task> {
        let local_time = self.registry.local_time_now();
        self.create_task_at(caller, request, local_time).await
    }

    /// 以指定的业务时区时刻创建任务（时段判断使用该时刻）
    pub async fn create_task_at(
        &self,
        caller: &Caller,
        request: CreateTaskRequest,
        local_time: NaiveTime,
    ) -> Result<Task> {
        let prepared = self.prepare(caller, request, local_time).await?;
        self.ensure_balance(caller.user_id, prepared.consume_jingdou).await?;

        let mut tx = db::begin(&self.db).await?;
        let task = Self::insert_and_charge(&mut tx, caller, &prepared).await?;
        db::commit(tx).await?;

        metrics::counter!("tasks_created_total").increment(1);
        info!(
            task_id = task.id,
            task_type = %task.task_type,
            sku = %task.sku,
            consume = task.consume_jingdou,
            "Task created"
        );

        Ok(task)
    }

    /// 批量创建：全部校验通过且余额足够后，在同一事务内写入
    #[instrument(skip(self, caller, requests), fields(user_id = caller.user_id, count = requests.len()))]
    pub async fn batch_create(
        &self,
        caller: &Caller,
        requests: Vec<CreateTaskRequest>,
    ) -> Result<Vec<Task>> {
        if requests.is_empty() {
            return Err(AppError::validation("任务列表不能为空"));
        }
        if requests.len() > MAX_BATCH_SIZE {
            return Err(AppError::Validation(format!(
                "单次最多创建{}个任务",
                MAX_BATCH_SIZE
            )));
        }

        let local_time = self.registry.local_time_now();
        let mut prepared = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            let item = self
                .prepare(caller, request, local_time)
                .await
                .map_err(|e| match e {
                    AppError::Validation(msg) => {
                        AppError::Validation(format!("第{}个任务: {}", index + 1, msg))
                    }
                    other => other,
                })?;
            prepared.push(item);
        }

        let total: i64 = prepared.iter().map(|p| p.consume_jingdou).sum();
        self.ensure_balance(caller.user_id, total).await?;

        let mut tx = db::begin(&self.db).await?;
        let mut tasks = Vec::with_capacity(prepared.len());
        for item in &prepared {
            tasks.push(Self::insert_and_charge(&mut tx, caller, item).await?);
        }
        db::commit(tx).await?;

        metrics::counter!("tasks_created_total").increment(tasks.len() as u64);
        info!(count = tasks.len(), total_consume = total, "Batch tasks created");

        Ok(tasks)
    }

    /// 快速创建：基于模板或 SKU + 类型
    #[instrument(skip(self, caller, request), fields(user_id = caller.user_id))]
    pub async fn quick_create(
        &self,
        caller: &Caller,
        request: QuickCreateTaskRequest,
    ) -> Result<Task> {
        let template = match request.template_id {
            Some(template_id) => Some(
                self.templates
                    .find_for_user(template_id, caller.user_id)
                    .await?
                    .ok_or_else(|| AppError::not_found("template"))?,
            ),
            None => None,
        };

        let create = build_quick_request(request, template.as_ref())?;
        self.create_task(caller, create).await
    }

    /// 修改任务：追加执行次数（按差额扣费）或修改关键词、店铺、开始时间、优先级
    #[instrument(skip(self, caller, request), fields(user_id = caller.user_id))]
    pub async fn update_task(
        &self,
        caller: &Caller,
        task_id: i64,
        request: UpdateTaskRequest,
    ) -> Result<Task> {
        let mut tx = db::begin(&self.db).await?;

        let task = Self::lock_task(&mut tx, task_id).await?;
        if !caller.can_access(task.user_id) {
            return Err(AppError::Forbidden);
        }
        if task.status != TaskStatus::Waiting {
            return Err(AppError::precondition("只有等待中的任务可以修改"));
        }
        let now = Utc::now();
        if !task.start_time.is_some_and(|start| now < start) {
            return Err(AppError::precondition("任务已到开始时间，无法修改"));
        }
        if request.start_time.is_some_and(|start| start <= now) {
            return Err(AppError::validation("新的开始时间必须晚于当前时间"));
        }

        let keyword = match request.keyword.as_deref() {
            Some(keyword) if task.task_type != SEARCH_BROWSE => {
                if !keyword.trim().is_empty() {
                    return Err(AppError::validation(
                        "只有关键词搜索任务(search_browse)可以设置关键词",
                    ));
                }
                String::new()
            }
            Some(keyword) => normalize_keyword(&task.task_type, keyword)
                .map_err(AppError::validation)?,
            None => task.keyword.clone(),
        };

        let new_count = request.execute_count.unwrap_or(task.execute_count);
        if new_count < task.execute_count {
            return Err(AppError::validation("执行次数只能增加，不能减少"));
        }
        let extra = new_count - task.execute_count;

        let owner_role = sqlx::query_scalar::<_, UserRole>("SELECT role FROM users WHERE id = $1")
            .bind(task.user_id)
            .fetch_one(&mut *tx)
            .await?;

        let mut charge = 0;
        if extra > 0 {
            let task_type = self.registry.get_active_task_type(&task.task_type).await?;
            if owner_role != UserRole::Admin {
                charge = task_type.jingdou_price * i64::from(extra);
            }
        }

        if charge > 0 {
            LedgerService::debit(
                &mut tx,
                LedgerEntry::debit(
                    task.user_id,
                    charge,
                    OperationType::Consume,
                    Some(task.id),
                    format!("追加执行次数扣除 - SKU:{} (+{})", task.sku, extra),
                ),
            )
            .await?;
        }

        let shop_name = request.shop_name.clone().unwrap_or_else(|| task.shop_name.clone());
        let start_time = request.start_time.or(task.start_time);
        let priority = request.priority.unwrap_or(task.priority);

        let updated = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET execute_count = $2,
                consume_jingdou = consume_jingdou + $3,
                keyword = $4,
                shop_name = $5,
                start_time = $6,
                priority = $7,
                updated_at = NOW()
            WHERE id = $1 AND status = 'waiting'
            RETURNING *
            "#,
        )
        .bind(task.id)
        .bind(new_count)
        .bind(charge)
        .bind(&keyword)
        .bind(&shop_name)
        .bind(start_time)
        .bind(priority)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::precondition("只有等待中的任务可以修改"))?;

        if extra > 0 && owner_role != UserRole::Admin {
            Self::record_template_usage(
                &mut tx,
                &TemplateUsage {
                    user_id: updated.user_id,
                    task_type: &updated.task_type,
                    sku: &updated.sku,
                    shop_name: &updated.shop_name,
                    keyword: &updated.keyword,
                    count: extra,
                },
            )
            .await?;
        }

        db::commit(tx).await?;

        info!(
            task_id = updated.id,
            execute_count = updated.execute_count,
            charged = charge,
            "Task updated"
        );
        Ok(updated)
    }

    /// 取消任务：仅 waiting 可取消，全额退还 consume_jingdou
    #[instrument(skip(self, caller), fields(user_id = caller.user_id))]
    pub async fn cancel_task(&self, caller: &Caller, task_id: i64) -> Result<Task> {
        let mut tx = db::begin(&self.db).await?;

        let task = Self::lock_task(&mut tx, task_id).await?;
        if !caller.can_access(task.user_id) {
            return Err(AppError::Forbidden);
        }
        if !task.status.can_transition_to(TaskStatus::Cancelled) {
            return Err(AppError::PreconditionFailed(format!(
                "任务当前状态为 {}，只有等待中的任务可以取消",
                task.status
            )));
        }

        let note = if task.consume_jingdou > 0 {
            format!("用户取消，退还{}京豆", task.consume_jingdou)
        } else {
            "用户取消".to_string()
        };

        let cancelled = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = 'cancelled', remark = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'waiting'
            RETURNING *
            "#,
        )
        .bind(task.id)
        .bind(append_remark(&task.remark, &note))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::precondition("只有等待中的任务可以取消"))?;

        if task.consume_jingdou > 0 {
            LedgerService::credit(
                &mut tx,
                LedgerEntry::credit(
                    task.user_id,
                    task.consume_jingdou,
                    OperationType::Refund,
                    Some(task.id),
                    format!("取消任务退款 - SKU:{}", task.sku),
                ),
            )
            .await?;
        }

        insert_task_log(&mut tx, task.id, None, TaskStatus::Cancelled.as_str(), &note).await?;

        db::commit(tx).await?;

        if task.consume_jingdou > 0 {
            metrics::counter!("jingdou_refunded_total").increment(task.consume_jingdou as u64);
        }
        info!(task_id = task.id, refund = task.consume_jingdou, "Task cancelled");

        Ok(cancelled)
    }

    /// 查询任务详情
    #[instrument(skip(self, caller))]
    pub async fn get_task(&self, caller: &Caller, task_id: i64) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("task"))?;

        if !caller.can_access(task.user_id) {
            return Err(AppError::Forbidden);
        }
        Ok(task)
    }

    /// 查询任务列表，普通用户只能看到自己的任务
    #[instrument(skip(self, caller, filters))]
    pub async fn list_tasks(&self, caller: &Caller, filters: TaskListFilters) -> Result<Page<Task>> {
        let (page, page_size, offset) = filters.pagination();
        let owner = if caller.is_admin() {
            None
        } else {
            Some(caller.user_id)
        };

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM tasks
            WHERE ($1::BIGINT IS NULL OR user_id = $1)
              AND ($2::task_status IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR task_type = $3)
              AND ($4::TEXT IS NULL OR sku = $4)
            "#,
        )
        .bind(owner)
        .bind(filters.status)
        .bind(&filters.task_type)
        .bind(&filters.sku)
        .fetch_one(&self.db)
        .await?;

        let items = sqlx::query_as::<_, Task>(
            r#"
            SELECT * FROM tasks
            WHERE ($1::BIGINT IS NULL OR user_id = $1)
              AND ($2::task_status IS NULL OR status = $2)
              AND ($3::TEXT IS NULL OR task_type = $3)
              AND ($4::TEXT IS NULL OR sku = $4)
            ORDER BY created_at DESC, id DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(owner)
        .bind(filters.status)
        .bind(&filters.task_type)
        .bind(&filters.sku)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// 查询任务执行日志
    pub async fn task_logs(&self, caller: &Caller, task_id: i64) -> Result<Vec<TaskLog>> {
        self.get_task(caller, task_id).await?;

        let logs = sqlx::query_as::<_, TaskLog>(
            "SELECT * FROM task_logs WHERE task_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.db)
        .await?;

        Ok(logs)
    }

    /// 调用方的任务模板
    pub async fn list_templates(&self, caller: &Caller) -> Result<Vec<TaskTemplate>> {
        self.templates.list_for_user(caller.user_id).await
    }

    /// 校验请求并计算消耗；管理员不扣京豆、不受时段限制
    async fn prepare(
        &self,
        caller: &Caller,
        request: CreateTaskRequest,
        local_time: NaiveTime,
    ) -> Result<PreparedTask> {
        request.validate()?;

        let task_type = self.registry.get_active_task_type(&request.task_type).await?;
        let keyword =
            normalize_keyword(&task_type.type_code, &request.keyword).map_err(AppError::validation)?;

        self.registry
            .ensure_creation_window(&task_type, caller.is_admin(), local_time)?;

        let consume_jingdou = if caller.is_admin() {
            0
        } else {
            task_type.jingdou_price * i64::from(request.execute_count)
        };

        Ok(PreparedTask {
            task_type: task_type.type_code,
            sku: request.sku.trim().to_string(),
            shop_name: request.shop_name.trim().to_string(),
            keyword,
            start_time: request.start_time,
            execute_count: request.execute_count,
            priority: request.priority,
            remark: request.remark,
            consume_jingdou,
        })
    }

    /// 事务外的余额预检，给出明确的差额提示；事务内由账本再次加锁校验
    async fn ensure_balance(&self, user_id: i64, required: i64) -> Result<()> {
        if required <= 0 {
            return Ok(());
        }

        let balance = sqlx::query_scalar::<_, i64>("SELECT jingdou_balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("user"))?;

        if balance < required {
            return Err(AppError::InsufficientBalance { required, balance });
        }
        Ok(())
    }

    /// 写入任务、扣费、更新模板
    async fn insert_and_charge(
        tx: &mut PgTx,
        caller: &Caller,
        prepared: &PreparedTask,
    ) -> Result<Task> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (
                user_id, task_type, sku, shop_name, keyword, start_time,
                execute_count, executed_count, priority, status, consume_jingdou, remark
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, 'waiting', $9, $10)
            RETURNING *
            "#,
        )
        .bind(caller.user_id)
        .bind(&prepared.task_type)
        .bind(&prepared.sku)
        .bind(&prepared.shop_name)
        .bind(&prepared.keyword)
        .bind(prepared.start_time)
        .bind(prepared.execute_count)
        .bind(prepared.priority)
        .bind(prepared.consume_jingdou)
        .bind(&prepared.remark)
        .fetch_one(&mut **tx)
        .await?;

        if prepared.consume_jingdou > 0 {
            LedgerService::debit(
                tx,
                LedgerEntry::debit(
                    caller.user_id,
                    prepared.consume_jingdou,
                    OperationType::Task,
                    Some(task.id),
                    format!("创建任务扣除 - SKU:{}", task.sku),
                ),
            )
            .await?;
        }

        if !caller.is_admin() {
            Self::record_template_usage(
                tx,
                &TemplateUsage {
                    user_id: caller.user_id,
                    task_type: &task.task_type,
                    sku: &task.sku,
                    shop_name: &task.shop_name,
                    keyword: &task.keyword,
                    count: task.execute_count,
                },
            )
            .await?;
        }

        Ok(task)
    }

    /// 模板记录在保存点内执行，失败只回滚模板本身
    async fn record_template_usage(tx: &mut PgTx, usage: &TemplateUsage<'_>) -> Result<()> {
        let mut savepoint = Acquire::begin(&mut **tx).await?;
        match TemplateRepository::upsert(&mut savepoint, usage).await {
            Ok(()) => savepoint.commit().await?,
            Err(e) => {
                warn!(error = %e, sku = usage.sku, "Failed to record task template");
                savepoint.rollback().await?;
            }
        }
        Ok(())
    }

    async fn lock_task(tx: &mut PgTx, task_id: i64) -> Result<Task> {
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| AppError::not_found("task"))
    }
}

/// 写入任务日志
pub(crate) async fn insert_task_log(
    tx: &mut PgTx,
    task_id: i64,
    device_id: Option<&str>,
    status: &str,
    message: &str,
) -> Result<()> {
    sqlx::query("INSERT INTO task_logs (task_id, device_id, status, message) VALUES ($1, $2, $3, $4)")
        .bind(task_id)
        .bind(device_id)
        .bind(status)
        .bind(message)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// 由快速创建请求与模板组合出普通创建请求，请求中的字段优先
fn build_quick_request(
    request: QuickCreateTaskRequest,
    template: Option<&TaskTemplate>,
) -> Result<CreateTaskRequest> {
    if request.execute_count <= 0 {
        return Err(AppError::validation("执行次数必须大于0"));
    }

    let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

    let (sku, task_type, shop_name, keyword) = match template {
        Some(template) => (
            template.sku.clone(),
            non_empty(request.task_type).unwrap_or_else(|| template.task_type.clone()),
            non_empty(request.shop_name).unwrap_or_else(|| template.shop_name.clone()),
            non_empty(request.keyword)
                .unwrap_or_else(|| latest_keyword(&template.keyword).to_string()),
        ),
        None => {
            let sku = non_empty(request.sku).ok_or_else(|| AppError::validation("SKU不能为空"))?;
            let task_type = non_empty(request.task_type)
                .ok_or_else(|| AppError::validation("任务类型不能为空"))?;
            (
                sku,
                task_type,
                request.shop_name.unwrap_or_default(),
                request.keyword.unwrap_or_default(),
            )
        }
    };

    if task_type == SEARCH_BROWSE {
        if keyword.trim().is_empty() {
            return Err(AppError::validation(
                "关键词搜索任务(search_browse)必须填写关键词",
            ));
        }
        if shop_name.trim().is_empty() {
            return Err(AppError::validation(
                "关键词搜索任务(search_browse)必须填写店铺名称",
            ));
        }
    }

    Ok(CreateTaskRequest {
        task_type,
        sku,
        shop_name,
        keyword,
        start_time: request.start_time,
        execute_count: request.execute_count,
        priority: 0,
        remark: "快速创建".to_string(),
    })
}
