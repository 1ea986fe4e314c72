//! 任务处理器

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    auth::AuthContext,
    error::Result,
    handlers::success,
    middleware::AppState,
    models::task::*,
};

/// 创建任务
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse> {
    let task = state.tasks.create_task(&auth.caller, request).await?;
    Ok((StatusCode::CREATED, success(task)))
}

/// 批量创建任务
pub async fn batch_create_tasks(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<BatchCreateTaskRequest>,
) -> Result<impl IntoResponse> {
    let tasks = state.tasks.batch_create(&auth.caller, request.tasks).await?;
    Ok((StatusCode::CREATED, success(tasks)))
}

/// 基于模板快速创建
pub async fn quick_create_task(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(request): Json<QuickCreateTaskRequest>,
) -> Result<impl IntoResponse> {
    let task = state.tasks.quick_create(&auth.caller, request).await?;
    Ok((StatusCode::CREATED, success(task)))
}

/// 任务列表
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(filters): Query<TaskListFilters>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    let page = state.tasks.list_tasks(&auth.caller, filters).await?;
    Ok(success(page))
}

/// 任务详情
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    let task = state.tasks.get_task(&auth.caller, task_id).await?;
    Ok(success(task))
}

/// 修改任务或追加执行次数
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    auth: AuthContext,
    Json(request): Json<UpdateTaskRequest>,
) -> Result<impl IntoResponse> {
    let task = state.tasks.update_task(&auth.caller, task_id, request).await?;
    Ok(success(task))
}

/// 取消任务并退款
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    let task = state.tasks.cancel_task(&auth.caller, task_id).await?;
    Ok(success(task))
}

/// 任务执行日志
pub async fn task_logs(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<i64>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    let logs = state.tasks.task_logs(&auth.caller, task_id).await?;
    Ok(success(logs))
}

/// 当前用户的使用模板
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    let templates = state.tasks.list_templates(&auth.caller).await?;
    Ok(success(templates))
}
