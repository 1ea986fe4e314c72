//! 任务类型处理器

use axum::{
    extract::{Path, State},
    response::IntoResponse,
};
use std::sync::Arc;

use crate::{auth::AuthContext, error::AppError, error::Result, handlers::success, middleware::AppState};

/// 启用中的任务类型
pub async fn list_task_types(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
) -> Result<impl IntoResponse> {
    let types = state.task_types.list(true).await?;
    Ok(success(types))
}

/// 按代码查询任务类型
pub async fn get_task_type(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    _auth: AuthContext,
) -> Result<impl IntoResponse> {
    let task_type = state
        .task_types
        .find(&code)
        .await?
        .ok_or_else(|| AppError::TaskTypeInvalid(code))?;
    Ok(success(task_type))
}
