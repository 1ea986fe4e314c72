//! 设备处理器
//! 设备轮询领取任务与回报执行结果

use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use crate::{
    auth::AuthContext,
    error::Result,
    handlers::success,
    middleware::AppState,
    models::device::{RequestTaskRequest, TaskFeedbackRequest},
};

/// 领取任务，无可执行任务时 data 为 null
pub async fn request_task(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
    Json(request): Json<RequestTaskRequest>,
) -> Result<impl IntoResponse> {
    let assigned = state.assignment.request_task(request).await?;
    Ok(success(assigned))
}

/// 回报执行结果
pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
    Json(request): Json<TaskFeedbackRequest>,
) -> Result<impl IntoResponse> {
    let outcome = state.feedback.submit_feedback(request).await?;
    Ok(success(outcome))
}
