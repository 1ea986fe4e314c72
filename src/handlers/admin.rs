//! 管理员处理器
//! 余额调整、代理统计与手动触发过期结算

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    auth::AuthContext,
    error::{AppError, Result},
    handlers::success,
    middleware::AppState,
    models::ledger::AdjustBalanceRequest,
    models::user::Caller,
};

fn require_admin(caller: &Caller) -> Result<()> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// 调整用户京豆余额
pub async fn adjust_balance(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    auth: AuthContext,
    Json(request): Json<AdjustBalanceRequest>,
) -> Result<impl IntoResponse> {
    let log = state
        .ledger
        .adjust_balance(&auth.caller, user_id, request)
        .await?;
    Ok(success(log))
}

/// 代理统计
pub async fn proxy_statistics(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    require_admin(&auth.caller)?;
    let stats = state.proxies.statistics().await?;
    Ok(success(stats))
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub limit: Option<i64>,
}

/// 代理最近的分配记录
pub async fn proxy_usage(
    State(state): State<Arc<AppState>>,
    Path(proxy_id): Path<i64>,
    Query(query): Query<UsageQuery>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    require_admin(&auth.caller)?;
    let logs = state
        .proxies
        .usage_logs(proxy_id, query.limit.unwrap_or(50))
        .await?;
    Ok(success(logs))
}

/// 立即执行一轮过期结算
pub async fn run_expiry_sweep(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    require_admin(&auth.caller)?;
    let report = state.expiry.run_once().await?;
    Ok(success(report))
}
