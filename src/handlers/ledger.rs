//! 京豆账本处理器

use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Serialize;
use std::sync::Arc;

use crate::{
    auth::AuthContext, error::Result, handlers::success, middleware::AppState,
    models::ledger::LedgerQuery,
};

#[derive(Serialize)]
pub struct BalanceResponse {
    pub user_id: i64,
    pub balance: i64,
}

/// 当前余额
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    let user_id = auth.caller.user_id;
    let balance = state.ledger.get_balance(user_id).await?;
    Ok(success(BalanceResponse { user_id, balance }))
}

/// 京豆流水
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LedgerQuery>,
    auth: AuthContext,
) -> Result<impl IntoResponse> {
    let page = state.ledger.list_logs(auth.caller.user_id, &query).await?;
    Ok(success(page))
}
