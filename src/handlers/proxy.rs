//! 代理处理器

use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use crate::{
    auth::AuthContext, error::Result, handlers::success, middleware::AppState,
    models::proxy::AssignProxyRequest,
};

/// 为设备分配代理
pub async fn assign_proxy(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
    Json(request): Json<AssignProxyRequest>,
) -> Result<impl IntoResponse> {
    let assignment = state.proxies.assign(request).await?;
    Ok(success(assignment))
}
