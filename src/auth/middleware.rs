//! API Key 认证中间件

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::auth::api_key::{hash_api_key, API_KEY_HEADER};
use crate::error::AppError;
use crate::middleware::AppState;
use crate::models::user::Caller;

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub caller: Caller,
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// 从请求头提取 API Key
pub fn extract_api_key(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

/// API Key 认证中间件
pub async fn api_key_auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = extract_api_key(req.headers())?;
    let key_hash = hash_api_key(&key);

    let user = state
        .users
        .find_by_api_key_hash(&key_hash)
        .await?
        .ok_or_else(|| {
            debug!("Unknown API key");
            AppError::Unauthorized
        })?;

    if !user.is_active {
        warn!(user_id = user.id, "Inactive user presented an API key");
        return Err(AppError::Forbidden);
    }

    // 最近使用时间异步更新，失败不影响请求
    let users = state.users.clone();
    let user_id = user.id;
    tokio::spawn(async move {
        if let Err(e) = users.touch_api_key(user_id).await {
            debug!(user_id, error = %e, "Failed to record API key usage");
        }
    });

    req.extensions_mut().insert(AuthContext {
        caller: Caller::from(&user),
    });

    Ok(next.run(req).await)
}
