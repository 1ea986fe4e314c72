//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer};

use crate::{handlers, middleware::AppState};

/// 请求体上限
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::metrics::metrics_export));

    // 需要 API Key 的路由
    let api_routes = Router::new()
        // 任务类型
        .route("/task-types", get(handlers::task_type::list_task_types))
        .route("/task-types/{code}", get(handlers::task_type::get_task_type))

        // 任务
        .route(
            "/tasks",
            get(handlers::task::list_tasks).post(handlers::task::create_task),
        )
        .route("/tasks/batch", post(handlers::task::batch_create_tasks))
        .route("/tasks/quick", post(handlers::task::quick_create_task))
        .route(
            "/tasks/{id}",
            get(handlers::task::get_task).put(handlers::task::update_task),
        )
        .route("/tasks/{id}/cancel", post(handlers::task::cancel_task))
        .route("/tasks/{id}/logs", get(handlers::task::task_logs))
        .route("/templates", get(handlers::task::list_templates))

        // 京豆
        .route("/jingdou/balance", get(handlers::ledger::get_balance))
        .route("/jingdou/logs", get(handlers::ledger::list_logs))

        // 设备
        .route("/devices/request-task", post(handlers::device::request_task))
        .route("/devices/feedback", post(handlers::device::submit_feedback))

        // 代理
        .route("/proxies/assign", post(handlers::proxy::assign_proxy))

        // 管理
        .route("/admin/users/{id}/jingdou", post(handlers::admin::adjust_balance))
        .route("/admin/proxies/statistics", get(handlers::admin::proxy_statistics))
        .route("/admin/proxies/{id}/usage", get(handlers::admin::proxy_usage))
        .route("/admin/tasks/expire", post(handlers::admin::run_expiry_sweep))
        // 后添加的层先执行：先认证，再按用户限流
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::api_key_auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1", api_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
