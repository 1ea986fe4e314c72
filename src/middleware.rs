//! HTTP 中间件与应用状态
//! 请求追踪、API Key 限流

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{RateLimiter, SlidingWindowRateLimiter};
use crate::repository::UserRepository;
use crate::services::{
    AssignmentService, DeviceSweeper, ExpirySweeper, FeedbackService, LedgerService, ProxyService,
    TaskService, TaskTypeService,
};

/// 应用状态
///
/// 服务均以 Arc 共享，Clone 只是指针拷贝
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: sqlx::PgPool,
    pub users: Arc<UserRepository>,
    pub ledger: Arc<LedgerService>,
    pub task_types: Arc<TaskTypeService>,
    pub tasks: Arc<TaskService>,
    pub assignment: Arc<AssignmentService>,
    pub feedback: Arc<FeedbackService>,
    pub expiry: Arc<ExpirySweeper>,
    pub devices: Arc<DeviceSweeper>,
    pub proxies: Arc<ProxyService>,
    /// 限流端口，默认进程内滑动窗口
    pub rate_limiter: Arc<dyn RateLimiter>,
}

impl AppState {
    pub fn new(config: AppConfig, db: sqlx::PgPool) -> Self {
        let scheduler = &config.scheduler;
        let task_types = Arc::new(TaskTypeService::new(db.clone(), scheduler.utc_offset_hours));
        let rate_limiter: Arc<dyn RateLimiter> =
            Arc::new(SlidingWindowRateLimiter::from_settings(&config.rate_limit));

        Self {
            users: Arc::new(UserRepository::new(db.clone())),
            ledger: Arc::new(LedgerService::new(db.clone())),
            tasks: Arc::new(TaskService::new(db.clone(), task_types.clone())),
            assignment: Arc::new(AssignmentService::new(
                db.clone(),
                scheduler.assignment_lease_secs,
            )),
            feedback: Arc::new(FeedbackService::new(db.clone())),
            expiry: Arc::new(ExpirySweeper::new(db.clone(), task_types.clone())),
            devices: Arc::new(DeviceSweeper::new(
                db.clone(),
                scheduler.device_offline_after_secs,
            )),
            proxies: Arc::new(ProxyService::new(db.clone())),
            task_types,
            rate_limiter,
            config,
            db,
        }
    }

    /// 替换限流实现
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }
}

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();

    let method = req.method().clone();
    let uri = req.uri().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();

        let mut response = next.run(req).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        // 指标标签只使用静态字符串
        let method_name = match method.as_str() {
            "GET" => "GET",
            "POST" => "POST",
            "PUT" => "PUT",
            "DELETE" => "DELETE",
            _ => "OTHER",
        };
        let status_class = match status {
            200..=299 => "2xx",
            400 => "400",
            401 => "401",
            403 => "403",
            404 => "404",
            409 => "409",
            429 => "429",
            400..=499 => "4xx",
            _ => "5xx",
        };

        metrics::counter!("http_requests_total", "method" => method_name, "status" => status_class)
            .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 限流中间件，按认证用户计数，须位于认证中间件之内
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = match req.extensions().get::<AuthContext>() {
        Some(ctx) => format!("user:{}", ctx.caller.user_id),
        None => return Err(AppError::Unauthorized),
    };

    if !state.rate_limiter.try_acquire(&key).await {
        tracing::debug!(key = %key, "Rate limit exceeded");
        return Err(AppError::RateLimitExceeded);
    }

    Ok(next.run(req).await)
}
