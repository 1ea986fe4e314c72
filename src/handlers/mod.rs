//! HTTP 处理器模块

use axum::Json;
use serde::Serialize;

pub mod admin;
pub mod device;
pub mod health;
pub mod ledger;
pub mod metrics;
pub mod proxy;
pub mod task;
pub mod task_type;

/// 成功响应外形，与错误响应共用 {code, msg, data}
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub msg: &'static str,
    pub data: T,
}

/// 包装成功响应
pub fn success<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 200,
        msg: "success",
        data,
    })
}
