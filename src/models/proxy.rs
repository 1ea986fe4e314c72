//! 代理模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 出口代理
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Proxy {
    pub id: i64,
    pub ip: String,
    pub port: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub province: String,
    pub city: String,
    pub isp: String,
    pub remark: String,
    /// 只增不减
    pub usage_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 代理分配记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProxyUsageLog {
    pub id: i64,
    pub proxy_id: i64,
    pub device_id: String,
    pub device_sn: String,
    pub ip: String,
    pub port: i32,
    pub assigned_at: DateTime<Utc>,
}

/// 代理分配请求
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssignProxyRequest {
    #[validate(length(min = 1, max = 128, message = "设备ID不能为空"))]
    pub device_id: String,
    #[serde(default)]
    pub device_sn: String,
}

/// 分配给设备的代理
#[derive(Debug, Clone, Serialize)]
pub struct ProxyAssignment {
    pub proxy_id: i64,
    pub ip: String,
    pub port: i32,
    pub username: String,
    pub password: String,
}

impl From<&Proxy> for ProxyAssignment {
    fn from(proxy: &Proxy) -> Self {
        Self {
            proxy_id: proxy.id,
            ip: proxy.ip.clone(),
            port: proxy.port,
            username: proxy.username.clone(),
            password: proxy.password.clone(),
        }
    }
}

/// 代理统计
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProxyStatistics {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub total_usage: i64,
    pub avg_usage: f64,
}
