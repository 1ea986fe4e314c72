//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::Secret;
use serde::Deserialize;

/// 派发租约上限（秒），不超过任务的 24 小时有效期
pub const MAX_ASSIGNMENT_LEASE_SECS: u64 = 24 * 60 * 60;

/// 设备离线阈值上限（秒）
pub const MAX_DEVICE_OFFLINE_AFTER_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

/// 后台任务与调度参数
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// 过期任务扫描间隔（秒）
    pub expiry_sweep_interval_secs: u64,
    /// 设备离线扫描间隔（秒）
    pub device_sweep_interval_secs: u64,
    /// 心跳超过该时长视为离线（秒）
    pub device_offline_after_secs: u64,
    /// 任务派发租约时长（秒），设备未回报时租约到期后名额释放
    pub assignment_lease_secs: u64,
    /// 业务时区相对 UTC 的小时偏移，用于创建时段判断
    pub utc_offset_hours: i32,
}

/// API Key 限流参数
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// 时间窗口内允许的最大调用次数
    pub max_calls: u32,
    /// 时间窗口（毫秒）
    pub window_ms: u64,
    /// 清理间隔（秒）
    pub cleanup_interval_secs: u64,
    /// 空闲超过该时长的 key 会被清理（秒）
    pub idle_evict_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub rate_limit: RateLimitSettings,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("scheduler.expiry_sweep_interval_secs", 60)?
            .set_default("scheduler.device_sweep_interval_secs", 30)?
            .set_default("scheduler.device_offline_after_secs", 180)?
            .set_default("scheduler.assignment_lease_secs", 600)?
            .set_default("scheduler.utc_offset_hours", 8)?
            .set_default("rate_limit.max_calls", 2)?
            .set_default("rate_limit.window_ms", 1000)?
            .set_default("rate_limit.cleanup_interval_secs", 300)?
            .set_default("rate_limit.idle_evict_secs", 600)?;

        // 从环境变量加载配置（前缀为 JD_）
        settings = settings.add_source(
            Environment::with_prefix("JD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        let scheduler = &self.scheduler;
        if scheduler.expiry_sweep_interval_secs == 0
            || scheduler.device_sweep_interval_secs == 0
            || scheduler.device_offline_after_secs == 0
            || scheduler.assignment_lease_secs == 0
        {
            return Err(ConfigError::Message(
                "scheduler intervals must be greater than 0".to_string(),
            ));
        }

        if scheduler.assignment_lease_secs > MAX_ASSIGNMENT_LEASE_SECS {
            return Err(ConfigError::Message(format!(
                "assignment_lease_secs must be <= {}",
                MAX_ASSIGNMENT_LEASE_SECS
            )));
        }

        if scheduler.device_offline_after_secs > MAX_DEVICE_OFFLINE_AFTER_SECS {
            return Err(ConfigError::Message(format!(
                "device_offline_after_secs must be <= {}",
                MAX_DEVICE_OFFLINE_AFTER_SECS
            )));
        }

        if !(-12..=14).contains(&scheduler.utc_offset_hours) {
            return Err(ConfigError::Message(
                "utc_offset_hours must be between -12 and 14".to_string(),
            ));
        }

        if self.rate_limit.max_calls == 0
            || self.rate_limit.window_ms == 0
            || self.rate_limit.cleanup_interval_secs == 0
        {
            return Err(ConfigError::Message(
                "rate_limit max_calls, window_ms and cleanup_interval_secs must be greater than 0"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
