//! 京豆任务平台主入口

use jd_task_platform::{
    config::AppConfig, db, handlers::health, middleware::AppState, routes,
    services::BackgroundTasks, telemetry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("jd-task-platform {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 按优先级加载：JD_ENV 指定的文件，否则 .env.local > .env.development > .env
    // 生产环境直接设置环境变量
    if let Ok(env) = std::env::var("JD_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env.development").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志
    telemetry::init_telemetry(&config.logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "JD task platform starting...");

    // 3. 数据库连接池 + 迁移
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 4. 应用状态与后台任务
    let state = Arc::new(AppState::new(config.clone(), db_pool));
    let background = BackgroundTasks::start(
        &config,
        state.expiry.clone(),
        state.devices.clone(),
        state.rate_limiter.clone(),
    );

    // 5. 启动服务器
    let app = routes::create_router(state);
    let listener = TcpListener::bind(&config.server.addr).await?;

    tracing::info!(addr = %config.server.addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(background.token()))
        .await?;

    // 6. 等待后台任务退出
    let timeout = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    if !background.shutdown(timeout).await {
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 收到退出信号后取消令牌，后台循环与 HTTP 服务一同停止
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
        _ = token.cancelled() => {
            tracing::info!("Shutdown requested");
        },
    }

    token.cancel();
}

/// 打印帮助信息
fn print_help() {
    println!("jd-task-platform {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: jd-task-platform [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 JD_ 前缀的环境变量完成");
    println!("  可用选项请参考 .env.example");
}
