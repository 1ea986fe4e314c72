//! 代理分配集成测试（需要数据库）

use jd_task_platform::{error::AppError, models::proxy::AssignProxyRequest, services::ProxyService};
use serial_test::serial;
use std::sync::Arc;

mod common;
use common::{create_proxy, create_test_config, setup_test_db};

fn request(device_id: &str) -> AssignProxyRequest {
    AssignProxyRequest {
        device_id: device_id.to_string(),
        device_sn: format!("SN-{device_id}"),
    }
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_least_used_active_proxy_wins() {
    let pool = setup_test_db(&create_test_config()).await;
    let service = ProxyService::new(pool.clone());

    let busy = create_proxy(&pool, "10.0.0.1", 5, true).await;
    let idle = create_proxy(&pool, "10.0.0.2", 1, true).await;
    create_proxy(&pool, "10.0.0.3", 0, false).await;

    let assignment = service.assign(request("dev-1")).await.unwrap();
    assert_eq!(assignment.proxy_id, idle);
    assert_eq!(assignment.ip, "10.0.0.2");
    assert_eq!(assignment.password, "secret");

    let logs = service.usage_logs(idle, 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].device_id, "dev-1");
    assert_eq!(logs[0].device_sn, "SN-dev-1");
    assert_eq!(logs[0].port, 8080);

    assert!(service.usage_logs(busy, 10).await.unwrap().is_empty());
    assert!(matches!(
        service.usage_logs(9999, 10).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_ties_break_on_lowest_id() {
    let pool = setup_test_db(&create_test_config()).await;
    let service = ProxyService::new(pool.clone());

    let first = create_proxy(&pool, "10.0.0.1", 0, true).await;
    let second = create_proxy(&pool, "10.0.0.2", 0, true).await;

    assert_eq!(service.assign(request("a")).await.unwrap().proxy_id, first);
    assert_eq!(service.assign(request("b")).await.unwrap().proxy_id, second);
    assert_eq!(service.assign(request("c")).await.unwrap().proxy_id, first);
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_no_active_proxy() {
    let pool = setup_test_db(&create_test_config()).await;
    let service = ProxyService::new(pool.clone());
    create_proxy(&pool, "10.0.0.1", 0, false).await;

    let err = service.assign(request("dev-1")).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(ref msg) if msg == "no proxy available"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // 需要数据库
#[serial]
async fn test_concurrent_assignments_keep_exact_counts() {
    let pool = setup_test_db(&create_test_config()).await;
    let service = Arc::new(ProxyService::new(pool.clone()));
    create_proxy(&pool, "10.0.0.1", 0, true).await;
    create_proxy(&pool, "10.0.0.2", 0, true).await;

    let calls = (0..10).map(|i| {
        let service = service.clone();
        tokio::spawn(async move { service.assign(request(&format!("dev-{i}"))).await })
    });
    for result in futures::future::join_all(calls).await {
        result.unwrap().unwrap();
    }

    let stats = service.statistics().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 2);
    assert_eq!(stats.inactive, 0);
    assert_eq!(stats.total_usage, 10);
    assert!((stats.avg_usage - 5.0).abs() < f64::EPSILON);

    // 每次分配都有一条记录，计数不丢失
    let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM proxy_usage_logs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(logs, 10);
}
