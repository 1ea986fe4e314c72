//! 过期结算集成测试（需要数据库）

use chrono::{Duration, Utc};
use jd_task_platform::{
    error::AppError,
    models::{
        ledger::OperationType,
        task::{CreateTaskRequest, TaskStatus},
        user::UserRole,
    },
    services::{ExpirySweeper, LedgerService, TaskService, TaskTypeService},
};
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;

mod common;
use common::{balance_of, create_task_type, create_test_config, create_user, setup_test_db, task_status, TaskFixture};

fn sweeper(pool: &PgPool) -> ExpirySweeper {
    ExpirySweeper::new(pool.clone(), Arc::new(TaskTypeService::new(pool.clone(), 8)))
}

fn expired_fixture(user_id: i64, sku: &str, execute: i32, executed: i32, consume: i64) -> TaskFixture<'_> {
    let mut fixture = TaskFixture::new(user_id, "t_browse", sku, execute);
    fixture.executed_count = executed;
    fixture.consume_jingdou = consume;
    fixture.status = TaskStatus::Running;
    fixture.start_time = Some(Utc::now() - Duration::hours(25));
    fixture
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_prorated_refund_and_partial_completion() {
    let pool = setup_test_db(&create_test_config()).await;
    let ledger = LedgerService::new(pool.clone());
    create_task_type(&pool, "t_browse", 10, 1).await;
    let user = create_user(&pool, "alice", UserRole::User, 0).await;

    let task_id = expired_fixture(user.user_id, "SKU-1", 3, 1, 100).insert(&pool).await;

    let report = sweeper(&pool).run_once().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 0);
    // 100 * 2 / 3 向下取整
    assert_eq!(report.refunded, 66);

    assert_eq!(balance_of(&pool, user.user_id).await, 66);
    assert_eq!(task_status(&pool, task_id).await, (TaskStatus::PartialCompleted, 1));

    let entries = ledger.entries_for_task(task_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation_type, OperationType::Refund);
    assert_eq!(entries[0].amount, 66);
    assert_eq!(entries[0].remark, "任务过期自动退款 - SKU:SKU-1 (完成1/3)");

    let remark: String = sqlx::query_scalar("SELECT remark FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(remark.contains("66"));

    // 再次扫描不会重复退款
    let report = sweeper(&pool).run_once().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(balance_of(&pool, user.user_id).await, 66);
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_untouched_tasks_are_skipped() {
    let pool = setup_test_db(&create_test_config()).await;
    create_task_type(&pool, "t_browse", 10, 1).await;
    let user = create_user(&pool, "bob", UserRole::User, 0).await;

    // 未满 24 小时
    let mut recent = expired_fixture(user.user_id, "RECENT", 5, 0, 50);
    recent.start_time = Some(Utc::now() - Duration::hours(23));
    let recent = recent.insert(&pool).await;

    // 已完成
    let mut done = expired_fixture(user.user_id, "DONE", 2, 2, 20);
    done.status = TaskStatus::Completed;
    let done = done.insert(&pool).await;

    // 没有开始时间
    let mut open = expired_fixture(user.user_id, "OPEN", 2, 0, 20);
    open.start_time = None;
    let open = open.insert(&pool).await;

    let report = sweeper(&pool).run_once().await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(balance_of(&pool, user.user_id).await, 0);

    assert_eq!(task_status(&pool, recent).await.0, TaskStatus::Running);
    assert_eq!(task_status(&pool, done).await.0, TaskStatus::Completed);
    assert_eq!(task_status(&pool, open).await.0, TaskStatus::Running);
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_untouched_task_gets_full_refund_and_leases_close() {
    let pool = setup_test_db(&create_test_config()).await;
    create_task_type(&pool, "t_browse", 10, 1).await;
    let user = create_user(&pool, "carol", UserRole::User, 0).await;

    let mut waiting = expired_fixture(user.user_id, "SKU-2", 4, 0, 40);
    waiting.status = TaskStatus::Waiting;
    let task_id = waiting.insert(&pool).await;

    sqlx::query(
        "INSERT INTO task_assignments (task_id, device_id, lease_expires_at) VALUES ($1, 'dev-1', NOW() + INTERVAL '10 minutes')",
    )
    .bind(task_id)
    .execute(&pool)
    .await
    .unwrap();

    let report = sweeper(&pool).run_once().await.unwrap();
    assert_eq!(report.refunded, 40);
    assert_eq!(balance_of(&pool, user.user_id).await, 40);

    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM task_assignments WHERE task_id = $1 AND finished_at IS NULL",
    )
    .bind(task_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open, 0);
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_one_failure_does_not_stop_the_pass() {
    let pool = setup_test_db(&create_test_config()).await;
    create_task_type(&pool, "t_browse", 10, 1).await;
    let user = create_user(&pool, "dave", UserRole::User, 0).await;

    // 任务类型已不存在，结算失败
    let mut orphan = expired_fixture(user.user_id, "ORPHAN", 2, 0, 20);
    orphan.task_type = "removed_type";
    let orphan = orphan.insert(&pool).await;
    let healthy = expired_fixture(user.user_id, "OK", 2, 1, 20).insert(&pool).await;

    let report = sweeper(&pool).run_once().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(report.refunded, 10);

    assert_eq!(task_status(&pool, orphan).await.0, TaskStatus::Running);
    assert_eq!(task_status(&pool, healthy).await.0, TaskStatus::PartialCompleted);
}

/// 把任务的开始时间挪到 25 小时前
async fn backdate(pool: &PgPool, task_id: i64) {
    sqlx::query("UPDATE tasks SET start_time = NOW() - INTERVAL '25 hours' WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await
        .unwrap();
}

fn browse_request(sku: &str, execute_count: i32) -> CreateTaskRequest {
    CreateTaskRequest {
        task_type: "t_browse".to_string(),
        sku: sku.to_string(),
        shop_name: String::new(),
        keyword: String::new(),
        start_time: None,
        execute_count,
        priority: 0,
        remark: String::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // 需要数据库
#[serial]
async fn test_cancel_racing_sweep_refunds_once() {
    let pool = setup_test_db(&create_test_config()).await;
    create_task_type(&pool, "t_browse", 4, 1).await;
    let user = create_user(&pool, "erin", UserRole::User, 1200).await;
    let registry = Arc::new(TaskTypeService::new(pool.clone(), 8));
    let tasks = Arc::new(TaskService::new(pool.clone(), registry.clone()));
    let ledger = LedgerService::new(pool.clone());

    let mut ids = Vec::new();
    for i in 0..30 {
        let task = tasks
            .create_task(&user, browse_request(&format!("SKU-{i}"), 10))
            .await
            .unwrap();
        backdate(&pool, task.id).await;
        ids.push(task.id);
    }
    assert_eq!(balance_of(&pool, user.user_id).await, 0);

    let sweep = {
        let sweeper = ExpirySweeper::new(pool.clone(), registry.clone());
        tokio::spawn(async move { sweeper.run_once().await })
    };
    let cancels = ids.iter().map(|&id| {
        let tasks = tasks.clone();
        let user = user.clone();
        tokio::spawn(async move { tasks.cancel_task(&user, id).await })
    });

    for result in futures::future::join_all(cancels).await {
        match result.unwrap() {
            Ok(task) => assert_eq!(task.status, TaskStatus::Cancelled),
            Err(AppError::PreconditionFailed(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    let report = sweep.await.unwrap().unwrap();
    assert_eq!(report.failed, 0);

    for id in ids {
        let refunds = ledger
            .entries_for_task(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.operation_type == OperationType::Refund)
            .count();
        assert_eq!(refunds, 1, "task {id}");

        let (status, _) = task_status(&pool, id).await;
        assert!(matches!(status, TaskStatus::Cancelled | TaskStatus::PartialCompleted));
    }

    // 未执行的任务无论取消还是过期都是全额退还
    assert_eq!(balance_of(&pool, user.user_id).await, 1200);
    assert!(ledger.summary(user.user_id).await.unwrap().is_consistent());
}
