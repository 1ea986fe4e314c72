//! 京豆账本集成测试（需要数据库）

use chrono::{Duration, Utc};
use jd_task_platform::{
    db,
    error::AppError,
    models::{
        ledger::{AdjustBalanceRequest, LedgerEntry, LedgerQuery, OperationType},
        task::{CreateTaskRequest, TaskStatus, UpdateTaskRequest},
        user::UserRole,
    },
    services::{ExpirySweeper, LedgerService, TaskService, TaskTypeService},
};
use serial_test::serial;
use std::sync::Arc;

mod common;
use common::{balance_of, create_task_type, create_test_config, create_user, setup_test_db, task_status};

fn adjust(amount: i64) -> AdjustBalanceRequest {
    AdjustBalanceRequest {
        amount,
        operation_type: None,
        remark: String::new(),
    }
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_admin_adjustments() {
    let pool = setup_test_db(&create_test_config()).await;
    let ledger = LedgerService::new(pool.clone());
    let admin = create_user(&pool, "root", UserRole::Admin, 0).await;
    let user = create_user(&pool, "alice", UserRole::User, 0).await;

    let log = ledger.adjust_balance(&admin, user.user_id, adjust(500)).await.unwrap();
    assert_eq!(log.operation_type, OperationType::Recharge);
    assert_eq!(log.balance, 500);
    assert_eq!(log.remark, "管理员调整 - root");

    let log = ledger.adjust_balance(&admin, user.user_id, adjust(-200)).await.unwrap();
    assert_eq!(log.operation_type, OperationType::Deduct);
    assert_eq!(log.balance, 300);

    let err = ledger
        .adjust_balance(&admin, user.user_id, adjust(-301))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InsufficientBalance { required: 301, balance: 300 }));

    let err = ledger.adjust_balance(&user, user.user_id, adjust(10)).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = ledger.adjust_balance(&admin, 9999, adjust(10)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    assert_eq!(balance_of(&pool, user.user_id).await, 300);
    let summary = ledger.summary(user.user_id).await.unwrap();
    assert_eq!(summary.entries, 2);
    assert!(summary.is_consistent());
}

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_history_paging_and_filter() {
    let pool = setup_test_db(&create_test_config()).await;
    let ledger = LedgerService::new(pool.clone());
    let admin = create_user(&pool, "root", UserRole::Admin, 0).await;
    let user = create_user(&pool, "bob", UserRole::User, 0).await;

    for _ in 0..3 {
        ledger.adjust_balance(&admin, user.user_id, adjust(10)).await.unwrap();
    }
    ledger.adjust_balance(&admin, user.user_id, adjust(-5)).await.unwrap();

    let page = ledger
        .list_logs(
            user.user_id,
            &LedgerQuery {
                operation_type: None,
                page: Some(1),
                page_size: Some(2),
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 2);
    // 最新的在前
    assert_eq!(page.items[0].amount, -5);

    let deducts = ledger
        .list_logs(
            user.user_id,
            &LedgerQuery {
                operation_type: Some(OperationType::Deduct),
                page: None,
                page_size: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(deducts.total, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // 需要数据库
#[serial]
async fn test_concurrent_debits_never_overdraw() {
    let pool = setup_test_db(&create_test_config()).await;
    let user = create_user(&pool, "carol", UserRole::User, 50).await;
    let pool = Arc::new(pool);

    let debits = (0..10).map(|_| {
        let pool = pool.clone();
        let user_id = user.user_id;
        tokio::spawn(async move {
            let mut tx = db::begin(&pool).await?;
            LedgerService::debit(
                &mut tx,
                LedgerEntry::debit(user_id, 10, OperationType::Consume, None, "并发扣除"),
            )
            .await?;
            db::commit(tx).await
        })
    });

    let succeeded = futures::future::join_all(debits)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(()))))
        .count();

    assert_eq!(succeeded, 5);
    assert_eq!(balance_of(&pool, user.user_id).await, 0);

    let ledger = LedgerService::new((*pool).clone());
    assert!(ledger.summary(user.user_id).await.unwrap().is_consistent());
}

fn create_request(sku: &str, execute_count: i32) -> CreateTaskRequest {
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

#[tokio::test]
#[ignore] // 需要数据库
#[serial]
async fn test_books_balance_across_task_lifecycle() {
    let pool = setup_test_db(&create_test_config()).await;
    create_task_type(&pool, "t_browse", 3, 1).await;
    let user = create_user(&pool, "dora", UserRole::User, 200).await;
    let registry = Arc::new(TaskTypeService::new(pool.clone(), 8));
    let tasks = TaskService::new(pool.clone(), registry.clone());
    let ledger = LedgerService::new(pool.clone());

    // 创建 5 次，追加到 8 次，再取消
    let mut first = create_request("SKU-A", 5);
    first.start_time = Some(Utc::now() + Duration::hours(2));
    let first = tasks.create_task(&user, first).await.unwrap();
    tasks
        .update_task(
            &user,
            first.id,
            UpdateTaskRequest {
                execute_count: Some(8),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(balance_of(&pool, user.user_id).await, 176);
    tasks.cancel_task(&user, first.id).await.unwrap();
    assert_eq!(balance_of(&pool, user.user_id).await, 200);

    // 另一个任务执行 4/10 后过期
    let second = tasks.create_task(&user, create_request("SKU-B", 10)).await.unwrap();
    sqlx::query(
        "UPDATE tasks SET executed_count = 4, start_time = NOW() - INTERVAL '25 hours' WHERE id = $1",
    )
    .bind(second.id)
    .execute(&pool)
    .await
    .unwrap();

    let report = ExpirySweeper::new(pool.clone(), registry).run_once().await.unwrap();
    assert_eq!(report.expired, 1);
    // 30 * 6 / 10
    assert_eq!(report.refunded, 18);
    assert_eq!(task_status(&pool, second.id).await, (TaskStatus::PartialCompleted, 4));

    let summary = ledger.summary(user.user_id).await.unwrap();
    assert_eq!(summary.balance, 188);
    assert_eq!(summary.total_debits, 15 + 9 + 30);
    assert_eq!(summary.total_credits, 200 + 24 + 18);
    assert_eq!(summary.entries, 6);
    assert!(summary.is_consistent());
}
