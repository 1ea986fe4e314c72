//! 京豆账本服务
//! 所有余额变动都经由这里：锁定用户行、校验余额、更新余额并写入一条流水，
//! 与调用方的任务状态变更处于同一事务

use sqlx::{Pool, Postgres};
use tracing::{info, instrument, warn};

use crate::db::{self, PgTx};
use crate::error::{AppError, Result};
use crate::models::ledger::*;
use crate::models::task::Page;
use crate::models::user::Caller;

impl LedgerEntry {
    /// 扣除，amount 为正数
    pub fn debit(
        user_id: i64,
        amount: i64,
        operation_type: OperationType,
        related_id: Option<i64>,
        remark: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount: -amount,
            operation_type,
            related_id,
            remark: remark.into(),
        }
    }

    /// 入账，amount 为正数
    pub fn credit(
        user_id: i64,
        amount: i64,
        operation_type: OperationType,
        related_id: Option<i64>,
        remark: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            amount,
            operation_type,
            related_id,
            remark: remark.into(),
        }
    }
}

/// 账本服务
pub struct LedgerService {
    db: Pool<Postgres>,
}

impl LedgerService {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    /// 在调用方事务内记一笔账，返回写入的流水
    ///
    /// 用户行以 `FOR UPDATE` 锁定，余额快照取自同一事务，避免并发扣款丢失更新。
    pub async fn record(tx: &mut PgTx, entry: LedgerEntry) -> Result<JingdouLog> {
        if entry.amount == 0 {
            return Err(AppError::internal_error("ledger entry with zero amount"));
        }

        let balance = sqlx::query_scalar::<_, i64>(
            "SELECT jingdou_balance FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(entry.user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;

        let new_balance = balance + entry.amount;
        if new_balance < 0 {
            warn!(
                user_id = entry.user_id,
                amount = entry.amount,
                balance,
                "Insufficient jingdou balance"
            );
            return Err(AppError::InsufficientBalance {
                required: -entry.amount,
                balance,
            });
        }

        sqlx::query("UPDATE users SET jingdou_balance = $2, updated_at = NOW() WHERE id = $1")
            .bind(entry.user_id)
            .bind(new_balance)
            .execute(&mut **tx)
            .await?;

        let log = sqlx::query_as::<_, JingdouLog>(
            r#"
            INSERT INTO jingdou_logs (user_id, amount, balance, operation_type, related_id, remark)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.amount)
        .bind(new_balance)
        .bind(entry.operation_type)
        .bind(entry.related_id)
        .bind(&entry.remark)
        .fetch_one(&mut **tx)
        .await?;

        info!(
            user_id = entry.user_id,
            amount = entry.amount,
            balance = new_balance,
            operation = ?entry.operation_type,
            related_id = ?entry.related_id,
            "Ledger entry recorded"
        );

        Ok(log)
    }

    /// 扣除京豆，余额不足时返回 InsufficientBalance
    pub async fn debit(tx: &mut PgTx, entry: LedgerEntry) -> Result<i64> {
        debug_assert!(entry.amount < 0);
        Ok(Self::record(tx, entry).await?.balance)
    }

    /// 退还或充值京豆
    pub async fn credit(tx: &mut PgTx, entry: LedgerEntry) -> Result<i64> {
        debug_assert!(entry.amount > 0);
        Ok(Self::record(tx, entry).await?.balance)
    }

    /// 查询当前余额
    #[instrument(skip(self))]
    pub async fn get_balance(&self, user_id: i64) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT jingdou_balance FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::not_found("user"))
    }

    /// 分页查询流水
    #[instrument(skip(self, query))]
    pub async fn list_logs(&self, user_id: i64, query: &LedgerQuery) -> Result<Page<JingdouLog>> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(20).clamp(1, 100);

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM jingdou_logs
            WHERE user_id = $1 AND ($2::jingdou_operation IS NULL OR operation_type = $2)
            "#,
        )
        .bind(user_id)
        .bind(query.operation_type)
        .fetch_one(&self.db)
        .await?;

        let items = sqlx::query_as::<_, JingdouLog>(
            r#"
            SELECT * FROM jingdou_logs
            WHERE user_id = $1 AND ($2::jingdou_operation IS NULL OR operation_type = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(query.operation_type)
        .bind(page_size)
        .bind((page - 1) * page_size)
        .fetch_all(&self.db)
        .await?;

        Ok(Page {
            items,
            total,
            page,
            page_size,
        })
    }

    /// 管理员调整余额（充值、扣除等），结果不能为负
    #[instrument(skip(self, admin, request), fields(admin_id = admin.user_id))]
    pub async fn adjust_balance(
        &self,
        admin: &Caller,
        user_id: i64,
        request: AdjustBalanceRequest,
    ) -> Result<JingdouLog> {
        if !admin.is_admin() {
            return Err(AppError::Forbidden);
        }
        if request.amount == 0 {
            return Err(AppError::validation("调整数量不能为0"));
        }

        let operation_type = request.resolved_operation();
        let remark = if request.remark.trim().is_empty() {
            format!("管理员调整 - {}", admin.username)
        } else {
            request.remark.clone()
        };

        let mut tx = db::begin(&self.db).await?;
        let log = Self::record(
            &mut tx,
            LedgerEntry {
                user_id,
                amount: request.amount,
                operation_type,
                related_id: None,
                remark,
            },
        )
        .await?;
        db::commit(tx).await?;

        metrics::counter!("jingdou_adjustments_total").increment(1);
        Ok(log)
    }

    /// 余额与流水汇总
    #[instrument(skip(self))]
    pub async fn summary(&self, user_id: i64) -> Result<LedgerSummary> {
        sqlx::query_as::<_, LedgerSummary>(
            r#"
            SELECT u.id AS user_id,
                   u.jingdou_balance AS balance,
                   COALESCE(SUM(-l.amount) FILTER (WHERE l.amount < 0), 0)::BIGINT AS total_debits,
                   COALESCE(SUM(l.amount) FILTER (WHERE l.amount > 0), 0)::BIGINT AS total_credits,
                   COUNT(l.id) AS entries
            FROM users u
            LEFT JOIN jingdou_logs l ON l.user_id = u.id
            WHERE u.id = $1
            GROUP BY u.id, u.jingdou_balance
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::not_found("user"))
    }

    /// 某个任务关联的流水
    pub async fn entries_for_task(&self, task_id: i64) -> Result<Vec<JingdouLog>> {
        let logs = sqlx::query_as::<_, JingdouLog>(
            "SELECT * FROM jingdou_logs WHERE related_id = $1 ORDER BY id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.db)
        .await?;

        Ok(logs)
    }
}
