//! 京豆账本模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 账本操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "jingdou_operation", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// 创建任务扣除
    Task,
    /// 追加执行次数扣除
    Consume,
    /// 充值
    Recharge,
    /// 取消或过期退款
    Refund,
    /// 管理员扣除
    Deduct,
    /// 管理员其他调整
    Admin,
}

/// 账本流水，写入后不可修改
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JingdouLog {
    pub id: i64,
    pub user_id: i64,
    /// 负数为扣除
    pub amount: i64,
    /// 本次操作后的余额快照
    pub balance: i64,
    pub operation_type: OperationType,
    pub related_id: Option<i64>,
    pub remark: String,
    pub created_at: DateTime<Utc>,
}

/// 一次余额变动
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub user_id: i64,
    pub amount: i64,
    pub operation_type: OperationType,
    pub related_id: Option<i64>,
    pub remark: String,
}

/// 账本流水查询
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LedgerQuery {
    pub operation_type: Option<OperationType>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// 管理员调整余额请求
#[derive(Debug, Clone, Deserialize)]
pub struct AdjustBalanceRequest {
    pub amount: i64,
    pub operation_type: Option<OperationType>,
    #[serde(default)]
    pub remark: String,
}

impl AdjustBalanceRequest {
    /// 未指定类型时，正数为充值，负数为扣除
    pub fn resolved_operation(&self) -> OperationType {
        self.operation_type.unwrap_or(if self.amount > 0 {
            OperationType::Recharge
        } else {
            OperationType::Deduct
        })
    }
}

/// 余额与流水汇总，用于对账
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerSummary {
    pub user_id: i64,
    pub balance: i64,
    pub total_debits: i64,
    pub total_credits: i64,
    pub entries: i64,
}

impl LedgerSummary {
    /// 流水合计与当前余额一致
    pub fn is_consistent(&self) -> bool {
        self.total_credits - self.total_debits == self.balance
    }
}
