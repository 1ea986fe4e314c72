//! User domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// 管理员创建任务不扣京豆，不受时段限制
    Admin,
    User,
}

/// 用户账户（任务引擎只读取余额与角色，余额只经由账本修改）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
    pub jingdou_balance: i64,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub api_key_hash: Option<String>,
    pub api_key_last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 发起操作的调用方
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub username: String,
    pub role: UserRole,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// 资源属于调用方，或调用方为管理员
    pub fn can_access(&self, owner_id: i64) -> bool {
        self.is_admin() || self.user_id == owner_id
    }
}

impl From<&User> for Caller {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_access() {
        let user = Caller {
            user_id: 7,
            username: "alice".to_string(),
            role: UserRole::User,
        };
        assert!(user.can_access(7));
        assert!(!user.can_access(8));

        let admin = Caller {
            role: UserRole::Admin,
            ..user
        };
        assert!(admin.is_admin());
        assert!(admin.can_access(8));
    }
}
