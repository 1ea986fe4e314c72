//! User repository (数据库访问层)

use crate::{error::AppError, models::user::User};
use chrono::Utc;
use sqlx::PgPool;

pub struct UserRepository {
    db: PgPool,
}

impl UserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 根据 API Key 摘要查找用户
    pub async fn find_by_api_key_hash(&self, key_hash: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE api_key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    /// 更新 API Key 最后使用时间
    pub async fn touch_api_key(&self, user_id: i64) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET api_key_last_used_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.db)
            .await?;

        Ok(())
    }
}
