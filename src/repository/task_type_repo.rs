//! Task type repository

use crate::{error::AppError, models::task_type::TaskType};
use sqlx::PgPool;

pub struct TaskTypeRepository {
    db: PgPool,
}

impl TaskTypeRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn find_by_code(&self, code: &str) -> Result<Option<TaskType>, AppError> {
        let task_type = sqlx::query_as::<_, TaskType>("SELECT * FROM task_types WHERE type_code = $1")
            .bind(code)
            .fetch_optional(&self.db)
            .await?;

        Ok(task_type)
    }

    pub async fn list(&self, active_only: bool) -> Result<Vec<TaskType>, AppError> {
        let types = sqlx::query_as::<_, TaskType>(
            r#"
            SELECT * FROM task_types
            WHERE ($1 = FALSE OR is_active)
            ORDER BY id ASC
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.db)
        .await?;

        Ok(types)
    }
}
