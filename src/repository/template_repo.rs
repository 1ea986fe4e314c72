//! Task template repository
//! 模板在任务创建事务的保存点内更新，读取走连接池

use crate::{
    error::AppError,
    models::template::{merge_keywords, TaskTemplate, TemplateUsage},
};
use chrono::Utc;
use sqlx::{PgConnection, PgPool};

pub struct TemplateRepository {
    db: PgPool,
}

impl TemplateRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 查找调用方自己的模板
    pub async fn find_for_user(
        &self,
        template_id: i64,
        user_id: i64,
    ) -> Result<Option<TaskTemplate>, AppError> {
        let template = sqlx::query_as::<_, TaskTemplate>(
            "SELECT * FROM task_templates WHERE id = $1 AND user_id = $2",
        )
        .bind(template_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(template)
    }

    /// 按最近使用时间列出模板
    pub async fn list_for_user(&self, user_id: i64) -> Result<Vec<TaskTemplate>, AppError> {
        let templates = sqlx::query_as::<_, TaskTemplate>(
            "SELECT * FROM task_templates WHERE user_id = $1 ORDER BY last_used_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(templates)
    }

    /// 新增或累加模板使用记录
    pub async fn upsert(conn: &mut PgConnection, usage: &TemplateUsage<'_>) -> Result<(), AppError> {
        let now = Utc::now();
        let existing = sqlx::query_as::<_, TaskTemplate>(
            r#"
            SELECT * FROM task_templates
            WHERE user_id = $1 AND sku = $2 AND task_type = $3
            FOR UPDATE
            "#,
        )
        .bind(usage.user_id)
        .bind(usage.sku)
        .bind(usage.task_type)
        .fetch_optional(&mut *conn)
        .await?;

        match existing {
            Some(template) => {
                let keyword = merge_keywords(&template.keyword, usage.keyword);
                let shop_name = if !usage.shop_name.is_empty() && usage.shop_name != template.shop_name {
                    usage.shop_name
                } else {
                    template.shop_name.as_str()
                };

                sqlx::query(
                    r#"
                    UPDATE task_templates
                    SET total_created_count = total_created_count + $2,
                        keyword = $3,
                        shop_name = $4,
                        last_used_at = $5,
                        updated_at = $5
                    WHERE id = $1
                    "#,
                )
                .bind(template.id)
                .bind(i64::from(usage.count))
                .bind(&keyword)
                .bind(shop_name)
                .bind(now)
                .execute(&mut *conn)
                .await?;
            }
            None => {
                // 并发首次创建时以唯一约束兜底
                sqlx::query(
                    r#"
                    INSERT INTO task_templates
                        (user_id, task_type, sku, shop_name, keyword, total_created_count, last_used_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7)
                    ON CONFLICT (user_id, sku, task_type) DO UPDATE
                    SET total_created_count = task_templates.total_created_count + EXCLUDED.total_created_count,
                        last_used_at = EXCLUDED.last_used_at,
                        updated_at = EXCLUDED.last_used_at
                    "#,
                )
                .bind(usage.user_id)
                .bind(usage.task_type)
                .bind(usage.sku)
                .bind(usage.shop_name)
                .bind(usage.keyword.trim())
                .bind(i64::from(usage.count))
                .bind(now)
                .execute(&mut *conn)
                .await?;
            }
        }

        Ok(())
    }
}
