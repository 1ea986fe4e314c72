//! 任务模板模型
//! 按 (user_id, sku, task_type) 记录用户的创建习惯，供快速创建使用

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskTemplate {
    pub id: i64,
    pub user_id: i64,
    pub task_type: String,
    pub sku: String,
    pub shop_name: String,
    /// 逗号分隔的历史关键词
    pub keyword: String,
    pub remark: String,
    pub total_created_count: i64,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 模板使用记录
#[derive(Debug, Clone)]
pub struct TemplateUsage<'a> {
    pub user_id: i64,
    pub task_type: &'a str,
    pub sku: &'a str,
    pub shop_name: &'a str,
    pub keyword: &'a str,
    pub count: i32,
}

/// 合并关键词：新关键词未出现过时以逗号追加
pub fn merge_keywords(existing: &str, keyword: &str) -> String {
    let keyword = keyword.trim();
    if keyword.is_empty() || existing.contains(keyword) {
        return existing.to_string();
    }
    if existing.is_empty() {
        keyword.to_string()
    } else {
        format!("{},{}", existing, keyword)
    }
}

/// 模板中最近一次使用的关键词
pub fn latest_keyword(keywords: &str) -> &str {
    keywords
        .rsplit(',')
        .map(str::trim)
        .find(|k| !k.is_empty())
        .unwrap_or("")
}
