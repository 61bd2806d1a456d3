use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 文章摘要，来自内容库的只读投影
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// 单篇文章的互动计数，由跨文章的分组计数查询一次取回
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PostStats {
    pub views: i64,
    pub comments: i64,
    pub likes: i64,
}

/// 作者文章列表里的一行：摘要 + 计数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostAnalyticsRow {
    #[serde(flatten)]
    pub post: PostSummary,
    pub views: i64,
    pub comments: i64,
    pub likes: i64,
}

impl PostAnalyticsRow {
    pub fn new(post: PostSummary, stats: PostStats) -> Self {
        Self {
            post,
            views: stats.views,
            comments: stats.comments,
            likes: stats.likes,
        }
    }
}
