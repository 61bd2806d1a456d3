use crate::{
    error::{AppError, Result},
    models::{
        analytics::{
            BucketRow, Dimension, DimensionRow, Granularity, Metric, NewViewEvent, Scope,
            TimeRange, ViewEvent, VisitorIdentity,
        },
        post::{PostStats, PostSummary},
    },
    services::Database,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 事件存储的抽象查询接口。
/// 浏览/点赞/注册/订阅事件都是追加写入，分析端只做范围计数和分组计数。
#[async_trait]
pub trait EventStore: Send + Sync {
    /// 写入一条浏览事件
    async fn insert_view(&self, event: NewViewEvent) -> Result<ViewEvent>;

    /// 查同一文章下最近一条匹配任一身份信号（会话 OR 用户 OR IP）的浏览事件
    async fn find_recent_view(
        &self,
        post_id: i64,
        identity: &VisitorIdentity,
    ) -> Result<Option<ViewEvent>>;

    /// 指定范围内某个指标的事件总数
    async fn count_metric(&self, metric: Metric, scope: &Scope, range: &TimeRange) -> Result<i64>;

    /// 指定范围内的独立访客数（按 actor_key 去重）
    async fn count_unique_viewers(&self, scope: &Scope, range: &TimeRange) -> Result<i64>;

    /// 按截断后的时间戳分组计数，分组键格式见 Granularity::key_format
    async fn bucket_counts(
        &self,
        metric: Metric,
        scope: &Scope,
        range: &TimeRange,
        granularity: Granularity,
    ) -> Result<Vec<BucketRow>>;

    /// 按维度列分组计数，降序取前 limit 个
    async fn dimension_counts(
        &self,
        scope: &Scope,
        range: &TimeRange,
        dimension: Dimension,
        limit: usize,
    ) -> Result<Vec<DimensionRow>>;

    async fn find_post(&self, post_id: i64) -> Result<Option<PostSummary>>;

    /// 作者文章的分页列表，search 对标题做包含匹配
    async fn list_posts(
        &self,
        author_id: i64,
        page: usize,
        per_page: usize,
        search: Option<&str>,
    ) -> Result<(Vec<PostSummary>, i64)>;

    /// 一次分组计数取回多篇文章的浏览/评论/点赞数，避免逐篇查询
    async fn stats_by_post(&self, post_ids: &[i64]) -> Result<HashMap<i64, PostStats>>;

    async fn count_posts(&self, scope: &Scope) -> Result<i64>;
}

/// SurrealDB 实现
#[derive(Clone)]
pub struct SurrealEventStore {
    db: Arc<Database>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: i64,
}

#[derive(Debug, Deserialize)]
struct PostCountRow {
    post_id: i64,
    count: i64,
}

impl SurrealEventStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// 主体范围的 WHERE 片段；用户/订阅者事件不挂文章，调用方直接跳过
    fn subject_condition(scope: &Scope, params: &mut Map<String, Value>) -> Option<String> {
        match scope {
            Scope::Post(post_id) => {
                params.insert("post_id".to_string(), json!(post_id));
                Some("post_id = $post_id".to_string())
            }
            Scope::Author(author_id) => {
                params.insert("author_id".to_string(), json!(author_id));
                Some(
                    "post_id IN (SELECT VALUE meta::id(id) FROM post WHERE author_id = $author_id)"
                        .to_string(),
                )
            }
            Scope::Site => None,
        }
    }

    /// 时间范围的 WHERE 片段，[start, end) 左闭右开
    fn time_conditions(range: &TimeRange, params: &mut Map<String, Value>) -> Vec<String> {
        let mut conditions = Vec::new();
        if let Some(start) = range.start {
            params.insert("range_start".to_string(), json!(start.to_rfc3339()));
            conditions.push("created_at >= $range_start".to_string());
        }
        params.insert("range_end".to_string(), json!(range.end.to_rfc3339()));
        conditions.push("created_at < $range_end".to_string());
        conditions
    }

    fn where_clause(conditions: &[String]) -> String {
        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }
}

#[async_trait]
impl EventStore for SurrealEventStore {
    async fn insert_view(&self, event: NewViewEvent) -> Result<ViewEvent> {
        debug!("Recording view event for post: {}", event.post_id);

        let event_id = Uuid::new_v4().simple().to_string();
        let mut response = self
            .db
            .query_with_params(
                "CREATE type::thing('view_event', $event_id) CONTENT $event",
                json!({
                    "event_id": event_id,
                    "event": event
                }),
            )
            .await?;

        let created: Vec<ViewEvent> = response.take(0)?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("Failed to record view event".to_string()))
    }

    async fn find_recent_view(
        &self,
        post_id: i64,
        identity: &VisitorIdentity,
    ) -> Result<Option<ViewEvent>> {
        let mut params = Map::new();
        params.insert("post_id".to_string(), json!(post_id));

        // 同一个访客可能同时被多个信号命中，所以对全部可用信号做 OR
        let mut signals = Vec::new();
        if let Some(session_id) = &identity.session_id {
            params.insert("session_id".to_string(), json!(session_id));
            signals.push("session_id = $session_id");
        }
        if let Some(user_id) = identity.user_id {
            params.insert("user_id".to_string(), json!(user_id));
            signals.push("user_id = $user_id");
        }
        if let Some(ip_address) = &identity.ip_address {
            params.insert("ip_address".to_string(), json!(ip_address));
            signals.push("ip_address = $ip_address");
        }

        if signals.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT * FROM view_event WHERE post_id = $post_id AND ({}) \
             ORDER BY created_at DESC LIMIT 1",
            signals.join(" OR ")
        );

        let mut response = self.db.query_with_params(&sql, Value::Object(params)).await?;
        let events: Vec<ViewEvent> = response.take(0)?;
        Ok(events.into_iter().next())
    }

    async fn count_metric(&self, metric: Metric, scope: &Scope, range: &TimeRange) -> Result<i64> {
        let mut params = Map::new();
        let mut conditions = Vec::new();

        if metric.is_post_scoped() {
            if let Some(condition) = Self::subject_condition(scope, &mut params) {
                conditions.push(condition);
            }
        }
        conditions.extend(Self::time_conditions(range, &mut params));

        let sql = format!(
            "SELECT count() AS count FROM {}{} GROUP ALL",
            metric.table(),
            Self::where_clause(&conditions)
        );

        let mut response = self.db.query_with_params(&sql, Value::Object(params)).await?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map(|row| row.count).unwrap_or(0))
    }

    async fn count_unique_viewers(&self, scope: &Scope, range: &TimeRange) -> Result<i64> {
        let mut params = Map::new();
        let mut conditions = vec!["actor_key != NONE".to_string()];

        if let Some(condition) = Self::subject_condition(scope, &mut params) {
            conditions.push(condition);
        }
        conditions.extend(Self::time_conditions(range, &mut params));

        let sql = format!(
            "SELECT count() AS count FROM \
             (SELECT actor_key FROM view_event{} GROUP BY actor_key) GROUP ALL",
            Self::where_clause(&conditions)
        );

        let mut response = self.db.query_with_params(&sql, Value::Object(params)).await?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map(|row| row.count).unwrap_or(0))
    }

    async fn bucket_counts(
        &self,
        metric: Metric,
        scope: &Scope,
        range: &TimeRange,
        granularity: Granularity,
    ) -> Result<Vec<BucketRow>> {
        let mut params = Map::new();
        let mut conditions = Vec::new();

        if metric.is_post_scoped() {
            if let Some(condition) = Self::subject_condition(scope, &mut params) {
                conditions.push(condition);
            }
        }
        conditions.extend(Self::time_conditions(range, &mut params));

        let sql = format!(
            "SELECT time::format(created_at, '{}') AS bucket_key, count() AS count \
             FROM {}{} GROUP BY bucket_key",
            granularity.key_format(),
            metric.table(),
            Self::where_clause(&conditions)
        );

        let mut response = self.db.query_with_params(&sql, Value::Object(params)).await?;
        let rows: Vec<BucketRow> = response.take(0)?;
        Ok(rows)
    }

    async fn dimension_counts(
        &self,
        scope: &Scope,
        range: &TimeRange,
        dimension: Dimension,
        limit: usize,
    ) -> Result<Vec<DimensionRow>> {
        let column = dimension.column();
        let mut params = Map::new();
        let mut conditions = vec![format!("{} != NONE", column), format!("{} != ''", column)];

        if let Some(condition) = Self::subject_condition(scope, &mut params) {
            conditions.push(condition);
        }
        conditions.extend(Self::time_conditions(range, &mut params));

        let sql = format!(
            "SELECT {} AS value, count() AS count FROM view_event{} \
             GROUP BY value ORDER BY count DESC LIMIT {}",
            column,
            Self::where_clause(&conditions),
            limit
        );

        let mut response = self.db.query_with_params(&sql, Value::Object(params)).await?;
        let rows: Vec<DimensionRow> = response.take(0)?;
        Ok(rows)
    }

    async fn find_post(&self, post_id: i64) -> Result<Option<PostSummary>> {
        let mut response = self
            .db
            .query_with_params(
                "SELECT meta::id(id) AS id, title, slug, published_at \
                 FROM type::thing('post', $post_id)",
                json!({ "post_id": post_id }),
            )
            .await?;

        let posts: Vec<PostSummary> = response.take(0)?;
        Ok(posts.into_iter().next())
    }

    async fn list_posts(
        &self,
        author_id: i64,
        page: usize,
        per_page: usize,
        search: Option<&str>,
    ) -> Result<(Vec<PostSummary>, i64)> {
        let mut params = Map::new();
        params.insert("author_id".to_string(), json!(author_id));

        let mut conditions = vec!["author_id = $author_id".to_string()];
        if let Some(search) = search.filter(|s| !s.is_empty()) {
            params.insert("search".to_string(), json!(search));
            conditions.push("string::lowercase(title) CONTAINS string::lowercase($search)".to_string());
        }

        let where_clause = Self::where_clause(&conditions);
        let start = page.saturating_sub(1) * per_page;

        let list_sql = format!(
            "SELECT meta::id(id) AS id, title, slug, published_at FROM post{} \
             ORDER BY published_at DESC LIMIT {} START {}",
            where_clause, per_page, start
        );
        let count_sql = format!(
            "SELECT count() AS count FROM post{} GROUP ALL",
            where_clause
        );

        let mut response = self
            .db
            .query_with_params(&list_sql, Value::Object(params.clone()))
            .await?;
        let posts: Vec<PostSummary> = response.take(0)?;

        let mut response = self.db.query_with_params(&count_sql, Value::Object(params)).await?;
        let totals: Vec<CountRow> = response.take(0)?;
        let total = totals.first().map(|row| row.count).unwrap_or(0);

        Ok((posts, total))
    }

    async fn stats_by_post(&self, post_ids: &[i64]) -> Result<HashMap<i64, PostStats>> {
        let mut stats: HashMap<i64, PostStats> = HashMap::new();
        if post_ids.is_empty() {
            return Ok(stats);
        }

        for metric in [Metric::Views, Metric::Comments, Metric::Likes] {
            let sql = format!(
                "SELECT post_id, count() AS count FROM {} \
                 WHERE post_id IN $post_ids GROUP BY post_id",
                metric.table()
            );
            let mut response = self
                .db
                .query_with_params(&sql, json!({ "post_ids": post_ids }))
                .await?;
            let rows: Vec<PostCountRow> = response.take(0)?;

            for row in rows {
                let entry = stats.entry(row.post_id).or_default();
                match metric {
                    Metric::Views => entry.views = row.count,
                    Metric::Comments => entry.comments = row.count,
                    Metric::Likes => entry.likes = row.count,
                    _ => unreachable!(),
                }
            }
        }

        Ok(stats)
    }

    async fn count_posts(&self, scope: &Scope) -> Result<i64> {
        let mut params = Map::new();
        let mut conditions = Vec::new();

        match scope {
            Scope::Author(author_id) => {
                params.insert("author_id".to_string(), json!(author_id));
                conditions.push("author_id = $author_id".to_string());
            }
            Scope::Post(post_id) => {
                params.insert("post_id".to_string(), json!(post_id));
                conditions.push("meta::id(id) = $post_id".to_string());
            }
            Scope::Site => {}
        }

        let sql = format!(
            "SELECT count() AS count FROM post{} GROUP ALL",
            Self::where_clause(&conditions)
        );

        let mut response = self.db.query_with_params(&sql, Value::Object(params)).await?;
        let rows: Vec<CountRow> = response.take(0)?;
        Ok(rows.first().map(|row| row.count).unwrap_or(0))
    }
}
