use crate::{
    config::Config,
    error::{AppError, Result},
    models::{
        analytics::*,
        post::PostAnalyticsRow,
    },
    services::{
        comparison::PeriodComparator,
        dedup::ViewDeduplicator,
        event_store::EventStore,
        trend,
    },
    utils::visitor,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// 统计分析服务：组合去重、环比和趋势分桶，回答
/// 单篇文章 / 作者聚合 / 全站三种口径的查询。
///
/// 所有聚合都是请求时即时计算，不持久化、不缓存；各个子指标
/// 彼此独立降级，单个查询失败不拖垮整个响应。
#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn EventStore>,
    dedup: ViewDeduplicator,
    comparator: PeriodComparator,
    top_limit: usize,
    default_per_page: usize,
    max_per_page: usize,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn EventStore>, config: &Config) -> Self {
        Self {
            dedup: ViewDeduplicator::new(store.clone(), config.view_dedup_window_minutes),
            comparator: PeriodComparator::new(store.clone()),
            store,
            top_limit: config.breakdown_top_limit,
            default_per_page: config.default_posts_per_page,
            max_per_page: config.max_posts_per_page,
        }
    }

    /// 上报一次浏览。去重窗口内的重复浏览直接吞掉，
    /// UA/referrer 富化失败不阻塞记录本身。
    pub async fn track_view(
        &self,
        post_id: i64,
        identity: VisitorIdentity,
        context: ViewContext,
        now: DateTime<Utc>,
    ) -> Result<TrackViewOutcome> {
        if post_id <= 0 {
            return Err(AppError::BadRequest("Invalid post id".to_string()));
        }

        if !self.dedup.should_record(post_id, &identity, now).await? {
            return Ok(TrackViewOutcome { recorded: false });
        }

        let profile = visitor::classify_user_agent(context.user_agent.as_deref());

        let event = NewViewEvent {
            post_id,
            actor_key: identity.actor_key(),
            user_id: identity.user_id,
            session_id: identity.session_id,
            ip_address: identity.ip_address,
            user_agent: context.user_agent,
            referrer: context.referrer,
            country: context.country,
            device_type: Some(profile.device_type),
            browser: Some(profile.browser),
            os: Some(profile.os),
            created_at: now,
        };

        self.store.insert_view(event).await?;
        Ok(TrackViewOutcome { recorded: true })
    }

    /// 单篇文章统计
    pub async fn post_analytics(
        &self,
        post_id: i64,
        filter: TimeFilter,
        now: DateTime<Utc>,
    ) -> Result<PostAnalyticsResponse> {
        debug!("Computing analytics for post: {}", post_id);

        if post_id <= 0 {
            return Err(AppError::BadRequest("Invalid post id".to_string()));
        }
        let post = self
            .store
            .find_post(post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post"))?;

        let scope = Scope::Post(post_id);
        let range = filter.range(now);

        Ok(PostAnalyticsResponse {
            post,
            period: filter.label().to_string(),
            engagement: self.engagement_snapshot(&scope, &range).await,
            views_trend: self.views_series(&scope, filter, now).await,
            breakdowns: self.breakdowns(&scope, &range).await,
        })
    }

    /// 作者全部文章的聚合统计 + 分页文章列表
    pub async fn user_analytics(
        &self,
        user_id: i64,
        filter: TimeFilter,
        query: &AnalyticsQuery,
        now: DateTime<Utc>,
    ) -> Result<UserAnalyticsResponse> {
        debug!("Computing aggregate analytics for user: {}", user_id);

        if user_id <= 0 {
            return Err(AppError::BadRequest("Invalid user id".to_string()));
        }

        let scope = Scope::Author(user_id);
        let range = filter.range(now);

        Ok(UserAnalyticsResponse {
            user_id,
            period: filter.label().to_string(),
            engagement: self.engagement_snapshot(&scope, &range).await,
            views_trend: self.views_series(&scope, filter, now).await,
            breakdowns: self.breakdowns(&scope, &range).await,
            posts: self.post_listing(user_id, query).await,
        })
    }

    /// 全站统计：总量 + 浏览/点赞环比
    pub async fn admin_analytics(
        &self,
        filter: TimeFilter,
        now: DateTime<Utc>,
    ) -> Result<AdminAnalyticsResponse> {
        debug!("Computing site-wide analytics");

        let label = filter.label();

        // 总量是全量口径，时间过滤只作用在环比对比上
        let all_time = TimeRange::unbounded(now);
        let total_views = degraded(
            "total_views",
            self.store.count_metric(Metric::Views, &Scope::Site, &all_time).await,
        );
        let total_likes = degraded(
            "total_likes",
            self.store.count_metric(Metric::Likes, &Scope::Site, &all_time).await,
        );
        let total_posts = degraded("total_posts", self.store.count_posts(&Scope::Site).await);

        let avg_views_per_post = if total_posts > 0 {
            round2(total_views as f64 / total_posts as f64)
        } else {
            0.0
        };

        let views_comparison = degraded_with(
            "views_comparison",
            self.comparator.compare(Metric::Views, filter, &Scope::Site, now).await,
            || ComparisonResult::zero(Metric::Views, label),
        );
        let likes_comparison = degraded_with(
            "likes_comparison",
            self.comparator.compare(Metric::Likes, filter, &Scope::Site, now).await,
            || ComparisonResult::zero(Metric::Likes, label),
        );

        Ok(AdminAnalyticsResponse {
            period: label.to_string(),
            total_views,
            total_likes,
            total_posts,
            avg_views_per_post,
            views_comparison,
            likes_comparison,
        })
    }

    /// 全站趋势图：浏览/点赞/新用户/新订阅四条序列，各自独立降级
    pub async fn admin_trends(
        &self,
        range: TrendRange,
        now: DateTime<Utc>,
    ) -> Result<TrendChartResponse> {
        debug!("Computing site-wide trend chart for range: {:?}", range);

        Ok(TrendChartResponse {
            period: range.label().to_string(),
            views: self.metric_series(Metric::Views, range, now).await,
            likes: self.metric_series(Metric::Likes, range, now).await,
            new_users: self.metric_series(Metric::NewUsers, range, now).await,
            new_subscribers: self.metric_series(Metric::NewSubscribers, range, now).await,
        })
    }

    // Sub-metric helpers: 每个都把失败降级成零值，保持响应形状完整

    async fn engagement_snapshot(&self, scope: &Scope, range: &TimeRange) -> EngagementSnapshot {
        let total_views = degraded(
            "total_views",
            self.store.count_metric(Metric::Views, scope, range).await,
        );
        let unique_views = degraded(
            "unique_views",
            self.store.count_unique_viewers(scope, range).await,
        );
        let comments_count = degraded(
            "comments_count",
            self.store.count_metric(Metric::Comments, scope, range).await,
        );
        let likes_count = degraded(
            "likes_count",
            self.store.count_metric(Metric::Likes, scope, range).await,
        );

        EngagementSnapshot::compute(total_views, unique_views, comments_count, likes_count)
    }

    async fn views_series(
        &self,
        scope: &Scope,
        filter: TimeFilter,
        now: DateTime<Utc>,
    ) -> TrendSeries {
        let horizon = filter.series_horizon();
        let range = TimeRange::between(now - Duration::days(horizon as i64), now);

        let rows = degraded(
            "views_trend",
            self.store
                .bucket_counts(Metric::Views, scope, &range, Granularity::Day)
                .await,
        );

        trend::bucket(Granularity::Day, horizon, &rows, now)
            .unwrap_or_else(|_| trend::empty(Granularity::Day, horizon))
    }

    async fn metric_series(
        &self,
        metric: Metric,
        range: TrendRange,
        now: DateTime<Utc>,
    ) -> TrendSeries {
        let granularity = range.granularity();
        let horizon = range.horizon();

        let rows = degraded(
            "trend_series",
            self.store
                .bucket_counts(metric, &Scope::Site, &range.query_range(now), granularity)
                .await,
        );

        trend::bucket(granularity, horizon, &rows, now)
            .unwrap_or_else(|_| trend::empty(granularity, horizon))
    }

    async fn breakdowns(&self, scope: &Scope, range: &TimeRange) -> DimensionBreakdowns {
        let referrers = degraded(
            "referrers",
            self.store
                .dimension_counts(scope, range, Dimension::Referrer, self.top_limit)
                .await,
        );

        DimensionBreakdowns {
            referrers: merge_referrer_hosts(referrers, self.top_limit),
            devices: degraded(
                "devices",
                self.store
                    .dimension_counts(scope, range, Dimension::DeviceType, self.top_limit)
                    .await,
            ),
            browsers: degraded(
                "browsers",
                self.store
                    .dimension_counts(scope, range, Dimension::Browser, self.top_limit)
                    .await,
            ),
            operating_systems: degraded(
                "operating_systems",
                self.store
                    .dimension_counts(scope, range, Dimension::Os, self.top_limit)
                    .await,
            ),
            countries: degraded(
                "countries",
                self.store
                    .dimension_counts(scope, range, Dimension::Country, self.top_limit)
                    .await,
            ),
        }
    }

    async fn post_listing(&self, user_id: i64, query: &AnalyticsQuery) -> PaginatedPosts {
        let page = query.page.unwrap_or(1).max(1);
        let per_page = query
            .per_page
            .unwrap_or(self.default_per_page)
            .clamp(1, self.max_per_page);

        let (posts, total) = degraded(
            "post_listing",
            self.store
                .list_posts(user_id, page, per_page, query.search.as_deref())
                .await,
        );

        // 每页文章的浏览/评论/点赞数走一次分组计数，再在内存里按 id 拼接
        let post_ids: Vec<i64> = posts.iter().map(|post| post.id).collect();
        let stats = degraded("post_stats", self.store.stats_by_post(&post_ids).await);

        let data = posts
            .into_iter()
            .map(|post| {
                let post_stats = stats.get(&post.id).copied().unwrap_or_default();
                PostAnalyticsRow::new(post, post_stats)
            })
            .collect();

        let total_pages = if total > 0 {
            (total as usize + per_page - 1) / per_page
        } else {
            0
        };

        PaginatedPosts {
            data,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

/// 子指标降级：失败记一条 warn，落回类型零值
fn degraded<T: Default>(section: &str, result: Result<T>) -> T {
    degraded_with(section, result, T::default)
}

fn degraded_with<T>(section: &str, result: Result<T>, fallback: impl FnOnce() -> T) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!("Analytics section '{}' degraded to empty: {}", section, e);
            fallback()
        }
    }
}

/// referrer 归并为主机名后重新聚合排序，取前 limit 个
fn merge_referrer_hosts(rows: Vec<DimensionRow>, limit: usize) -> Vec<DimensionRow> {
    let mut merged: Vec<DimensionRow> = Vec::new();

    for row in rows {
        let host = visitor::referrer_host(&row.value);
        match merged.iter_mut().find(|existing| existing.value == host) {
            Some(existing) => existing.count += row.count,
            None => merged.push(DimensionRow {
                value: host,
                count: row.count,
            }),
        }
    }

    merged.sort_by(|a, b| b.count.cmp(&a.count));
    merged.truncate(limit);
    merged
}
