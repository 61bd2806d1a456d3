use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use prism_blog::{
    config::Config,
    error::{AppError, Result},
    models::{
        analytics::{
            AnalyticsQuery, BucketRow, Dimension, DimensionRow, Granularity, Metric, NewViewEvent,
            Scope, TimeFilter, TimeRange, TrendRange, ViewContext, ViewEvent, VisitorIdentity,
        },
        post::{PostStats, PostSummary},
    },
    services::{AnalyticsService, EventStore, PeriodComparator},
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_test::assert_ok;

/// 事件存储的内存实现，语义与生产查询对齐：
/// 范围计数、分组计数、身份 OR 匹配都按真实规则回放。
#[derive(Default)]
struct MemoryEventStore {
    posts: Mutex<Vec<(i64, PostSummary)>>,
    views: Mutex<Vec<ViewEvent>>,
    likes: Mutex<Vec<(i64, DateTime<Utc>)>>,
    comments: Mutex<Vec<(i64, DateTime<Utc>)>>,
    users: Mutex<Vec<DateTime<Utc>>>,
    subscribers: Mutex<Vec<DateTime<Utc>>>,
    next_id: AtomicU64,
    fail_dimension_counts: Mutex<bool>,
}

impl MemoryEventStore {
    fn add_post(&self, author_id: i64, id: i64, title: &str, published_at: DateTime<Utc>) {
        self.posts.lock().unwrap().push((
            author_id,
            PostSummary {
                id,
                title: title.to_string(),
                slug: title.to_lowercase().replace(' ', "-"),
                published_at: Some(published_at),
            },
        ));
    }

    fn add_view(&self, post_id: i64, ip: &str, created_at: DateTime<Utc>) {
        self.add_view_with_dimensions(post_id, ip, created_at, None, None)
    }

    fn add_view_with_dimensions(
        &self,
        post_id: i64,
        ip: &str,
        created_at: DateTime<Utc>,
        referrer: Option<&str>,
        device_type: Option<&str>,
    ) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.views.lock().unwrap().push(ViewEvent {
            id: format!("view_event:{}", id),
            post_id,
            actor_key: Some(format!("ip:{}", ip)),
            user_id: None,
            session_id: None,
            ip_address: Some(ip.to_string()),
            user_agent: None,
            referrer: referrer.map(|r| r.to_string()),
            country: None,
            device_type: device_type.map(|d| d.to_string()),
            browser: None,
            os: None,
            created_at,
        });
    }

    fn add_like(&self, post_id: i64, created_at: DateTime<Utc>) {
        self.likes.lock().unwrap().push((post_id, created_at));
    }

    fn add_comment(&self, post_id: i64, created_at: DateTime<Utc>) {
        self.comments.lock().unwrap().push((post_id, created_at));
    }

    fn add_user(&self, created_at: DateTime<Utc>) {
        self.users.lock().unwrap().push(created_at);
    }

    fn add_subscriber(&self, created_at: DateTime<Utc>) {
        self.subscribers.lock().unwrap().push(created_at);
    }

    fn author_post_ids(&self, author_id: i64) -> Vec<i64> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(author, _)| *author == author_id)
            .map(|(_, post)| post.id)
            .collect()
    }

    fn in_scope(&self, scope: &Scope, post_id: i64) -> bool {
        match scope {
            Scope::Post(id) => post_id == *id,
            Scope::Author(author_id) => self.author_post_ids(*author_id).contains(&post_id),
            Scope::Site => true,
        }
    }

    fn in_range(range: &TimeRange, at: DateTime<Utc>) -> bool {
        range.start.map(|start| at >= start).unwrap_or(true) && at < range.end
    }

    /// (post_id, created_at) 事件表的范围计数
    fn count_pairs(
        &self,
        pairs: &Mutex<Vec<(i64, DateTime<Utc>)>>,
        scope: &Scope,
        range: &TimeRange,
    ) -> i64 {
        pairs
            .lock()
            .unwrap()
            .iter()
            .filter(|(post_id, at)| self.in_scope(scope, *post_id) && Self::in_range(range, *at))
            .count() as i64
    }

    fn metric_timestamps(&self, metric: Metric, scope: &Scope, range: &TimeRange) -> Vec<DateTime<Utc>> {
        match metric {
            Metric::Views => self
                .views
                .lock()
                .unwrap()
                .iter()
                .filter(|view| self.in_scope(scope, view.post_id) && Self::in_range(range, view.created_at))
                .map(|view| view.created_at)
                .collect(),
            Metric::Likes => self
                .likes
                .lock()
                .unwrap()
                .iter()
                .filter(|(post_id, at)| self.in_scope(scope, *post_id) && Self::in_range(range, *at))
                .map(|(_, at)| *at)
                .collect(),
            Metric::Comments => self
                .comments
                .lock()
                .unwrap()
                .iter()
                .filter(|(post_id, at)| self.in_scope(scope, *post_id) && Self::in_range(range, *at))
                .map(|(_, at)| *at)
                .collect(),
            Metric::NewUsers => self
                .users
                .lock()
                .unwrap()
                .iter()
                .copied()
                .filter(|at| Self::in_range(range, *at))
                .collect(),
            Metric::NewSubscribers => self
                .subscribers
                .lock()
                .unwrap()
                .iter()
                .copied()
                .filter(|at| Self::in_range(range, *at))
                .collect(),
        }
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_view(&self, event: NewViewEvent) -> Result<ViewEvent> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let view = ViewEvent {
            id: format!("view_event:{}", id),
            post_id: event.post_id,
            actor_key: event.actor_key,
            user_id: event.user_id,
            session_id: event.session_id,
            ip_address: event.ip_address,
            user_agent: event.user_agent,
            referrer: event.referrer,
            country: event.country,
            device_type: event.device_type,
            browser: event.browser,
            os: event.os,
            created_at: event.created_at,
        };
        self.views.lock().unwrap().push(view.clone());
        Ok(view)
    }

    async fn find_recent_view(
        &self,
        post_id: i64,
        identity: &VisitorIdentity,
    ) -> Result<Option<ViewEvent>> {
        let views = self.views.lock().unwrap();
        Ok(views
            .iter()
            .filter(|view| view.post_id == post_id)
            .filter(|view| {
                let session_match = identity.session_id.is_some()
                    && view.session_id == identity.session_id;
                let user_match = identity.user_id.is_some() && view.user_id == identity.user_id;
                let ip_match = identity.ip_address.is_some()
                    && view.ip_address == identity.ip_address;
                session_match || user_match || ip_match
            })
            .max_by_key(|view| view.created_at)
            .cloned())
    }

    async fn count_metric(&self, metric: Metric, scope: &Scope, range: &TimeRange) -> Result<i64> {
        Ok(self.metric_timestamps(metric, scope, range).len() as i64)
    }

    async fn count_unique_viewers(&self, scope: &Scope, range: &TimeRange) -> Result<i64> {
        let views = self.views.lock().unwrap();
        let mut actors: Vec<&str> = views
            .iter()
            .filter(|view| self.in_scope(scope, view.post_id) && Self::in_range(range, view.created_at))
            .filter_map(|view| view.actor_key.as_deref())
            .collect();
        actors.sort_unstable();
        actors.dedup();
        Ok(actors.len() as i64)
    }

    async fn bucket_counts(
        &self,
        metric: Metric,
        scope: &Scope,
        range: &TimeRange,
        granularity: Granularity,
    ) -> Result<Vec<BucketRow>> {
        let mut buckets: HashMap<String, i64> = HashMap::new();
        for at in self.metric_timestamps(metric, scope, range) {
            let key = at.format(granularity.key_format()).to_string();
            *buckets.entry(key).or_insert(0) += 1;
        }
        Ok(buckets
            .into_iter()
            .map(|(bucket_key, count)| BucketRow { bucket_key, count })
            .collect())
    }

    async fn dimension_counts(
        &self,
        scope: &Scope,
        range: &TimeRange,
        dimension: Dimension,
        limit: usize,
    ) -> Result<Vec<DimensionRow>> {
        if *self.fail_dimension_counts.lock().unwrap() {
            return Err(AppError::Internal("dimension table unavailable".to_string()));
        }

        let views = self.views.lock().unwrap();
        let mut counts: HashMap<String, i64> = HashMap::new();
        for view in views
            .iter()
            .filter(|view| self.in_scope(scope, view.post_id) && Self::in_range(range, view.created_at))
        {
            let value = match dimension {
                Dimension::Referrer => view.referrer.clone(),
                Dimension::DeviceType => view.device_type.clone(),
                Dimension::Browser => view.browser.clone(),
                Dimension::Os => view.os.clone(),
                Dimension::Country => view.country.clone(),
            };
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                *counts.entry(value).or_insert(0) += 1;
            }
        }

        let mut rows: Vec<DimensionRow> = counts
            .into_iter()
            .map(|(value, count)| DimensionRow { value, count })
            .collect();
        rows.sort_by(|a, b| b.count.cmp(&a.count));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn find_post(&self, post_id: i64) -> Result<Option<PostSummary>> {
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .find(|(_, post)| post.id == post_id)
            .map(|(_, post)| post.clone()))
    }

    async fn list_posts(
        &self,
        author_id: i64,
        page: usize,
        per_page: usize,
        search: Option<&str>,
    ) -> Result<(Vec<PostSummary>, i64)> {
        let mut posts: Vec<PostSummary> = self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(author, _)| *author == author_id)
            .map(|(_, post)| post.clone())
            .filter(|post| {
                search
                    .map(|needle| post.title.to_lowercase().contains(&needle.to_lowercase()))
                    .unwrap_or(true)
            })
            .collect();
        posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let total = posts.len() as i64;
        let page_posts = posts
            .into_iter()
            .skip(page.saturating_sub(1) * per_page)
            .take(per_page)
            .collect();
        Ok((page_posts, total))
    }

    async fn stats_by_post(&self, post_ids: &[i64]) -> Result<HashMap<i64, PostStats>> {
        let mut stats: HashMap<i64, PostStats> = HashMap::new();
        for &post_id in post_ids {
            let scope = Scope::Post(post_id);
            let range = TimeRange::unbounded(Utc::now() + Duration::days(1));
            let entry = stats.entry(post_id).or_default();
            entry.views = self
                .metric_timestamps(Metric::Views, &scope, &range)
                .len() as i64;
            entry.comments = self.count_pairs(&self.comments, &scope, &range);
            entry.likes = self.count_pairs(&self.likes, &scope, &range);
        }
        Ok(stats)
    }

    async fn count_posts(&self, scope: &Scope) -> Result<i64> {
        let posts = self.posts.lock().unwrap();
        Ok(match scope {
            Scope::Site => posts.len() as i64,
            Scope::Author(author_id) => posts.iter().filter(|(a, _)| a == author_id).count() as i64,
            Scope::Post(post_id) => posts.iter().filter(|(_, p)| p.id == *post_id).count() as i64,
        })
    }
}

fn service(store: Arc<MemoryEventStore>) -> AnalyticsService {
    AnalyticsService::new(store, &Config::default())
}

fn ip_identity(ip: &str) -> VisitorIdentity {
    VisitorIdentity {
        session_id: None,
        user_id: None,
        ip_address: Some(ip.to_string()),
    }
}

#[tokio::test]
async fn repeat_views_inside_window_are_suppressed() {
    let store = Arc::new(MemoryEventStore::default());
    store.add_post(1, 10, "Hello world", Utc::now() - Duration::days(3));
    let service = service(store.clone());
    let now = Utc::now();

    let first = service
        .track_view(10, ip_identity("203.0.113.9"), ViewContext::default(), now)
        .await
        .unwrap();
    assert!(first.recorded);

    // 同一IP十分钟后再来，窗口内不再计数
    let repeat = service
        .track_view(
            10,
            ip_identity("203.0.113.9"),
            ViewContext::default(),
            now + Duration::minutes(10),
        )
        .await
        .unwrap();
    assert!(!repeat.recorded);

    // 窗口过了以后重新计数
    let later = service
        .track_view(
            10,
            ip_identity("203.0.113.9"),
            ViewContext::default(),
            now + Duration::minutes(31),
        )
        .await
        .unwrap();
    assert!(later.recorded);

    assert_eq!(store.views.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn non_positive_post_id_is_rejected() {
    let store = Arc::new(MemoryEventStore::default());
    let service = service(store);

    let result = service
        .track_view(0, ip_identity("203.0.113.9"), ViewContext::default(), Utc::now())
        .await;
    assert!(matches!(result, Err(AppError::BadRequest(_))));
}

#[tokio::test]
async fn doubled_views_compare_at_hundred_percent() {
    let store = Arc::new(MemoryEventStore::default());
    store.add_post(1, 10, "Hello world", Utc::now() - Duration::days(3));

    let now = Utc::now();
    // 当前24小时窗口10次，上一个24小时窗口5次
    for i in 0..10 {
        store.add_view(10, &format!("10.0.0.{}", i), now - Duration::hours(i as i64 + 1));
    }
    for i in 0..5 {
        store.add_view(10, &format!("10.0.1.{}", i), now - Duration::hours(25 + i as i64));
    }

    let comparator = PeriodComparator::new(store);
    let result = comparator
        .compare(Metric::Views, TimeFilter::Last24Hours, &Scope::Post(10), now)
        .await
        .unwrap();

    assert_eq!(result.current, 10);
    assert_eq!(result.previous, 5);
    assert_eq!(result.percent_change, 100.0);
}

#[tokio::test]
async fn post_analytics_compose_snapshot_series_and_breakdowns() {
    let store = Arc::new(MemoryEventStore::default());
    // 用固定时刻，避免跨日边界的偶发
    let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    store.add_post(1, 10, "Hello world", now - Duration::days(10));
    store.add_view_with_dimensions(10, "10.0.0.1", now - Duration::hours(1), Some("https://example.com/a"), Some("Desktop"));
    store.add_view_with_dimensions(10, "10.0.0.1", now - Duration::days(2), Some("https://example.com/b"), Some("Desktop"));
    store.add_view_with_dimensions(10, "10.0.0.2", now - Duration::days(2), Some("https://news.ycombinator.com/item?id=1"), Some("Mobile"));
    store.add_comment(10, now - Duration::hours(2));
    store.add_like(10, now - Duration::hours(3));
    store.add_like(10, now - Duration::days(1));

    let service = service(store);
    let analytics = service
        .post_analytics(10, TimeFilter::Total, now)
        .await
        .unwrap();

    assert_eq!(analytics.post.id, 10);
    assert_eq!(analytics.period, "All time");

    assert_eq!(analytics.engagement.total_views, 3);
    assert_eq!(analytics.engagement.unique_views, 2);
    assert_eq!(analytics.engagement.comments_count, 1);
    assert_eq!(analytics.engagement.likes_count, 2);
    // (1 + 2) / 3 * 100
    assert_eq!(analytics.engagement.engagement_rate, 100.0);

    // total 口径下是30天的日粒度序列
    assert_eq!(analytics.views_trend.length, 30);
    assert_eq!(analytics.views_trend.values.len(), 30);
    assert_eq!(analytics.views_trend.values[29], 1, "today's view lands last");
    assert_eq!(analytics.views_trend.values[27], 2, "two days ago lands at offset 2");

    // referrer 已归并为主机名并按计数排序
    assert_eq!(analytics.breakdowns.referrers[0].value, "example.com");
    assert_eq!(analytics.breakdowns.referrers[0].count, 2);
    assert_eq!(analytics.breakdowns.referrers[1].value, "news.ycombinator.com");
    assert_eq!(analytics.breakdowns.devices[0].value, "Desktop");
    assert_eq!(analytics.breakdowns.devices[0].count, 2);
}

#[tokio::test]
async fn missing_post_is_not_found() {
    let store = Arc::new(MemoryEventStore::default());
    let service = service(store);

    let result = service
        .post_analytics(99, TimeFilter::Total, Utc::now())
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn user_analytics_join_post_stats_in_memory() {
    let store = Arc::new(MemoryEventStore::default());
    let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    store.add_post(1, 10, "Rust tips", now - Duration::days(20));
    store.add_post(1, 11, "Cooking notes", now - Duration::days(5));
    store.add_post(2, 12, "Someone else", now - Duration::days(5));

    store.add_view(10, "10.0.0.1", now - Duration::days(1));
    store.add_view(10, "10.0.0.2", now - Duration::hours(2));
    store.add_view(11, "10.0.0.3", now - Duration::hours(6));
    store.add_view(12, "10.0.0.4", now - Duration::hours(1));
    store.add_comment(10, now - Duration::hours(5));
    store.add_like(11, now - Duration::hours(4));

    let service = service(store);
    let query = AnalyticsQuery {
        time_filter: None,
        page: None,
        per_page: None,
        search: None,
    };
    let analytics = service
        .user_analytics(1, TimeFilter::Total, &query, now)
        .await
        .unwrap();

    // 只聚合该作者的文章，隔壁作者的浏览不掺进来
    assert_eq!(analytics.engagement.total_views, 3);
    assert_eq!(analytics.engagement.comments_count, 1);
    assert_eq!(analytics.engagement.likes_count, 1);

    assert_eq!(analytics.posts.total, 2);
    assert_eq!(analytics.posts.data.len(), 2);
    assert_eq!(analytics.posts.total_pages, 1);

    // 列表按发布时间倒序，每行带各自的计数
    assert_eq!(analytics.posts.data[0].post.id, 11);
    assert_eq!(analytics.posts.data[0].views, 1);
    assert_eq!(analytics.posts.data[0].likes, 1);
    assert_eq!(analytics.posts.data[1].post.id, 10);
    assert_eq!(analytics.posts.data[1].views, 2);
    assert_eq!(analytics.posts.data[1].comments, 1);
}

#[tokio::test]
async fn user_post_listing_supports_search_and_paging() {
    let store = Arc::new(MemoryEventStore::default());
    let now = Utc::now();

    for i in 0..15 {
        store.add_post(1, 100 + i, &format!("Rust post {}", i), now - Duration::days(i));
    }
    store.add_post(1, 200, "Gardening", now - Duration::days(30));

    let service = service(store);

    let query = AnalyticsQuery {
        time_filter: None,
        page: Some(2),
        per_page: Some(10),
        search: Some("rust".to_string()),
    };
    let analytics = service
        .user_analytics(1, TimeFilter::Total, &query, now)
        .await
        .unwrap();

    assert_eq!(analytics.posts.total, 15);
    assert_eq!(analytics.posts.data.len(), 5, "second page holds the remainder");
    assert_eq!(analytics.posts.page, 2);
    assert_eq!(analytics.posts.total_pages, 2);
}

#[tokio::test]
async fn admin_analytics_reports_totals_and_comparisons() {
    let store = Arc::new(MemoryEventStore::default());
    let now = Utc::now();

    store.add_post(1, 10, "One", now - Duration::days(9));
    store.add_post(2, 11, "Two", now - Duration::days(8));

    for i in 0..6 {
        store.add_view(10, &format!("10.0.0.{}", i), now - Duration::hours(i as i64 + 1));
    }
    for i in 0..3 {
        store.add_view(11, &format!("10.0.1.{}", i), now - Duration::hours(26 + i as i64));
    }
    store.add_like(10, now - Duration::hours(2));

    let service = service(store);
    let analytics = service
        .admin_analytics(TimeFilter::Last24Hours, now)
        .await
        .unwrap();

    // 总量是全量口径，不随时间过滤收窄
    assert_eq!(analytics.total_views, 9);
    assert_eq!(analytics.total_likes, 1);
    assert_eq!(analytics.total_posts, 2);
    assert_eq!(analytics.avg_views_per_post, 4.5);

    assert_eq!(analytics.views_comparison.current, 6);
    assert_eq!(analytics.views_comparison.previous, 3);
    assert_eq!(analytics.views_comparison.percent_change, 100.0);
    assert_eq!(analytics.likes_comparison.current, 1);
    assert_eq!(analytics.likes_comparison.previous, 0);
    assert_eq!(analytics.likes_comparison.percent_change, 0.0);
}

#[tokio::test]
async fn admin_trends_return_four_aligned_series() {
    let store = Arc::new(MemoryEventStore::default());
    let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    store.add_post(1, 10, "One", now - Duration::days(200));
    store.add_view(10, "10.0.0.1", now - Duration::hours(1));
    store.add_view(10, "10.0.0.2", now - Duration::days(40));
    store.add_like(10, now - Duration::days(3));
    store.add_user(now - Duration::days(2));
    store.add_subscriber(now - Duration::days(100));

    let service = service(store.clone());

    let chart = service.admin_trends(TrendRange::Week, now).await.unwrap();
    assert_eq!(chart.period, "Last 7 days");
    for series in [&chart.views, &chart.likes, &chart.new_users, &chart.new_subscribers] {
        assert_eq!(series.length, 7);
        assert_eq!(series.values.len(), 7);
    }
    assert_eq!(chart.views.values[6], 1, "the view an hour ago is today's bucket");
    assert_eq!(chart.likes.values[3], 1, "the like three days ago");
    assert_eq!(chart.new_users.values[4], 1);
    assert_eq!(chart.new_subscribers.values.iter().sum::<i64>(), 0, "out of window");

    let yearly = service.admin_trends(TrendRange::All, now).await.unwrap();
    assert_eq!(yearly.period, "Last 12 months");
    assert_eq!(yearly.views.length, 12);
    assert_eq!(yearly.views.values[11], 1, "this month's view");
    // 2024-03-10 往前40天是1月30日，差两个日历月
    assert_eq!(yearly.views.values[9], 1);
    assert_eq!(yearly.new_subscribers.values.iter().sum::<i64>(), 1);
}

#[tokio::test]
async fn hourly_trend_buckets_by_hour_of_day() {
    let store = Arc::new(MemoryEventStore::default());
    let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();

    store.add_post(1, 10, "One", now - Duration::days(200));
    // 三天前上午7点的浏览：小时粒度按绝对小时分桶，不按距今偏移
    store.add_view(10, "10.0.0.1", Utc.with_ymd_and_hms(2024, 3, 7, 7, 30, 0).unwrap());

    let service = service(store);
    let chart = service.admin_trends(TrendRange::Day, now).await.unwrap();

    assert_eq!(chart.views.length, 24);
    assert_eq!(chart.views.values[7], 1);
}

#[tokio::test]
async fn failed_dimension_queries_degrade_to_empty_sections() {
    let store = Arc::new(MemoryEventStore::default());
    let now = Utc::now();

    store.add_post(1, 10, "One", now - Duration::days(3));
    store.add_view_with_dimensions(10, "10.0.0.1", now - Duration::hours(1), Some("https://example.com"), Some("Desktop"));
    *store.fail_dimension_counts.lock().unwrap() = true;

    let service = service(store);
    let analytics = service
        .post_analytics(10, TimeFilter::Total, now)
        .await;
    let analytics = tokio_test::assert_ok!(analytics);

    // 细分查询全挂，响应仍然成功，区块在但为空
    assert!(analytics.breakdowns.referrers.is_empty());
    assert!(analytics.breakdowns.devices.is_empty());
    assert!(analytics.breakdowns.countries.is_empty());
    // 其余子指标不受影响
    assert_eq!(analytics.engagement.total_views, 1);
}
