use crate::models::post::{PostAnalyticsRow, PostSummary};
use crate::utils::serde_helpers::thing_id;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 浏览事件（去重通过后落库的记录，落库后不可变更）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewEvent {
    #[serde(with = "thing_id")]
    pub id: String,
    pub post_id: i64,
    pub actor_key: Option<String>,
    pub user_id: Option<i64>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 待写入的浏览事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewViewEvent {
    pub post_id: i64,
    pub actor_key: Option<String>,
    pub user_id: Option<i64>,
    pub session_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 访客身份信号，去重时按 会话 > 用户 > IP 的优先级取 actor key
#[derive(Debug, Clone, Default)]
pub struct VisitorIdentity {
    pub session_id: Option<String>,
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
}

impl VisitorIdentity {
    pub fn actor_key(&self) -> Option<String> {
        if let Some(session) = &self.session_id {
            return Some(format!("session:{}", session));
        }
        if let Some(user) = self.user_id {
            return Some(format!("user:{}", user));
        }
        self.ip_address.as_ref().map(|ip| format!("ip:{}", ip))
    }

    pub fn is_empty(&self) -> bool {
        self.session_id.is_none() && self.user_id.is_none() && self.ip_address.is_none()
    }
}

/// 浏览上报时随请求携带的维度信息
#[derive(Debug, Clone, Default)]
pub struct ViewContext {
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
    pub country: Option<String>,
}

/// 参与度快照（每次请求即时计算，不落库）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementSnapshot {
    pub total_views: i64,
    pub unique_views: i64,
    pub comments_count: i64,
    pub likes_count: i64,
    pub engagement_rate: f64,
}

impl EngagementSnapshot {
    pub fn compute(total_views: i64, unique_views: i64, comments_count: i64, likes_count: i64) -> Self {
        let engagement_rate = if total_views > 0 {
            round2((comments_count + likes_count) as f64 / total_views as f64 * 100.0)
        } else {
            0.0
        };

        Self {
            total_views,
            unique_views,
            comments_count,
            likes_count,
            engagement_rate,
        }
    }
}

/// 环比对比结果：当前周期 vs 等长的上一周期
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub metric: Metric,
    pub current: i64,
    pub previous: i64,
    pub percent_change: f64,
    pub period_label: String,
}

impl ComparisonResult {
    pub fn zero(metric: Metric, period_label: &str) -> Self {
        Self {
            metric,
            current: 0,
            previous: 0,
            percent_change: 0.0,
            period_label: period_label.to_string(),
        }
    }
}

/// 百分比变化，previous 为 0 时按 0 处理而不是无穷大
pub fn percent_change(current: i64, previous: i64) -> f64 {
    if previous > 0 {
        round2((current - previous) as f64 / previous as f64 * 100.0)
    } else {
        0.0
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 趋势序列：定长数组，index 0 为最旧桶，末位为当前桶，缺口补零
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSeries {
    pub granularity: Granularity,
    pub length: usize,
    pub values: Vec<i64>,
}

/// 聚合粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
    Month,
}

impl Granularity {
    /// EventStore 按此格式截断时间戳做分组键
    pub fn key_format(&self) -> &'static str {
        match self {
            Granularity::Hour => "%H",
            Granularity::Day => "%Y-%m-%d",
            Granularity::Month => "%Y-%m",
        }
    }
}

/// 统计指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Views,
    Likes,
    Comments,
    NewUsers,
    NewSubscribers,
}

impl Metric {
    pub fn table(&self) -> &'static str {
        match self {
            Metric::Views => "view_event",
            Metric::Likes => "post_like",
            Metric::Comments => "comment",
            Metric::NewUsers => "user",
            Metric::NewSubscribers => "subscriber",
        }
    }

    /// 用户和订阅者事件不挂在具体文章上
    pub fn is_post_scoped(&self) -> bool {
        matches!(self, Metric::Views | Metric::Likes | Metric::Comments)
    }
}

/// 维度分组的封闭枚举，每个成员映射到一个明确的列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Referrer,
    DeviceType,
    Browser,
    Os,
    Country,
}

impl Dimension {
    pub fn column(&self) -> &'static str {
        match self {
            Dimension::Referrer => "referrer",
            Dimension::DeviceType => "device_type",
            Dimension::Browser => "browser",
            Dimension::Os => "os",
            Dimension::Country => "country",
        }
    }
}

/// EventStore 返回的分组计数行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRow {
    pub bucket_key: String,
    pub count: i64,
}

/// 维度分组计数行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionRow {
    pub value: String,
    pub count: i64,
}

/// 查询范围，左闭右开 [start, end)，start 为 None 表示不限起点
#[derive(Debug, Clone)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn unbounded(end: DateTime<Utc>) -> Self {
        Self { start: None, end }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start: Some(start), end }
    }
}

/// 查询主体范围：单篇文章、某作者的全部文章、或全站
#[derive(Debug, Clone)]
pub enum Scope {
    Post(i64),
    Author(i64),
    Site,
}

/// 时间过滤器。对外接受 24h/7d/30d/1m/1y/total 几种拼写
/// （30d 与 1m 指同一个 30 天窗口），未知值回落到 total。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeFilter {
    Last24Hours,
    Last7Days,
    Last30Days,
    LastYear,
    Total,
}

impl TimeFilter {
    pub fn parse(value: Option<&str>) -> Self {
        match value.unwrap_or("total") {
            "24h" => TimeFilter::Last24Hours,
            "7d" => TimeFilter::Last7Days,
            "30d" | "1m" => TimeFilter::Last30Days,
            "1y" => TimeFilter::LastYear,
            _ => TimeFilter::Total,
        }
    }

    /// 当前周期的窗口长度，total 不限
    pub fn window(&self) -> Option<Duration> {
        match self {
            TimeFilter::Last24Hours => Some(Duration::hours(24)),
            TimeFilter::Last7Days => Some(Duration::days(7)),
            TimeFilter::Last30Days => Some(Duration::days(30)),
            TimeFilter::LastYear => Some(Duration::days(365)),
            TimeFilter::Total => None,
        }
    }

    pub fn range(&self, now: DateTime<Utc>) -> TimeRange {
        match self.window() {
            Some(window) => TimeRange::between(now - window, now),
            None => TimeRange::unbounded(now),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeFilter::Last24Hours => "Last 24 hours",
            TimeFilter::Last7Days => "Last 7 days",
            TimeFilter::Last30Days => "Last 30 days",
            TimeFilter::LastYear => "Last year",
            TimeFilter::Total => "All time",
        }
    }

    /// 文章/作者维度的浏览趋势桶数：7 天过滤给 7 桶，其余给 30 桶
    pub fn series_horizon(&self) -> usize {
        match self {
            TimeFilter::Last7Days => 7,
            _ => 30,
        }
    }
}

/// 趋势图范围。all 与 year 等价：12 个月度桶；未知值回落到 all。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendRange {
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TrendRange {
    pub fn parse(value: Option<&str>) -> Self {
        match value.unwrap_or("all") {
            "day" => TrendRange::Day,
            "week" => TrendRange::Week,
            "month" => TrendRange::Month,
            "year" => TrendRange::Year,
            _ => TrendRange::All,
        }
    }

    pub fn granularity(&self) -> Granularity {
        match self {
            TrendRange::Day => Granularity::Hour,
            TrendRange::Week | TrendRange::Month => Granularity::Day,
            TrendRange::Year | TrendRange::All => Granularity::Month,
        }
    }

    pub fn horizon(&self) -> usize {
        match self {
            TrendRange::Day => 24,
            TrendRange::Week => 7,
            TrendRange::Month => 30,
            TrendRange::Year | TrendRange::All => 12,
        }
    }

    /// 小时粒度按绝对小时分桶，查询不限起点；其余范围按窗口起点过滤
    pub fn query_range(&self, now: DateTime<Utc>) -> TimeRange {
        match self {
            TrendRange::Day => TimeRange::unbounded(now),
            TrendRange::Week => TimeRange::between(now - Duration::days(7), now),
            TrendRange::Month => TimeRange::between(now - Duration::days(30), now),
            TrendRange::Year | TrendRange::All => {
                TimeRange::between(now - Duration::days(365), now)
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrendRange::Day => "Last 24 hours",
            TrendRange::Week => "Last 7 days",
            TrendRange::Month => "Last 30 days",
            TrendRange::Year | TrendRange::All => "Last 12 months",
        }
    }
}

// Query parameter structs

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsQuery {
    pub time_filter: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrendQuery {
    pub range: Option<String>,
}

// Response payloads

/// 各维度 Top-N 细分，referrer 已归并为主机名
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DimensionBreakdowns {
    pub referrers: Vec<DimensionRow>,
    pub devices: Vec<DimensionRow>,
    pub browsers: Vec<DimensionRow>,
    pub operating_systems: Vec<DimensionRow>,
    pub countries: Vec<DimensionRow>,
}

/// 单篇文章统计载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostAnalyticsResponse {
    pub post: PostSummary,
    pub period: String,
    pub engagement: EngagementSnapshot,
    pub views_trend: TrendSeries,
    pub breakdowns: DimensionBreakdowns,
}

/// 作者全部文章的聚合统计载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAnalyticsResponse {
    pub user_id: i64,
    pub period: String,
    pub engagement: EngagementSnapshot,
    pub views_trend: TrendSeries,
    pub breakdowns: DimensionBreakdowns,
    pub posts: PaginatedPosts,
}

/// 作者文章列表（分页 + 按标题搜索）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginatedPosts {
    pub data: Vec<PostAnalyticsRow>,
    pub total: i64,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

/// 全站统计载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAnalyticsResponse {
    pub period: String,
    pub total_views: i64,
    pub total_likes: i64,
    pub total_posts: i64,
    pub avg_views_per_post: f64,
    pub views_comparison: ComparisonResult,
    pub likes_comparison: ComparisonResult,
}

/// 全站趋势图载荷：四个指标各一条定长序列
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendChartResponse {
    pub period: String,
    pub views: TrendSeries,
    pub likes: TrendSeries,
    pub new_users: TrendSeries,
    pub new_subscribers: TrendSeries,
}

/// 浏览上报结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackViewOutcome {
    pub recorded: bool,
}
