use crate::{
    error::Result,
    models::analytics::{AnalyticsQuery, TimeFilter, ViewContext},
    state::AppState,
    utils::visitor,
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id/track-view", post(track_view))
        .route("/:id/analytics", get(post_analytics))
}

pub fn user_router() -> Router<Arc<AppState>> {
    Router::new().route("/:id/blogs/analytics", get(user_analytics))
}

/// 上报一次文章浏览
/// POST /api/blogs/:id/track-view
///
/// 去重窗口内的重复浏览也回 200，只是不再计数；
/// 富化失败绝不阻塞页面响应。
async fn track_view(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Value>> {
    debug!("Tracking view for post: {}", post_id);

    let identity = visitor::identity_from_headers(&headers);
    let context = ViewContext {
        user_agent: visitor::user_agent(&headers),
        referrer: visitor::referrer(&headers),
        country: visitor::country(&headers),
    };

    let outcome = state
        .analytics_service
        .track_view(post_id, identity, context, Utc::now())
        .await?;

    let message = if outcome.recorded {
        "View recorded"
    } else {
        "View already counted recently"
    };

    Ok(Json(json!({
        "success": true,
        "message": message
    })))
}

/// 获取单篇文章的统计数据
/// GET /api/blogs/:id/analytics?time_filter=7d
async fn post_analytics(
    State(state): State<Arc<AppState>>,
    Path(post_id): Path<i64>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Value>> {
    debug!("Getting analytics for post: {}", post_id);

    let filter = TimeFilter::parse(query.time_filter.as_deref());
    let analytics = state
        .analytics_service
        .post_analytics(post_id, filter, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": analytics
    })))
}

/// 获取作者全部文章的聚合统计
/// GET /api/users/:id/blogs/analytics?time_filter=30d&page=1&per_page=10&search=rust
async fn user_analytics(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Value>> {
    debug!("Getting aggregate analytics for user: {}", user_id);

    let filter = TimeFilter::parse(query.time_filter.as_deref());
    let analytics = state
        .analytics_service
        .user_analytics(user_id, filter, &query, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": analytics
    })))
}
