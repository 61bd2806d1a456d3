use crate::{
    error::Result,
    models::analytics::{AnalyticsQuery, TimeFilter, TrendQuery, TrendRange},
    state::AppState,
};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// 全站统计接口。角色校验由上游网关完成，这里只管数据口径。
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(site_analytics))
        .route("/trends", get(site_trends))
}

/// 获取全站统计概览
/// GET /api/admin/analytics?time_filter=30d
async fn site_analytics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<Value>> {
    debug!("Getting site-wide analytics");

    let filter = TimeFilter::parse(query.time_filter.as_deref());
    let analytics = state
        .analytics_service
        .admin_analytics(filter, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": analytics
    })))
}

/// 获取全站趋势图
/// GET /api/admin/analytics/trends?range=week
async fn site_trends(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendQuery>,
) -> Result<Json<Value>> {
    debug!("Getting site-wide trend chart");

    let range = TrendRange::parse(query.range.as_deref());
    let trends = state
        .analytics_service
        .admin_trends(range, Utc::now())
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": trends
    })))
}
