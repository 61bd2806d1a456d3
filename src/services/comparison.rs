use crate::error::Result;
use crate::models::analytics::{percent_change, ComparisonResult, Metric, Scope, TimeFilter, TimeRange};
use crate::services::event_store::EventStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

/// 环比统计：当前周期 vs 紧邻的等长上一周期。
#[derive(Clone)]
pub struct PeriodComparator {
    store: Arc<dyn EventStore>,
}

impl PeriodComparator {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    pub async fn compare(
        &self,
        metric: Metric,
        filter: TimeFilter,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<ComparisonResult> {
        let period_label = filter.label().to_string();

        // total 不限起点，没有可比的上一周期
        let Some(window) = filter.window() else {
            let current = self
                .store
                .count_metric(metric, scope, &TimeRange::unbounded(now))
                .await?;
            return Ok(ComparisonResult {
                metric,
                current,
                previous: 0,
                percent_change: 0.0,
                period_label,
            });
        };

        let current_start = now - window;
        let current = self
            .store
            .count_metric(metric, scope, &TimeRange::between(current_start, now))
            .await?;

        // 上一周期的计数失败只降级为 0，环比本身是尽力而为的
        let previous_range = TimeRange::between(current_start - window, current_start);
        let previous = match self.store.count_metric(metric, scope, &previous_range).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Previous period count degraded to 0 for {:?}: {}", metric, e);
                0
            }
        };

        Ok(ComparisonResult {
            metric,
            current,
            previous,
            percent_change: percent_change(current, previous),
            period_label,
        })
    }
}
