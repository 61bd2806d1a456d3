use crate::error::Result;
use crate::models::analytics::VisitorIdentity;
use crate::services::event_store::EventStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

/// 浏览去重：窗口期内同一访客对同一文章的重复浏览不再计数。
///
/// 查最近一条事件和写入新事件之间没有事务保证，同一瞬间的并发
/// 重复请求可能都通过判定——轻微多计是这里接受的取舍，不加锁。
#[derive(Clone)]
pub struct ViewDeduplicator {
    store: Arc<dyn EventStore>,
    window: Duration,
}

impl ViewDeduplicator {
    pub fn new(store: Arc<dyn EventStore>, window_minutes: i64) -> Self {
        Self {
            store,
            window: Duration::minutes(window_minutes),
        }
    }

    /// 判定这次浏览是否计为新浏览
    pub async fn should_record(
        &self,
        post_id: i64,
        identity: &VisitorIdentity,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        // 一个身份信号都没有就无从去重，每次都计数
        if identity.is_empty() {
            return Ok(true);
        }

        match self.store.find_recent_view(post_id, identity).await? {
            Some(previous) if now - previous.created_at < self.window => {
                debug!(
                    "Suppressing repeat view for post {} within dedup window",
                    post_id
                );
                Ok(false)
            }
            _ => Ok(true),
        }
    }
}
