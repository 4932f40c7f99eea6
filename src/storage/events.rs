//! Tracking event log 的写入与扫描
//!
//! 事件日志是事实来源：同步单条写入（不经过聚合缓冲），
//! rebuild 时按 id 升序分页扫描整个 pitch 的事件流。

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use tracing::trace;

use super::SeaOrmStorage;
use super::retry;
use crate::errors::Result;

use migration::entities::tracking_event;

/// 一条待写入的交互事件
#[derive(Debug, Clone)]
pub struct NewTrackingEvent {
    pub pitch_id: String,
    pub user_id: String,
    pub referral_id: Option<i64>,
    pub event_type: String,
    pub platform: String,
    pub session_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Option<String>,
}

impl SeaOrmStorage {
    /// 追加一条事件到日志（同步写，成功返回事件 id）
    pub async fn insert_event(&self, event: NewTrackingEvent) -> Result<i64> {
        let model = tracking_event::ActiveModel {
            pitch_id: Set(event.pitch_id),
            user_id: Set(event.user_id),
            referral_id: Set(event.referral_id),
            event_type: Set(event.event_type),
            platform: Set(event.platform),
            session_id: Set(event.session_id),
            occurred_at: Set(event.occurred_at),
            metadata: Set(event.metadata),
            ..Default::default()
        };

        let db = &self.db;
        let res = retry::with_retry("insert_event", self.retry_config, || async {
            tracking_event::Entity::insert(model.clone()).exec(db).await
        })
        .await?;

        trace!("Tracking event {} appended", res.last_insert_id);
        Ok(res.last_insert_id)
    }

    /// 按 id 升序分页扫描某个 pitch 的事件（rebuild 用）
    pub async fn events_for_pitch_page(
        &self,
        pitch_id: &str,
        after_id: i64,
        limit: u64,
    ) -> Result<Vec<tracking_event::Model>> {
        let db = &self.db;
        let events = retry::with_retry("events_for_pitch_page", self.retry_config, || async {
            tracking_event::Entity::find()
                .filter(tracking_event::Column::PitchId.eq(pitch_id))
                .filter(tracking_event::Column::Id.gt(after_id))
                .order_by_asc(tracking_event::Column::Id)
                .limit(limit)
                .all(db)
                .await
        })
        .await?;

        Ok(events)
    }
}
