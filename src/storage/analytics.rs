//! 分析读路径的查询
//!
//! funnel / viral / channels 直接扫事件日志做分组计数，
//! sparkline 和 KPI 对比走 daily_metrics 预聚合表，
//! 榜单走 chain_stats / supporter_performance。

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ColumnTrait, EntityTrait, FromQueryResult, QueryFilter, QueryOrder, QuerySelect,
};

use super::SeaOrmStorage;
use super::retry;
use crate::errors::Result;

use migration::entities::{chain_stat, daily_metric, supporter_performance, tracking_event};

/// 按事件类型的计数行
#[derive(Debug, Clone, FromQueryResult)]
pub struct TypeCountRow {
    pub event_type: String,
    pub count: i64,
}

/// 按 (platform, event_type) 的计数行
#[derive(Debug, Clone, FromQueryResult)]
pub struct PlatformCountRow {
    pub platform: String,
    pub event_type: String,
    pub count: i64,
}

/// daily_metrics 的一行（sparkline / KPI 对比用）
#[derive(Debug, Clone, FromQueryResult)]
pub struct DailySeriesRow {
    pub day_bucket: NaiveDate,
    pub views: i64,
    pub calls: i64,
    pub emails: i64,
    pub shares: i64,
    pub conversions: i64,
    pub unique_visitors: i64,
}

impl SeaOrmStorage {
    /// 某 pitch 在时间范围内按事件类型分组计数
    pub async fn event_type_counts(
        &self,
        pitch_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TypeCountRow>> {
        let db = &self.db;
        let rows = retry::with_retry("event_type_counts", self.retry_config, || async {
            tracking_event::Entity::find()
                .select_only()
                .column(tracking_event::Column::EventType)
                .column_as(tracking_event::Column::Id.count(), "count")
                .filter(tracking_event::Column::PitchId.eq(pitch_id))
                .filter(tracking_event::Column::OccurredAt.gte(from))
                .filter(tracking_event::Column::OccurredAt.lt(to))
                .group_by(tracking_event::Column::EventType)
                .into_model::<TypeCountRow>()
                .all(db)
                .await
        })
        .await?;
        Ok(rows)
    }

    /// 某 owner 名下全部 pitch 的事件类型分组计数
    pub async fn event_type_counts_for_user(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TypeCountRow>> {
        let db = &self.db;
        let rows = retry::with_retry("event_type_counts_for_user", self.retry_config, || async {
            tracking_event::Entity::find()
                .select_only()
                .column(tracking_event::Column::EventType)
                .column_as(tracking_event::Column::Id.count(), "count")
                .filter(tracking_event::Column::UserId.eq(user_id))
                .filter(tracking_event::Column::OccurredAt.gte(from))
                .filter(tracking_event::Column::OccurredAt.lt(to))
                .group_by(tracking_event::Column::EventType)
                .into_model::<TypeCountRow>()
                .all(db)
                .await
        })
        .await?;
        Ok(rows)
    }

    /// 按 (platform, event_type) 分组计数（渠道分解用）
    pub async fn platform_event_counts(
        &self,
        pitch_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PlatformCountRow>> {
        let db = &self.db;
        let rows = retry::with_retry("platform_event_counts", self.retry_config, || async {
            tracking_event::Entity::find()
                .select_only()
                .column(tracking_event::Column::Platform)
                .column(tracking_event::Column::EventType)
                .column_as(tracking_event::Column::Id.count(), "count")
                .filter(tracking_event::Column::PitchId.eq(pitch_id))
                .filter(tracking_event::Column::OccurredAt.gte(from))
                .filter(tracking_event::Column::OccurredAt.lt(to))
                .group_by(tracking_event::Column::Platform)
                .group_by(tracking_event::Column::EventType)
                .into_model::<PlatformCountRow>()
                .all(db)
                .await
        })
        .await?;
        Ok(rows)
    }

    /// 某 pitch 的日计数序列（按天升序）
    pub async fn daily_series(
        &self,
        pitch_id: &str,
        from_day: NaiveDate,
        to_day: NaiveDate,
    ) -> Result<Vec<DailySeriesRow>> {
        let db = &self.db;
        let rows = retry::with_retry("daily_series", self.retry_config, || async {
            daily_metric::Entity::find()
                .select_only()
                .column(daily_metric::Column::DayBucket)
                .column(daily_metric::Column::Views)
                .column(daily_metric::Column::Calls)
                .column(daily_metric::Column::Emails)
                .column(daily_metric::Column::Shares)
                .column(daily_metric::Column::Conversions)
                .column(daily_metric::Column::UniqueVisitors)
                .filter(daily_metric::Column::PitchId.eq(pitch_id))
                .filter(daily_metric::Column::DayBucket.gte(from_day))
                .filter(daily_metric::Column::DayBucket.lte(to_day))
                .order_by_asc(daily_metric::Column::DayBucket)
                .into_model::<DailySeriesRow>()
                .all(db)
                .await
        })
        .await?;
        Ok(rows)
    }

    /// 某 pitch 的全部链节点统计行
    pub async fn chain_stats_for_pitch(&self, pitch_id: &str) -> Result<Vec<chain_stat::Model>> {
        let db = &self.db;
        let rows = retry::with_retry("chain_stats_for_pitch", self.retry_config, || async {
            chain_stat::Entity::find()
                .filter(chain_stat::Column::PitchId.eq(pitch_id))
                .all(db)
                .await
        })
        .await?;
        Ok(rows)
    }

    /// 单个 referral 的链节点统计行
    pub async fn chain_stat_for_referral(
        &self,
        referral_id: i64,
    ) -> Result<Option<chain_stat::Model>> {
        let db = &self.db;
        let row = retry::with_retry("chain_stat_for_referral", self.retry_config, || async {
            chain_stat::Entity::find()
                .filter(chain_stat::Column::ReferralId.eq(referral_id))
                .one(db)
                .await
        })
        .await?;
        Ok(row)
    }

    /// 某 pitch 的 supporter 汇总行
    pub async fn supporter_rows_for_pitch(
        &self,
        pitch_id: &str,
    ) -> Result<Vec<supporter_performance::Model>> {
        let db = &self.db;
        let rows = retry::with_retry("supporter_rows_for_pitch", self.retry_config, || async {
            supporter_performance::Entity::find()
                .filter(supporter_performance::Column::PitchId.eq(pitch_id))
                .all(db)
                .await
        })
        .await?;
        Ok(rows)
    }

    /// 某 owner 名下出现过事件的 pitch 列表
    pub async fn pitches_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        #[derive(FromQueryResult)]
        struct PitchRow {
            pitch_id: String,
        }

        let db = &self.db;
        let rows = retry::with_retry("pitches_for_user", self.retry_config, || async {
            tracking_event::Entity::find()
                .select_only()
                .column(tracking_event::Column::PitchId)
                .filter(tracking_event::Column::UserId.eq(user_id))
                .group_by(tracking_event::Column::PitchId)
                .into_model::<PitchRow>()
                .all(db)
                .await
        })
        .await?;
        Ok(rows.into_iter().map(|r| r.pitch_id).collect())
    }
}
