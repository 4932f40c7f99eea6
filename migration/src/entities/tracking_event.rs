//! Tracking event entity: append-only interaction log
//!
//! 事件一经写入不再修改（审计日志），所有派生聚合表都可以从这里重建。

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "tracking_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub pitch_id: String,
    /// Pitch owner（反范式冗余，加速按 owner 的汇总查询）
    pub user_id: String,
    /// null = 无归因的自然流量
    pub referral_id: Option<i64>,
    pub event_type: String,
    pub platform: String,
    pub session_id: Option<String>,
    pub occurred_at: DateTimeUtc,
    /// 开放的 key-value 附加信息（JSON 文本）
    #[sea_orm(column_type = "Text", nullable)]
    pub metadata: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
