//! Attribution chain node entity
//!
//! 每个 referral 一行：own_* 为本节点直接产生的计数，
//! chain_* 为本节点及全部后代的累计。不变式：chain_x >= own_x。

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "chain_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub referral_id: i64,
    pub pitch_id: String,
    pub supporter_id: String,
    /// 距链根的跳数（根 = 0）
    pub depth: i32,
    pub own_views: i64,
    pub own_calls: i64,
    pub own_emails: i64,
    pub own_shares: i64,
    pub own_conversions: i64,
    pub chain_views: i64,
    pub chain_calls: i64,
    pub chain_emails: i64,
    pub chain_shares: i64,
    pub chain_conversions: i64,
    pub last_activity_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
