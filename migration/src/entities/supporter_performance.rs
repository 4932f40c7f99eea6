//! Supporter performance entity: (pitch, supporter) 归因汇总行

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "supporter_performance")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub pitch_id: String,
    pub supporter_id: String,
    /// 该 supporter 为此 pitch 创建的 referral 数
    pub referrals_created: i64,
    /// 后代 referral 总数（链条触达）
    pub chain_reach: i64,
    pub views: i64,
    pub calls: i64,
    pub emails: i64,
    pub shares: i64,
    pub conversions: i64,
    pub last_activity_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
