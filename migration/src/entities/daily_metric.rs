//! Daily metric entity: (pitch, day) 计数桶，用于 sparkline 和周期对比

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "daily_metrics")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub pitch_id: String,
    pub day_bucket: Date,
    pub views: i64,
    pub calls: i64,
    pub emails: i64,
    pub shares: i64,
    pub conversions: i64,
    pub unique_visitors: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
