//! Referral entity: one supporter's distribution link for one pitch
//!
//! `parent_referral_id` 指向同一 pitch 下的上级 referral，
//! 形成以 null-parent 节点为根的归因森林（写入时保证无环）。

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "referrals")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub pitch_id: String,
    pub supporter_id: String,
    /// 上级 referral（null = 根节点 / 自然流量入口）
    pub parent_referral_id: Option<i64>,
    /// whatsapp / linkedin / email / twitter / direct / unknown
    pub platform: String,
    /// self / supporter / chain
    pub source_type: String,
    pub active: bool,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
