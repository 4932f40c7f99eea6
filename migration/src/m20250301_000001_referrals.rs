//! Referral 表迁移
//!
//! 唯一索引 (pitch_id, supporter_id) 保证每个 supporter 对同一 pitch
//! 至多一条 referral（幂等创建直接命中该约束）。

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Referrals::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Referrals::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Referrals::PitchId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Referrals::SupporterId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Referrals::ParentReferralId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Referrals::Platform)
                            .string_len(32)
                            .not_null()
                            .default("unknown"),
                    )
                    .col(
                        ColumnDef::new(Referrals::SourceType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Referrals::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Referrals::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 幂等创建约束：每个 (pitch, supporter) 至多一条
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_referrals_pitch_supporter")
                    .table(Referrals::Table)
                    .col(Referrals::PitchId)
                    .col(Referrals::SupporterId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 链走查沿 parent 指针向上，按 parent 查子节点用于重建 reach
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_referrals_parent")
                    .table(Referrals::Table)
                    .col(Referrals::ParentReferralId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_referrals_pitch")
                    .table(Referrals::Table)
                    .col(Referrals::PitchId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_referrals_pitch").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_referrals_parent").to_owned())
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_referrals_pitch_supporter")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Referrals::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Referrals {
    #[sea_orm(iden = "referrals")]
    Table,
    Id,
    PitchId,
    SupporterId,
    ParentReferralId,
    Platform,
    SourceType,
    Active,
    CreatedAt,
}
