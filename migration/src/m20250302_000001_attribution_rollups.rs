//! 归因汇总表迁移
//!
//! 三张派生表，全部可以从 tracking_events 重建：
//! - chain_stats: 每个 referral 的 own_*/chain_* 计数
//! - daily_metrics: (pitch, day) 计数桶
//! - supporter_performance: (pitch, supporter) 汇总行

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 1. chain_stats
        manager
            .create_table(
                Table::create()
                    .table(ChainStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChainStats::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ChainStats::ReferralId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChainStats::PitchId).string_len(64).not_null())
                    .col(
                        ColumnDef::new(ChainStats::SupporterId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChainStats::Depth)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(counter(ChainStats::OwnViews))
                    .col(counter(ChainStats::OwnCalls))
                    .col(counter(ChainStats::OwnEmails))
                    .col(counter(ChainStats::OwnShares))
                    .col(counter(ChainStats::OwnConversions))
                    .col(counter(ChainStats::ChainViews))
                    .col(counter(ChainStats::ChainCalls))
                    .col(counter(ChainStats::ChainEmails))
                    .col(counter(ChainStats::ChainShares))
                    .col(counter(ChainStats::ChainConversions))
                    .col(
                        ColumnDef::new(ChainStats::LastActivityAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_chain_stats_referral")
                    .table(ChainStats::Table)
                    .col(ChainStats::ReferralId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_chain_stats_pitch")
                    .table(ChainStats::Table)
                    .col(ChainStats::PitchId)
                    .to_owned(),
            )
            .await?;

        // 2. daily_metrics
        manager
            .create_table(
                Table::create()
                    .table(DailyMetrics::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DailyMetrics::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DailyMetrics::PitchId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DailyMetrics::DayBucket).date().not_null())
                    .col(counter(DailyMetrics::Views))
                    .col(counter(DailyMetrics::Calls))
                    .col(counter(DailyMetrics::Emails))
                    .col(counter(DailyMetrics::Shares))
                    .col(counter(DailyMetrics::Conversions))
                    .col(counter(DailyMetrics::UniqueVisitors))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_daily_metrics_pitch_day")
                    .table(DailyMetrics::Table)
                    .col(DailyMetrics::PitchId)
                    .col(DailyMetrics::DayBucket)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // 3. supporter_performance
        manager
            .create_table(
                Table::create()
                    .table(SupporterPerformance::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SupporterPerformance::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SupporterPerformance::PitchId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SupporterPerformance::SupporterId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(counter(SupporterPerformance::ReferralsCreated))
                    .col(counter(SupporterPerformance::ChainReach))
                    .col(counter(SupporterPerformance::Views))
                    .col(counter(SupporterPerformance::Calls))
                    .col(counter(SupporterPerformance::Emails))
                    .col(counter(SupporterPerformance::Shares))
                    .col(counter(SupporterPerformance::Conversions))
                    .col(
                        ColumnDef::new(SupporterPerformance::LastActivityAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_supporter_perf_pitch_supporter")
                    .table(SupporterPerformance::Table)
                    .col(SupporterPerformance::PitchId)
                    .col(SupporterPerformance::SupporterId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_supporter_perf_pitch_supporter")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(SupporterPerformance::Table)
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_daily_metrics_pitch_day").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DailyMetrics::Table).to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_chain_stats_pitch").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_chain_stats_referral").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ChainStats::Table).to_owned())
            .await?;

        Ok(())
    }
}

/// 计数列：big integer, not null, default 0
fn counter<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .big_integer()
        .not_null()
        .default(0)
        .to_owned()
}

#[derive(DeriveIden)]
enum ChainStats {
    #[sea_orm(iden = "chain_stats")]
    Table,
    Id,
    ReferralId,
    PitchId,
    SupporterId,
    Depth,
    OwnViews,
    OwnCalls,
    OwnEmails,
    OwnShares,
    OwnConversions,
    ChainViews,
    ChainCalls,
    ChainEmails,
    ChainShares,
    ChainConversions,
    LastActivityAt,
}

#[derive(DeriveIden)]
enum DailyMetrics {
    #[sea_orm(iden = "daily_metrics")]
    Table,
    Id,
    PitchId,
    DayBucket,
    Views,
    Calls,
    Emails,
    Shares,
    Conversions,
    UniqueVisitors,
}

#[derive(DeriveIden)]
enum SupporterPerformance {
    #[sea_orm(iden = "supporter_performance")]
    Table,
    Id,
    PitchId,
    SupporterId,
    ReferralsCreated,
    ChainReach,
    Views,
    Calls,
    Emails,
    Shares,
    Conversions,
    LastActivityAt,
}
