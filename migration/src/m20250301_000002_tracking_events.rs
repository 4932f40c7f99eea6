//! Tracking event 表迁移（append-only 事件日志）

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TrackingEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TrackingEvents::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TrackingEvents::PitchId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrackingEvents::UserId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrackingEvents::ReferralId)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TrackingEvents::EventType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrackingEvents::Platform)
                            .string_len(32)
                            .not_null()
                            .default("unknown"),
                    )
                    .col(
                        ColumnDef::new(TrackingEvents::SessionId)
                            .string_len(128)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TrackingEvents::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TrackingEvents::Metadata).text().null())
                    .to_owned(),
            )
            .await?;

        // 范围查询主路径：pitch + 时间窗
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_events_pitch_occurred")
                    .table(TrackingEvents::Table)
                    .col(TrackingEvents::PitchId)
                    .col(TrackingEvents::OccurredAt)
                    .to_owned(),
            )
            .await?;

        // 按 owner 的汇总查询
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_events_user_occurred")
                    .table(TrackingEvents::Table)
                    .col(TrackingEvents::UserId)
                    .col(TrackingEvents::OccurredAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_events_referral")
                    .table(TrackingEvents::Table)
                    .col(TrackingEvents::ReferralId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_events_referral").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_events_user_occurred").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_events_pitch_occurred").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TrackingEvents::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum TrackingEvents {
    #[sea_orm(iden = "tracking_events")]
    Table,
    Id,
    PitchId,
    UserId,
    ReferralId,
    EventType,
    Platform,
    SessionId,
    OccurredAt,
    Metadata,
}
