//! AggregateSink implementation for SeaOrmStorage
//!
//! 增量刷盘到三张派生表：chain_stats / daily_metrics / supporter_performance。
//! 全部走原子 upsert（counter = counter + excluded.counter），
//! 数据库层不存在 read-modify-write 竞态。
//!
//! 注册侧的计数（referrals_created / chain_reach）也在这里，
//! 保证 supporter_performance 行只有一条写入路径风格。

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ActiveValue::Set, ColumnTrait, DatabaseBackend, EntityTrait, ExprTrait, QueryFilter};
use tracing::{debug, warn};

use super::SeaOrmStorage;
use super::retry;
use crate::tracking::{AggregateSink, DeltaKey, DeltaValue};

use migration::entities::{chain_stat, daily_metric, supporter_performance};

/// 累加冲突列的表达式：SQLite/PG 用 excluded.col，MySQL 用 VALUES(col)
fn additive_expr(backend: DatabaseBackend, col_name: &str) -> sea_orm::sea_query::SimpleExpr {
    match backend {
        DatabaseBackend::MySql => Expr::col(sea_orm::sea_query::Alias::new(col_name))
            .add(Expr::cust(format!("VALUES({})", col_name))),
        _ => Expr::col(sea_orm::sea_query::Alias::new(col_name))
            .add(Expr::cust(format!("excluded.{}", col_name))),
    }
}

/// 取新值的冲突列表达式（用于 last_activity_at）
fn replace_expr(backend: DatabaseBackend, col_name: &str) -> sea_orm::sea_query::SimpleExpr {
    match backend {
        DatabaseBackend::MySql => Expr::cust(format!("VALUES({})", col_name)).into(),
        _ => Expr::cust(format!("excluded.{}", col_name)).into(),
    }
}

#[async_trait]
impl AggregateSink for SeaOrmStorage {
    async fn flush_deltas(&self, updates: Vec<(DeltaKey, DeltaValue)>) -> anyhow::Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut chain_rows: Vec<(i64, DeltaValue)> = Vec::new();
        let mut daily_rows: Vec<(String, chrono::NaiveDate, DeltaValue)> = Vec::new();
        let mut supporter_rows: Vec<(String, String, DeltaValue)> = Vec::new();

        for (key, value) in updates {
            match key {
                DeltaKey::ChainNode { referral_id } => chain_rows.push((referral_id, value)),
                DeltaKey::Daily { pitch_id, day } => daily_rows.push((pitch_id, day, value)),
                DeltaKey::Supporter {
                    pitch_id,
                    supporter_id,
                } => supporter_rows.push((pitch_id, supporter_id, value)),
            }
        }

        let total =
            chain_rows.len() + daily_rows.len() + supporter_rows.len();

        self.flush_chain_stats(chain_rows).await?;
        self.flush_daily_metrics(daily_rows).await?;
        self.flush_supporter_performance(supporter_rows).await?;

        debug!(
            "Attribution deltas flushed to {} database ({} rows)",
            self.backend_name.to_uppercase(),
            total
        );

        Ok(())
    }
}

impl SeaOrmStorage {
    async fn flush_chain_stats(&self, rows: Vec<(i64, DeltaValue)>) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let backend = self.db.get_database_backend();

        let mut models: Vec<chain_stat::ActiveModel> = Vec::with_capacity(rows.len());
        for (referral_id, value) in &rows {
            let Some(meta) = &value.meta else {
                // compute_deltas 对 ChainNode 始终带 meta，这里只是兜底
                warn!(
                    "chain_stats delta for referral {} missing node meta, skipping",
                    referral_id
                );
                continue;
            };
            models.push(chain_stat::ActiveModel {
                referral_id: Set(*referral_id),
                pitch_id: Set(meta.pitch_id.clone()),
                supporter_id: Set(meta.supporter_id.clone()),
                depth: Set(meta.depth),
                own_views: Set(value.own.views),
                own_calls: Set(value.own.calls),
                own_emails: Set(value.own.emails),
                own_shares: Set(value.own.shares),
                own_conversions: Set(value.own.conversions),
                chain_views: Set(value.chain.views),
                chain_calls: Set(value.chain.calls),
                chain_emails: Set(value.chain.emails),
                chain_shares: Set(value.chain.shares),
                chain_conversions: Set(value.chain.conversions),
                last_activity_at: Set(value.last_activity_at.unwrap_or_else(Utc::now)),
                ..Default::default()
            });
        }

        if models.is_empty() {
            return Ok(());
        }

        let on_conflict = OnConflict::column(chain_stat::Column::ReferralId)
            .value(
                chain_stat::Column::OwnViews,
                additive_expr(backend, "own_views"),
            )
            .value(
                chain_stat::Column::OwnCalls,
                additive_expr(backend, "own_calls"),
            )
            .value(
                chain_stat::Column::OwnEmails,
                additive_expr(backend, "own_emails"),
            )
            .value(
                chain_stat::Column::OwnShares,
                additive_expr(backend, "own_shares"),
            )
            .value(
                chain_stat::Column::OwnConversions,
                additive_expr(backend, "own_conversions"),
            )
            .value(
                chain_stat::Column::ChainViews,
                additive_expr(backend, "chain_views"),
            )
            .value(
                chain_stat::Column::ChainCalls,
                additive_expr(backend, "chain_calls"),
            )
            .value(
                chain_stat::Column::ChainEmails,
                additive_expr(backend, "chain_emails"),
            )
            .value(
                chain_stat::Column::ChainShares,
                additive_expr(backend, "chain_shares"),
            )
            .value(
                chain_stat::Column::ChainConversions,
                additive_expr(backend, "chain_conversions"),
            )
            .value(
                chain_stat::Column::LastActivityAt,
                replace_expr(backend, "last_activity_at"),
            )
            .to_owned();

        let db = &self.db;
        retry::with_retry("flush_chain_stats", self.retry_config, || async {
            chain_stat::Entity::insert_many(models.clone())
                .on_conflict(on_conflict.clone())
                .exec(db)
                .await
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to upsert chain_stats: {}", e))?;

        Ok(())
    }

    async fn flush_daily_metrics(
        &self,
        rows: Vec<(String, chrono::NaiveDate, DeltaValue)>,
    ) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let backend = self.db.get_database_backend();

        let models: Vec<daily_metric::ActiveModel> = rows
            .iter()
            .map(|(pitch_id, day, value)| daily_metric::ActiveModel {
                pitch_id: Set(pitch_id.clone()),
                day_bucket: Set(*day),
                views: Set(value.own.views),
                calls: Set(value.own.calls),
                emails: Set(value.own.emails),
                shares: Set(value.own.shares),
                conversions: Set(value.own.conversions),
                unique_visitors: Set(value.unique_visitors),
                ..Default::default()
            })
            .collect();

        let on_conflict = OnConflict::columns([
            daily_metric::Column::PitchId,
            daily_metric::Column::DayBucket,
        ])
        .value(daily_metric::Column::Views, additive_expr(backend, "views"))
        .value(daily_metric::Column::Calls, additive_expr(backend, "calls"))
        .value(
            daily_metric::Column::Emails,
            additive_expr(backend, "emails"),
        )
        .value(
            daily_metric::Column::Shares,
            additive_expr(backend, "shares"),
        )
        .value(
            daily_metric::Column::Conversions,
            additive_expr(backend, "conversions"),
        )
        .value(
            daily_metric::Column::UniqueVisitors,
            additive_expr(backend, "unique_visitors"),
        )
        .to_owned();

        let db = &self.db;
        retry::with_retry("flush_daily_metrics", self.retry_config, || async {
            daily_metric::Entity::insert_many(models.clone())
                .on_conflict(on_conflict.clone())
                .exec(db)
                .await
        })
        .await
        .map_err(|e| anyhow::anyhow!("Failed to upsert daily_metrics: {}", e))?;

        Ok(())
    }

    async fn flush_supporter_performance(
        &self,
        rows: Vec<(String, String, DeltaValue)>,
    ) -> anyhow::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let backend = self.db.get_database_backend();

        let models: Vec<supporter_performance::ActiveModel> = rows
            .iter()
            .map(
                |(pitch_id, supporter_id, value)| supporter_performance::ActiveModel {
                    pitch_id: Set(pitch_id.clone()),
                    supporter_id: Set(supporter_id.clone()),
                    referrals_created: Set(0),
                    chain_reach: Set(0),
                    views: Set(value.own.views),
                    calls: Set(value.own.calls),
                    emails: Set(value.own.emails),
                    shares: Set(value.own.shares),
                    conversions: Set(value.own.conversions),
                    last_activity_at: Set(value.last_activity_at.unwrap_or_else(Utc::now)),
                    ..Default::default()
                },
            )
            .collect();

        let on_conflict = supporter_conflict(backend)
            .value(
                supporter_performance::Column::Views,
                additive_expr(backend, "views"),
            )
            .value(
                supporter_performance::Column::Calls,
                additive_expr(backend, "calls"),
            )
            .value(
                supporter_performance::Column::Emails,
                additive_expr(backend, "emails"),
            )
            .value(
                supporter_performance::Column::Shares,
                additive_expr(backend, "shares"),
            )
            .value(
                supporter_performance::Column::Conversions,
                additive_expr(backend, "conversions"),
            )
            .value(
                supporter_performance::Column::LastActivityAt,
                replace_expr(backend, "last_activity_at"),
            )
            .to_owned();

        let db = &self.db;
        retry::with_retry(
            "flush_supporter_performance",
            self.retry_config,
            || async {
                supporter_performance::Entity::insert_many(models.clone())
                    .on_conflict(on_conflict.clone())
                    .exec(db)
                    .await
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to upsert supporter_performance: {}", e))?;

        Ok(())
    }

    /// referral 创建成功后登记：supporter 的 referrals_created += 1
    pub async fn record_referral_created(
        &self,
        pitch_id: &str,
        supporter_id: &str,
        created_at: chrono::DateTime<Utc>,
    ) -> crate::errors::Result<()> {
        let backend = self.db.get_database_backend();

        let model = supporter_performance::ActiveModel {
            pitch_id: Set(pitch_id.to_string()),
            supporter_id: Set(supporter_id.to_string()),
            referrals_created: Set(1),
            chain_reach: Set(0),
            views: Set(0),
            calls: Set(0),
            emails: Set(0),
            shares: Set(0),
            conversions: Set(0),
            last_activity_at: Set(created_at),
            ..Default::default()
        };

        let on_conflict = supporter_conflict(backend)
            .value(
                supporter_performance::Column::ReferralsCreated,
                additive_expr(backend, "referrals_created"),
            )
            .to_owned();

        let db = &self.db;
        retry::with_retry("record_referral_created", self.retry_config, || async {
            supporter_performance::Entity::insert(model.clone())
                .on_conflict(on_conflict.clone())
                .exec(db)
                .await
        })
        .await?;

        Ok(())
    }

    /// 新 referral 挂到链上时，给每个祖先 supporter 的 chain_reach += 1
    pub async fn bump_chain_reach(
        &self,
        pitch_id: &str,
        ancestor_supporters: &[String],
    ) -> crate::errors::Result<()> {
        if ancestor_supporters.is_empty() {
            return Ok(());
        }

        let backend = self.db.get_database_backend();
        let now = Utc::now();

        let models: Vec<supporter_performance::ActiveModel> = ancestor_supporters
            .iter()
            .map(|supporter_id| supporter_performance::ActiveModel {
                pitch_id: Set(pitch_id.to_string()),
                supporter_id: Set(supporter_id.clone()),
                referrals_created: Set(0),
                chain_reach: Set(1),
                views: Set(0),
                calls: Set(0),
                emails: Set(0),
                shares: Set(0),
                conversions: Set(0),
                last_activity_at: Set(now),
                ..Default::default()
            })
            .collect();

        let on_conflict = supporter_conflict(backend)
            .value(
                supporter_performance::Column::ChainReach,
                additive_expr(backend, "chain_reach"),
            )
            .to_owned();

        let db = &self.db;
        retry::with_retry("bump_chain_reach", self.retry_config, || async {
            supporter_performance::Entity::insert_many(models.clone())
                .on_conflict(on_conflict.clone())
                .exec(db)
                .await
        })
        .await?;

        Ok(())
    }

    /// 为新 referral 预建零值 chain_stats 行（无活动的 referral 也能出现在榜单里）
    pub async fn ensure_chain_stat_row(
        &self,
        referral_id: i64,
        pitch_id: &str,
        supporter_id: &str,
        depth: i32,
        created_at: chrono::DateTime<Utc>,
    ) -> crate::errors::Result<()> {
        let model = chain_stat::ActiveModel {
            referral_id: Set(referral_id),
            pitch_id: Set(pitch_id.to_string()),
            supporter_id: Set(supporter_id.to_string()),
            depth: Set(depth),
            own_views: Set(0),
            own_calls: Set(0),
            own_emails: Set(0),
            own_shares: Set(0),
            own_conversions: Set(0),
            chain_views: Set(0),
            chain_calls: Set(0),
            chain_emails: Set(0),
            chain_shares: Set(0),
            chain_conversions: Set(0),
            last_activity_at: Set(created_at),
            ..Default::default()
        };

        let on_conflict = OnConflict::column(chain_stat::Column::ReferralId)
            .do_nothing()
            .to_owned();

        let db = &self.db;
        retry::with_retry("ensure_chain_stat_row", self.retry_config, || async {
            chain_stat::Entity::insert(model.clone())
                .on_conflict(on_conflict.clone())
                .exec_without_returning(db)
                .await
        })
        .await?;

        Ok(())
    }

    /// 删除某个 pitch 的全部派生聚合行（rebuild 的第一步）
    pub async fn reset_pitch_aggregates(&self, pitch_id: &str) -> crate::errors::Result<()> {
        let db = &self.db;

        retry::with_retry("reset_chain_stats", self.retry_config, || async {
            chain_stat::Entity::delete_many()
                .filter(chain_stat::Column::PitchId.eq(pitch_id))
                .exec(db)
                .await
        })
        .await?;

        retry::with_retry("reset_daily_metrics", self.retry_config, || async {
            daily_metric::Entity::delete_many()
                .filter(daily_metric::Column::PitchId.eq(pitch_id))
                .exec(db)
                .await
        })
        .await?;

        retry::with_retry("reset_supporter_performance", self.retry_config, || async {
            supporter_performance::Entity::delete_many()
                .filter(supporter_performance::Column::PitchId.eq(pitch_id))
                .exec(db)
                .await
        })
        .await?;

        debug!("Derived aggregates reset for pitch {}", pitch_id);
        Ok(())
    }
}

fn supporter_conflict(_backend: DatabaseBackend) -> OnConflict {
    OnConflict::columns([
        supporter_performance::Column::PitchId,
        supporter_performance::Column::SupporterId,
    ])
}
