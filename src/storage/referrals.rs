//! Referral registry 的存储操作
//!
//! 幂等性的底座是 (pitch_id, supporter_id) 唯一索引：
//! 并发创建时先查后插，插入撞唯一约束则回读已有行。

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use tracing::debug;

use super::SeaOrmStorage;
use super::retry;
use crate::errors::{PitchlinkError, Result};

use migration::entities::referral;

/// 一条待创建的 referral
#[derive(Debug, Clone)]
pub struct NewReferral {
    pub pitch_id: String,
    pub supporter_id: String,
    pub parent_referral_id: Option<i64>,
    pub platform: String,
    pub source_type: String,
}

impl SeaOrmStorage {
    pub async fn find_referral_by_id(&self, id: i64) -> Result<Option<referral::Model>> {
        let db = &self.db;
        let found = retry::with_retry("find_referral_by_id", self.retry_config, || async {
            referral::Entity::find_by_id(id).one(db).await
        })
        .await?;
        Ok(found)
    }

    pub async fn find_referral_by_pair(
        &self,
        pitch_id: &str,
        supporter_id: &str,
    ) -> Result<Option<referral::Model>> {
        let db = &self.db;
        let found = retry::with_retry("find_referral_by_pair", self.retry_config, || async {
            referral::Entity::find()
                .filter(referral::Column::PitchId.eq(pitch_id))
                .filter(referral::Column::SupporterId.eq(supporter_id))
                .one(db)
                .await
        })
        .await?;
        Ok(found)
    }

    /// 插入新 referral；撞 (pitch, supporter) 唯一约束时回读已有行
    ///
    /// 返回 (model, created)，created=false 表示命中已有行。
    pub async fn insert_referral(&self, new: NewReferral) -> Result<(referral::Model, bool)> {
        let model = referral::ActiveModel {
            pitch_id: Set(new.pitch_id.clone()),
            supporter_id: Set(new.supporter_id.clone()),
            parent_referral_id: Set(new.parent_referral_id),
            platform: Set(new.platform),
            source_type: Set(new.source_type),
            active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        let db = &self.db;
        let insert_result = retry::with_retry("insert_referral", self.retry_config, || async {
            referral::Entity::insert(model.clone()).exec(db).await
        })
        .await;

        match insert_result {
            Ok(res) => {
                let inserted = self
                    .find_referral_by_id(res.last_insert_id)
                    .await?
                    .ok_or_else(|| {
                        PitchlinkError::database_operation(format!(
                            "referral {} vanished after insert",
                            res.last_insert_id
                        ))
                    })?;
                debug!(
                    "Referral {} created (pitch={}, supporter={})",
                    inserted.id, inserted.pitch_id, inserted.supporter_id
                );
                Ok((inserted, true))
            }
            Err(e) if is_unique_violation(&e) => {
                // 并发创建输掉了竞争，回读赢家的行
                let existing = self
                    .find_referral_by_pair(&new.pitch_id, &new.supporter_id)
                    .await?
                    .ok_or_else(|| {
                        PitchlinkError::database_operation(
                            "unique violation on referral insert but no existing row found"
                                .to_string(),
                        )
                    })?;
                Ok((existing, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn deactivate_referral(&self, id: i64) -> Result<bool> {
        use sea_orm::ActiveModelTrait;

        let Some(existing) = self.find_referral_by_id(id).await? else {
            return Ok(false);
        };
        if !existing.active {
            return Ok(true);
        }

        let mut active_model: referral::ActiveModel = existing.into();
        active_model.active = Set(false);

        let db = &self.db;
        retry::with_retry("deactivate_referral", self.retry_config, || async {
            active_model.clone().update(db).await
        })
        .await?;

        Ok(true)
    }

    /// 某个 pitch 的全部 referral（rebuild 时在内存里重建归因森林）
    pub async fn referrals_for_pitch(&self, pitch_id: &str) -> Result<Vec<referral::Model>> {
        let db = &self.db;
        let rows = retry::with_retry("referrals_for_pitch", self.retry_config, || async {
            referral::Entity::find()
                .filter(referral::Column::PitchId.eq(pitch_id))
                .all(db)
                .await
        })
        .await?;
        Ok(rows)
    }
}

/// 唯一约束冲突判定（跨后端，按错误消息匹配）
fn is_unique_violation(err: &sea_orm::DbErr) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("unique constraint")
        || msg.contains("duplicate key")
        || msg.contains("duplicate entry")
        || msg.contains("unique violation")
}
