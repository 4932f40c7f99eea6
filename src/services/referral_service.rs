//! Referral registry service
//!
//! 创建语义：同一 (pitch, supporter) 的重复创建幂等返回已有行。
//! 带 parent 的创建先做链校验（parent 存在、同 pitch、未停用、
//! 无环、不超跳数上限），成功后登记 referrals_created 和祖先的 chain_reach。

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{PitchlinkError, Result};
use crate::services::{ChainWalker, OwnerLookup};
use crate::storage::{NewReferral, SeaOrmStorage};
use crate::tracking::{ChainNode, Platform};

use migration::entities::referral;

/// 创建请求
#[derive(Debug, Clone)]
pub struct CreateReferralRequest {
    pub pitch_id: String,
    pub supporter_id: String,
    pub parent_referral_id: Option<i64>,
    pub platform: Option<String>,
}

/// 创建结果
#[derive(Debug, Clone)]
pub struct ReferralCreateResult {
    pub referral: referral::Model,
    /// false 表示命中已有行（幂等返回）
    pub created: bool,
}

/// referral 的对外表示
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralView {
    pub id: i64,
    pub pitch_id: String,
    pub supporter_id: String,
    pub parent_referral_id: Option<i64>,
    pub platform: String,
    pub source_type: String,
    pub active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<referral::Model> for ReferralView {
    fn from(m: referral::Model) -> Self {
        Self {
            id: m.id,
            pitch_id: m.pitch_id,
            supporter_id: m.supporter_id,
            parent_referral_id: m.parent_referral_id,
            platform: m.platform,
            source_type: m.source_type,
            active: m.active,
            created_at: m.created_at,
        }
    }
}

/// 归因链节点的对外表示（root-first）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainNodeView {
    pub referral_id: i64,
    pub supporter_id: String,
    pub depth: i32,
}

impl From<&ChainNode> for ChainNodeView {
    fn from(n: &ChainNode) -> Self {
        Self {
            referral_id: n.referral_id,
            supporter_id: n.supporter_id.clone(),
            depth: n.depth,
        }
    }
}

pub struct ReferralService {
    storage: Arc<SeaOrmStorage>,
    walker: Arc<ChainWalker>,
    owner_lookup: Arc<dyn OwnerLookup>,
}

impl ReferralService {
    pub fn new(
        storage: Arc<SeaOrmStorage>,
        walker: Arc<ChainWalker>,
        owner_lookup: Arc<dyn OwnerLookup>,
    ) -> Self {
        Self {
            storage,
            walker,
            owner_lookup,
        }
    }

    /// 创建或幂等返回 referral
    pub async fn create_or_get(&self, req: CreateReferralRequest) -> Result<ReferralCreateResult> {
        if req.pitch_id.trim().is_empty() {
            return Err(PitchlinkError::validation("pitch_id must not be empty"));
        }
        if req.supporter_id.trim().is_empty() {
            return Err(PitchlinkError::validation("supporter_id must not be empty"));
        }

        // 先走幂等路径，避免对已有行做一次多余的 owner 查询
        if let Some(existing) = self
            .storage
            .find_referral_by_pair(&req.pitch_id, &req.supporter_id)
            .await?
        {
            return Ok(ReferralCreateResult {
                referral: existing,
                created: false,
            });
        }

        let owner = match self.owner_lookup.owner_of(&req.pitch_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                return Err(PitchlinkError::invalid_pitch(format!(
                    "pitch {} does not exist",
                    req.pitch_id
                )));
            }
            Err(e) => return Err(e),
        };

        let platform = req
            .platform
            .as_deref()
            .map(|p| {
                Platform::from_str(p)
                    .map_err(|_| PitchlinkError::validation(format!("unknown platform: {}", p)))
            })
            .transpose()?
            .unwrap_or_default();

        // parent 链校验
        let parent_chain = match req.parent_referral_id {
            Some(parent_id) => {
                let Some(parent) = self.storage.find_referral_by_id(parent_id).await? else {
                    return Err(PitchlinkError::validation(format!(
                        "parent referral {} does not exist",
                        parent_id
                    )));
                };
                if parent.pitch_id != req.pitch_id {
                    return Err(PitchlinkError::validation(format!(
                        "parent referral {} belongs to a different pitch",
                        parent_id
                    )));
                }
                if !parent.active {
                    return Err(PitchlinkError::validation(format!(
                        "parent referral {} is deactivated",
                        parent_id
                    )));
                }

                let chain = self.walker.walk_strict(parent_id).await?;
                // 新节点的 depth = chain.len()，不允许超过跳数上限
                if chain.len() > self.walker.max_hops() {
                    return Err(PitchlinkError::chain_too_deep(format!(
                        "attaching to referral {} would exceed {} hops",
                        parent_id,
                        self.walker.max_hops()
                    )));
                }
                if chain.iter().any(|n| n.supporter_id == req.supporter_id) {
                    return Err(PitchlinkError::cycle_detected(format!(
                        "supporter {} is already an ancestor in the chain of referral {}",
                        req.supporter_id, parent_id
                    )));
                }
                Some(chain)
            }
            None => None,
        };

        let source_type = match (&parent_chain, req.supporter_id == owner) {
            (Some(_), _) => "chain",
            (None, true) => "self",
            (None, false) => "supporter",
        };

        let (model, created) = self
            .storage
            .insert_referral(NewReferral {
                pitch_id: req.pitch_id.clone(),
                supporter_id: req.supporter_id.clone(),
                parent_referral_id: req.parent_referral_id,
                platform: platform.to_string(),
                source_type: source_type.to_string(),
            })
            .await?;

        if created {
            let depth = parent_chain.as_ref().map(|c| c.len() as i32).unwrap_or(0);
            self.storage
                .ensure_chain_stat_row(
                    model.id,
                    &model.pitch_id,
                    &model.supporter_id,
                    depth,
                    model.created_at,
                )
                .await?;
            self.storage
                .record_referral_created(&model.pitch_id, &model.supporter_id, model.created_at)
                .await?;

            if let Some(chain) = &parent_chain {
                let ancestors: Vec<String> =
                    chain.iter().map(|n| n.supporter_id.clone()).collect();
                self.storage
                    .bump_chain_reach(&model.pitch_id, &ancestors)
                    .await?;
            }

            info!(
                "Referral {} registered (pitch={}, supporter={}, source={}, depth={})",
                model.id,
                model.pitch_id,
                model.supporter_id,
                model.source_type,
                parent_chain.as_ref().map(|c| c.len()).unwrap_or(0)
            );
        }

        Ok(ReferralCreateResult {
            referral: model,
            created,
        })
    }

    pub async fn get(&self, id: i64) -> Result<referral::Model> {
        self.storage
            .find_referral_by_id(id)
            .await?
            .ok_or_else(|| PitchlinkError::not_found(format!("referral {} not found", id)))
    }

    /// referral 的完整归因链，从根到该节点
    pub async fn chain(&self, id: i64) -> Result<Vec<ChainNodeView>> {
        let chain = self.walker.walk(id).await?;
        Ok(chain.iter().map(ChainNodeView::from).collect())
    }

    /// 停用 referral（后续事件不再归因到它，历史计数保留）
    pub async fn deactivate(&self, id: i64) -> Result<()> {
        if !self.storage.deactivate_referral(id).await? {
            return Err(PitchlinkError::not_found(format!(
                "referral {} not found",
                id
            )));
        }
        self.walker.invalidate(id);
        warn!("Referral {} deactivated", id);
        Ok(())
    }

    pub async fn list_for_pitch(&self, pitch_id: &str) -> Result<Vec<ReferralView>> {
        let rows = self.storage.referrals_for_pitch(pitch_id).await?;
        Ok(rows.into_iter().map(ReferralView::from).collect())
    }
}
