//! 归因链走查
//!
//! 从叶子 referral 沿 parent_referral_id 向上走到根，
//! 输出 root-first 的节点序列（depth = 距根跳数）。
//!
//! 链结构在创建时保证无环，这里的环检测只是数据损坏兜底。
//! 读路径带 Moka 缓存；deactivate 时按 referral id 失效。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::{trace, warn};

use crate::config::get_config;
use crate::errors::{PitchlinkError, Result};
use crate::storage::SeaOrmStorage;
use crate::tracking::ChainNode;

pub struct ChainWalker {
    storage: Arc<SeaOrmStorage>,
    /// 叶子 referral id → 解析好的链（root-first）
    cache: Cache<i64, Arc<Vec<ChainNode>>>,
    max_hops: usize,
}

impl ChainWalker {
    pub fn new(storage: Arc<SeaOrmStorage>) -> Self {
        let config = get_config();
        let cache = Cache::builder()
            .max_capacity(config.tracking.chain_cache_capacity)
            .time_to_live(Duration::from_secs(config.tracking.chain_cache_ttl_secs))
            .build();

        Self {
            storage,
            cache,
            max_hops: config.tracking.max_chain_hops,
        }
    }

    /// 解析叶子 referral 的完整归因链（含缓存）
    ///
    /// 超出跳数上限时截断：最近的 `max_hops + 1` 个节点保留，
    /// 更远的祖先不再参与归因（事件照常计数）。
    pub async fn walk(&self, leaf_referral_id: i64) -> Result<Arc<Vec<ChainNode>>> {
        if let Some(chain) = self.cache.get(&leaf_referral_id) {
            trace!("Chain cache hit for referral {}", leaf_referral_id);
            return Ok(chain);
        }

        let chain = Arc::new(self.resolve(leaf_referral_id).await?);
        self.cache.insert(leaf_referral_id, Arc::clone(&chain));
        Ok(chain)
    }

    /// 同 [`walk`]，但超出跳数上限时报错而不是截断（创建路径用）
    pub async fn walk_strict(&self, leaf_referral_id: i64) -> Result<Vec<ChainNode>> {
        let chain = self.resolve(leaf_referral_id).await?;
        if chain.len() > self.max_hops {
            return Err(PitchlinkError::chain_too_deep(format!(
                "referral {} chain exceeds {} hops",
                leaf_referral_id, self.max_hops
            )));
        }
        Ok(chain)
    }

    async fn resolve(&self, leaf_referral_id: i64) -> Result<Vec<ChainNode>> {
        // leaf-to-root 收集，之后反转并赋 depth
        let mut upward: Vec<(i64, String, String)> = Vec::new();
        let mut visited: HashSet<i64> = HashSet::new();
        let mut cursor = Some(leaf_referral_id);

        while let Some(id) = cursor {
            if !visited.insert(id) {
                // 创建路径保证无环，走到这里说明数据被绕过写坏了
                warn!(
                    "Cycle detected while walking chain from referral {} (at {}), truncating",
                    leaf_referral_id, id
                );
                break;
            }
            if upward.len() > self.max_hops {
                warn!(
                    "Chain from referral {} exceeds {} hops, truncating attribution",
                    leaf_referral_id, self.max_hops
                );
                break;
            }

            let Some(referral) = self.storage.find_referral_by_id(id).await? else {
                if id == leaf_referral_id {
                    return Err(PitchlinkError::not_found(format!(
                        "referral {} not found",
                        id
                    )));
                }
                // 悬空 parent 指针：当作根处理
                warn!(
                    "Referral {} references missing parent {}, treating as chain root",
                    upward.last().map(|(i, _, _)| *i).unwrap_or(leaf_referral_id),
                    id
                );
                break;
            };

            upward.push((referral.id, referral.pitch_id, referral.supporter_id));
            cursor = referral.parent_referral_id;
        }

        let mut chain: Vec<ChainNode> = upward
            .into_iter()
            .rev()
            .map(|(referral_id, pitch_id, supporter_id)| ChainNode {
                referral_id,
                pitch_id,
                supporter_id,
                depth: 0,
            })
            .collect();
        for (i, node) in chain.iter_mut().enumerate() {
            node.depth = i as i32;
        }

        Ok(chain)
    }

    pub fn invalidate(&self, referral_id: i64) {
        self.cache.invalidate(&referral_id);
    }

    pub fn max_hops(&self) -> usize {
        self.max_hops
    }
}
