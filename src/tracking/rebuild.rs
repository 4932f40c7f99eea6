//! 从事件日志重建派生聚合
//!
//! tracking_events 是事实来源：清掉一个 pitch 的三张派生表，
//! 重放全部事件重新算一遍。归因森林在内存里解析（不走缓存），
//! 全部增量合并完成后一次性刷盘。

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::get_config;
use crate::errors::Result;
use crate::storage::SeaOrmStorage;
use crate::tracking::{AggregateSink, ChainNode, DeltaKey, DeltaValue, EventKind, compute_deltas};

use migration::entities::referral;

const SCAN_PAGE_SIZE: u64 = 500;

/// 重建结果摘要
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub pitch_id: String,
    pub referrals: usize,
    pub events_replayed: usize,
    pub events_skipped: usize,
    pub rows_written: usize,
}

/// 在内存里解析归因森林：referral id → root-first 链
fn resolve_forest(referrals: &[referral::Model], max_hops: usize) -> HashMap<i64, Vec<ChainNode>> {
    let by_id: HashMap<i64, &referral::Model> =
        referrals.iter().map(|r| (r.id, r)).collect();

    let mut forest = HashMap::with_capacity(referrals.len());
    for r in referrals {
        let mut upward: Vec<&referral::Model> = Vec::new();
        let mut visited: HashSet<i64> = HashSet::new();
        let mut cursor = Some(r.id);

        while let Some(id) = cursor {
            if !visited.insert(id) {
                warn!("Cycle detected during rebuild at referral {}, truncating", id);
                break;
            }
            if upward.len() > max_hops {
                warn!(
                    "Chain from referral {} exceeds {} hops during rebuild, truncating",
                    r.id, max_hops
                );
                break;
            }
            let Some(model) = by_id.get(&id) else {
                break;
            };
            upward.push(model);
            cursor = model.parent_referral_id;
        }

        let chain: Vec<ChainNode> = upward
            .into_iter()
            .rev()
            .enumerate()
            .map(|(depth, m)| ChainNode {
                referral_id: m.id,
                pitch_id: m.pitch_id.clone(),
                supporter_id: m.supporter_id.clone(),
                depth: depth as i32,
            })
            .collect();
        forest.insert(r.id, chain);
    }
    forest
}

/// 重建单个 pitch 的全部派生聚合
pub async fn rebuild_pitch(storage: &Arc<SeaOrmStorage>, pitch_id: &str) -> Result<RebuildReport> {
    let max_hops = get_config().tracking.max_chain_hops;

    let referrals = storage.referrals_for_pitch(pitch_id).await?;
    let forest = resolve_forest(&referrals, max_hops);

    storage.reset_pitch_aggregates(pitch_id).await?;

    // 注册侧计数先恢复：零值 chain_stats 行 + referrals_created + chain_reach
    for r in &referrals {
        let depth = forest
            .get(&r.id)
            .map(|c| c.len().saturating_sub(1) as i32)
            .unwrap_or(0);
        storage
            .ensure_chain_stat_row(r.id, &r.pitch_id, &r.supporter_id, depth, r.created_at)
            .await?;
        storage
            .record_referral_created(&r.pitch_id, &r.supporter_id, r.created_at)
            .await?;

        if let Some(chain) = forest.get(&r.id) {
            let ancestors: Vec<String> = chain
                .iter()
                .filter(|n| n.referral_id != r.id)
                .map(|n| n.supporter_id.clone())
                .collect();
            if !ancestors.is_empty() {
                storage.bump_chain_reach(&r.pitch_id, &ancestors).await?;
            }
        }
    }

    // 事件重放：全部增量在内存合并，最后一次性刷盘。
    // 已停用 referral 的事件在摄入时就以 referral_id=None 落日志，
    // 这里无需再看 active 标志，重放天然与在线聚合一致
    let mut merged: HashMap<DeltaKey, DeltaValue> = HashMap::new();
    let mut milestone_seen: HashSet<String> = HashSet::new();
    let mut visitors_seen: HashSet<String> = HashSet::new();
    let mut replayed = 0usize;
    let mut skipped = 0usize;
    let mut after_id = 0i64;
    let empty_chain: Vec<ChainNode> = Vec::new();

    loop {
        let page = storage
            .events_for_pitch_page(pitch_id, after_id, SCAN_PAGE_SIZE)
            .await?;
        if page.is_empty() {
            break;
        }
        after_id = page.last().map(|e| e.id).unwrap_or(after_id);

        for event in page {
            let Ok(kind) = EventKind::from_str(&event.event_type) else {
                warn!(
                    "Unknown event type \"{}\" in log (event {}), skipping",
                    event.event_type, event.id
                );
                skipped += 1;
                continue;
            };

            // milestone 去重：重建时窗口退化为「每 session 一次」
            if kind.is_milestone() {
                if let Some(session) = event.session_id.as_deref() {
                    let key = format!(
                        "{}:{}:{}",
                        session,
                        kind.as_ref(),
                        event.referral_id.unwrap_or_default()
                    );
                    if !milestone_seen.insert(key) {
                        skipped += 1;
                        continue;
                    }
                }
            }

            // 独立访客：重建时按 (session, day) 判定
            let is_new_visitor = match event.session_id.as_deref() {
                Some(session) => visitors_seen
                    .insert(format!("{}:{}", session, event.occurred_at.date_naive())),
                None => false,
            };

            let chain = event
                .referral_id
                .and_then(|id| forest.get(&id))
                .unwrap_or(&empty_chain);

            for (key, value) in
                compute_deltas(kind, &event.pitch_id, event.occurred_at, chain, is_new_visitor)
            {
                merged
                    .entry(key)
                    .and_modify(|existing| existing.merge(&value))
                    .or_insert(value);
            }
            replayed += 1;
        }
    }

    let rows_written = merged.len();
    let updates: Vec<(DeltaKey, DeltaValue)> = merged.into_iter().collect();
    storage
        .flush_deltas(updates)
        .await
        .map_err(|e| crate::errors::PitchlinkError::database_operation(e.to_string()))?;

    info!(
        "Rebuild for pitch {} complete: {} referrals, {} events replayed, {} skipped, {} rows",
        pitch_id,
        referrals.len(),
        replayed,
        skipped,
        rows_written
    );

    Ok(RebuildReport {
        pitch_id: pitch_id.to_string(),
        referrals: referrals.len(),
        events_replayed: replayed,
        events_skipped: skipped,
        rows_written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn referral(id: i64, parent: Option<i64>, supporter: &str) -> referral::Model {
        referral::Model {
            id,
            pitch_id: "p1".to_string(),
            supporter_id: supporter.to_string(),
            parent_referral_id: parent,
            platform: "direct".to_string(),
            source_type: "supporter".to_string(),
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_resolve_forest_depths() {
        let rows = vec![
            referral(1, None, "a"),
            referral(2, Some(1), "b"),
            referral(3, Some(2), "c"),
        ];
        let forest = resolve_forest(&rows, 50);

        let chain = &forest[&3];
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].referral_id, 1);
        assert_eq!(chain[0].depth, 0);
        assert_eq!(chain[2].referral_id, 3);
        assert_eq!(chain[2].depth, 2);

        assert_eq!(forest[&1].len(), 1);
    }

    #[test]
    fn test_resolve_forest_survives_cycle() {
        // 人为构造坏数据：1 → 2 → 1
        let rows = vec![referral(1, Some(2), "a"), referral(2, Some(1), "b")];
        let forest = resolve_forest(&rows, 50);

        // 环被截断，两条链都有限长
        assert!(forest[&1].len() <= 2);
        assert!(forest[&2].len() <= 2);
    }
}
