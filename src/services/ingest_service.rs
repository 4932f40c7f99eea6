//! 事件摄入服务
//!
//! 一条事件的生命周期：
//! 1. 事件类型与 pitch 校验（owner 解析失败即丢弃，fail closed）
//! 2. milestone 去重（同一 session 窗口内重复上报直接吞掉）
//! 3. 同步追加到 tracking_events（事实来源）
//! 4. 归因链走查 + 增量计算，交给聚合缓冲异步刷盘
//!
//! POST /events 和 GET beacon 最终都走 [`IngestService::ingest`]，
//! 两个入口只有参数提取方式不同。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::sync::Cache;
use tracing::{debug, warn};

use crate::config::get_config;
use crate::errors::{PitchlinkError, Result};
use crate::services::{ChainWalker, OwnerLookup};
use crate::storage::{NewTrackingEvent, SeaOrmStorage};
use crate::tracking::{AggregateManager, ChainNode, EventKind, Platform, compute_deltas};

/// 一条待摄入的事件（两个 HTTP 入口的公共形状）
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub pitch_id: String,
    pub event_type: String,
    pub referral_id: Option<i64>,
    pub platform: Option<String>,
    pub session_id: Option<String>,
    pub visitor_id: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// 摄入结果
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// 事件是否进入了日志（去重吞掉时为 false）
    pub tracked: bool,
    pub event_id: Option<i64>,
    pub deduplicated: bool,
}

pub struct IngestService {
    storage: Arc<SeaOrmStorage>,
    walker: Arc<ChainWalker>,
    owner_lookup: Arc<dyn OwnerLookup>,
    manager: AggregateManager,
    /// milestone 去重：`(session, event, referral)` → ()
    dedup: Cache<String, ()>,
    /// 独立访客窗口：`(pitch, visitor)` → ()
    visitors: Cache<String, ()>,
}

impl IngestService {
    pub fn new(
        storage: Arc<SeaOrmStorage>,
        walker: Arc<ChainWalker>,
        owner_lookup: Arc<dyn OwnerLookup>,
        manager: AggregateManager,
    ) -> Self {
        let config = get_config();
        let dedup = Cache::builder()
            .max_capacity(100_000)
            .time_to_live(Duration::from_secs(config.tracking.dedup_window_secs))
            .build();
        let visitors = Cache::builder()
            .max_capacity(500_000)
            .time_to_live(Duration::from_secs(config.tracking.visitor_window_secs))
            .build();

        Self {
            storage,
            walker,
            owner_lookup,
            manager,
            dedup,
            visitors,
        }
    }

    /// 摄入一条事件
    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome> {
        if req.pitch_id.trim().is_empty() {
            return Err(PitchlinkError::validation("pitch_id must not be empty"));
        }

        let kind = EventKind::from_str(&req.event_type).map_err(|_| {
            PitchlinkError::validation(format!("unknown event type: {}", req.event_type))
        })?;

        // owner 解析失败（404 或协作方不可用）时事件被丢弃，
        // 丢弃是终态：派生表不能出现无主事件
        let user_id = match self.owner_lookup.owner_of(&req.pitch_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                return Err(PitchlinkError::unknown_pitch(format!(
                    "pitch {} does not exist, event dropped",
                    req.pitch_id
                )));
            }
            Err(e) => {
                warn!(
                    "Owner lookup for pitch {} failed ({}), dropping event",
                    req.pitch_id, e
                );
                return Err(PitchlinkError::unknown_pitch(format!(
                    "owner of pitch {} could not be resolved, event dropped",
                    req.pitch_id
                )));
            }
        };

        let occurred_at = req.occurred_at.unwrap_or_else(Utc::now);
        let platform = req
            .platform
            .as_deref()
            .and_then(|p| Platform::from_str(p).ok())
            .unwrap_or_default();

        // 归因链解析：referral 无效时降级为 organic，事件本身照常记录
        let (referral_id, chain) = self.resolve_chain(&req).await?;

        // milestone 去重（action 事件永远计数）。
        // 去重窗口在日志写入成功后才登记：写入失败的话，
        // 客户端重试不能撞上预热的窗口被当成重复吞掉
        let mut dedup_key = None;
        if kind.is_milestone() {
            if let Some(session) = req.session_id.as_deref() {
                let key = format!(
                    "{}:{}:{}",
                    session,
                    kind.as_ref(),
                    referral_id.unwrap_or_default()
                );
                if self.dedup.contains_key(&key) {
                    debug!(
                        "Duplicate milestone {} for session {} suppressed",
                        kind, session
                    );
                    return Ok(IngestOutcome {
                        tracked: false,
                        event_id: None,
                        deduplicated: true,
                    });
                }
                dedup_key = Some(key);
            }
        }

        let (is_new_visitor, visitor_key) = self.check_new_visitor(&req);

        let metadata = req
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m))
            .transpose()?;

        let event_id = self
            .storage
            .insert_event(NewTrackingEvent {
                pitch_id: req.pitch_id.clone(),
                user_id,
                referral_id,
                event_type: kind.to_string(),
                platform: platform.to_string(),
                session_id: req.session_id.clone(),
                occurred_at,
                metadata,
            })
            .await?;

        // 事件已落日志，现在才烧掉去重 / 访客窗口
        if let Some(key) = dedup_key {
            self.dedup.insert(key, ());
        }
        if let Some(key) = visitor_key {
            self.visitors.insert(key, ());
        }

        let deltas = compute_deltas(kind, &req.pitch_id, occurred_at, &chain, is_new_visitor);
        self.manager.record(deltas);

        Ok(IngestOutcome {
            tracked: true,
            event_id: Some(event_id),
            deduplicated: false,
        })
    }

    /// 解析事件的归因链
    ///
    /// referral 不存在 / 属于别的 pitch / 已停用 → 降级为 organic。
    async fn resolve_chain(&self, req: &IngestRequest) -> Result<(Option<i64>, Vec<ChainNode>)> {
        let Some(referral_id) = req.referral_id else {
            return Ok((None, Vec::new()));
        };

        let Some(referral) = self.storage.find_referral_by_id(referral_id).await? else {
            warn!(
                "Event references missing referral {}, treating as organic",
                referral_id
            );
            return Ok((None, Vec::new()));
        };
        if referral.pitch_id != req.pitch_id {
            warn!(
                "Event for pitch {} references referral {} of pitch {}, treating as organic",
                req.pitch_id, referral_id, referral.pitch_id
            );
            return Ok((None, Vec::new()));
        }
        if !referral.active {
            // referral_id 不落日志：日志里的归因字段必须和实际归因一致，
            // rebuild 重放时才能复现同样的聚合
            debug!(
                "Event references deactivated referral {}, treating as organic",
                referral_id
            );
            return Ok((None, Vec::new()));
        }

        let chain = self.walker.walk(referral_id).await?;
        Ok((Some(referral_id), chain.as_ref().clone()))
    }

    /// 判定是否是窗口内首次出现的访客
    ///
    /// 只做判定不写窗口；新访客返回待登记的 key，由调用方在
    /// 日志写入成功后插入。
    fn check_new_visitor(&self, req: &IngestRequest) -> (bool, Option<String>) {
        let Some(visitor) = req.visitor_id.as_deref().or(req.session_id.as_deref()) else {
            return (false, None);
        };
        let key = format!("{}:{}", req.pitch_id, visitor);
        if self.visitors.contains_key(&key) {
            (false, None)
        } else {
            (true, Some(key))
        }
    }

    /// 手动刷盘（测试和优雅停机用）
    pub async fn flush(&self) {
        self.manager.flush().await;
    }
}
