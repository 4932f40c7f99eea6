//! 归因事件与增量模型
//!
//! 事件类型分两类：
//! - action（view / call / email / share / signup 等）：每次都计数
//! - milestone（scroll / time / link_opened）：每个 session 只计一次，
//!   重复上报被聚合器视为 no-op（客户端 beacon 可能重复触发）
//!
//! [`compute_deltas`] 是聚合的纯函数核心：给定事件和已解析的归因链，
//! 产出对 chain_stats / daily_metrics / supporter_performance 的增量集合。

pub mod global;
pub mod manager;
pub mod rebuild;
pub mod sink;

pub use manager::AggregateManager;
pub use sink::AggregateSink;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// 交互事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
pub enum EventKind {
    #[strum(serialize = "PITCH_VIEWED")]
    PitchViewed,
    #[strum(to_string = "CALL_CLICKED", serialize = "PHONE_CLICKED")]
    CallClicked,
    #[strum(serialize = "EMAIL_CLICKED")]
    EmailClicked,
    #[strum(serialize = "LINKEDIN_CLICKED")]
    LinkedinClicked,
    #[strum(serialize = "SHARE_RESHARED")]
    ShareReshared,
    #[strum(serialize = "RESUME_REQUEST_CLICKED")]
    ResumeRequestClicked,
    #[strum(serialize = "SIGNUP_FROM_REFERRAL")]
    SignupFromReferral,
    #[strum(serialize = "SCROLL_25_PERCENT")]
    Scroll25Percent,
    #[strum(serialize = "SCROLL_50_PERCENT")]
    Scroll50Percent,
    #[strum(serialize = "SCROLL_75_PERCENT")]
    Scroll75Percent,
    #[strum(serialize = "TIME_30_SECONDS")]
    Time30Seconds,
    #[strum(serialize = "TIME_60_SECONDS")]
    Time60Seconds,
    #[strum(serialize = "TIME_120_SECONDS")]
    Time120Seconds,
    #[strum(serialize = "LINK_OPENED")]
    LinkOpened,
}

impl EventKind {
    /// milestone 事件：每个 (session, event, referral) 窗口内只计一次
    pub fn is_milestone(&self) -> bool {
        matches!(
            self,
            EventKind::Scroll25Percent
                | EventKind::Scroll50Percent
                | EventKind::Scroll75Percent
                | EventKind::Time30Seconds
                | EventKind::Time60Seconds
                | EventKind::Time120Seconds
                | EventKind::LinkOpened
        )
    }

    /// 该事件对五个核心计数器的贡献
    pub fn counts(&self) -> Counts {
        match self {
            EventKind::PitchViewed => Counts {
                views: 1,
                ..Counts::default()
            },
            EventKind::CallClicked => Counts {
                calls: 1,
                conversions: 1,
                ..Counts::default()
            },
            EventKind::EmailClicked => Counts {
                emails: 1,
                conversions: 1,
                ..Counts::default()
            },
            // 联系类点击没有专属计数器，只进 conversions
            EventKind::LinkedinClicked | EventKind::ResumeRequestClicked => Counts {
                conversions: 1,
                ..Counts::default()
            },
            EventKind::ShareReshared => Counts {
                shares: 1,
                ..Counts::default()
            },
            EventKind::SignupFromReferral => Counts {
                conversions: 1,
                ..Counts::default()
            },
            _ => Counts::default(),
        }
    }
}

/// 分享平台
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, Display, AsRefStr, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Whatsapp,
    Linkedin,
    Email,
    Twitter,
    Direct,
    #[default]
    Unknown,
}

/// 五个核心计数器的一组增量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub views: i64,
    pub calls: i64,
    pub emails: i64,
    pub shares: i64,
    pub conversions: i64,
}

impl Counts {
    pub fn is_zero(&self) -> bool {
        *self == Counts::default()
    }

    pub fn add(&mut self, other: &Counts) {
        self.views += other.views;
        self.calls += other.calls;
        self.emails += other.emails;
        self.shares += other.shares;
        self.conversions += other.conversions;
    }
}

/// 归因链上的一个节点（链走查的输出，root 在前）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNode {
    pub referral_id: i64,
    pub pitch_id: String,
    pub supporter_id: String,
    /// 距链根的跳数（根 = 0）
    pub depth: i32,
}

/// 增量的目标行
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeltaKey {
    ChainNode { referral_id: i64 },
    Daily { pitch_id: String, day: NaiveDate },
    Supporter {
        pitch_id: String,
        supporter_id: String,
    },
}

/// chain_stats 行的身份信息，首次 upsert 时需要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMeta {
    pub pitch_id: String,
    pub supporter_id: String,
    pub depth: i32,
}

/// 对单个目标行的累计增量
#[derive(Debug, Clone)]
pub struct DeltaValue {
    /// 本节点直接产生的计数（daily / supporter 行也复用该组）
    pub own: Counts,
    /// 链传播计数（仅 ChainNode 使用）
    pub chain: Counts,
    pub unique_visitors: i64,
    pub meta: Option<NodeMeta>,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// 该值累计合并进来的增量条数；
    /// merge 时累加，drain/restore 按它对账阈值计数器
    pub records: usize,
}

impl Default for DeltaValue {
    fn default() -> Self {
        Self {
            own: Counts::default(),
            chain: Counts::default(),
            unique_visitors: 0,
            meta: None,
            last_activity_at: None,
            records: 1,
        }
    }
}

impl DeltaValue {
    pub fn merge(&mut self, other: &DeltaValue) {
        self.own.add(&other.own);
        self.chain.add(&other.chain);
        self.unique_visitors += other.unique_visitors;
        self.records += other.records;
        if self.meta.is_none() {
            self.meta = other.meta.clone();
        }
        match (self.last_activity_at, other.last_activity_at) {
            (Some(a), Some(b)) if b > a => self.last_activity_at = Some(b),
            (None, Some(b)) => self.last_activity_at = Some(b),
            _ => {}
        }
    }

    /// 增量合并次数的权重（用于刷盘阈值判断）
    pub fn weight(&self) -> usize {
        self.records
    }
}

/// 计算一个事件产生的全部增量
///
/// - own 计数只落在链叶子（事件自己的 referral）
/// - chain 计数落在链上每个节点（含叶子）
/// - daily 桶始终更新（无归因的自然流量也计入）
/// - supporter 行按叶子的 supporter 更新
///
/// `chain` 为空表示 organic 事件，只更新 daily 桶。
pub fn compute_deltas(
    kind: EventKind,
    pitch_id: &str,
    occurred_at: DateTime<Utc>,
    chain: &[ChainNode],
    is_new_visitor: bool,
) -> Vec<(DeltaKey, DeltaValue)> {
    let counts = kind.counts();
    if counts.is_zero() && !is_new_visitor {
        return Vec::new();
    }

    let mut deltas = Vec::with_capacity(chain.len() + 2);

    if !counts.is_zero() {
        if let Some(leaf) = chain.last() {
            for node in chain {
                let is_leaf = node.referral_id == leaf.referral_id;
                deltas.push((
                    DeltaKey::ChainNode {
                        referral_id: node.referral_id,
                    },
                    DeltaValue {
                        own: if is_leaf { counts } else { Counts::default() },
                        chain: counts,
                        meta: Some(NodeMeta {
                            pitch_id: node.pitch_id.clone(),
                            supporter_id: node.supporter_id.clone(),
                            depth: node.depth,
                        }),
                        last_activity_at: Some(occurred_at),
                        ..DeltaValue::default()
                    },
                ));
            }

            deltas.push((
                DeltaKey::Supporter {
                    pitch_id: pitch_id.to_string(),
                    supporter_id: leaf.supporter_id.clone(),
                },
                DeltaValue {
                    own: counts,
                    last_activity_at: Some(occurred_at),
                    ..DeltaValue::default()
                },
            ));
        }
    }

    deltas.push((
        DeltaKey::Daily {
            pitch_id: pitch_id.to_string(),
            day: occurred_at.date_naive(),
        },
        DeltaValue {
            own: counts,
            unique_visitors: if is_new_visitor { 1 } else { 0 },
            ..DeltaValue::default()
        },
    ));

    deltas
}
