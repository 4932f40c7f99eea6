//! Analytics read service
//!
//! 漏斗 / 渠道直接扫事件日志分组计数（事实来源），
//! KPI 对比和 sparkline 走 daily_metrics 预聚合，
//! supporter 榜单走 chain_stats 的加权归因值。
//!
//! 所有比率遵守同一条规则：分母为零时结果为 0，不产生 NaN/Inf。

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::get_config;
use crate::errors::{PitchlinkError, Result};
use crate::storage::SeaOrmStorage;
use crate::tracking::{Counts, EventKind};

/// 查询时间窗
#[derive(Debug, Clone)]
pub struct RangeWindow {
    pub label: String,
    pub days: i64,
    /// 事件扫描用的半开区间 [from, to)
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// daily_metrics 用的闭区间日边界
    pub from_day: NaiveDate,
    pub to_day: NaiveDate,
}

/// 解析范围参数：`7d` / `30d` 一类的预设，
/// 或 `2026-01-01..2026-01-31` 的显式起止日期（缺省 30d）
pub fn parse_range(range: Option<&str>) -> Result<RangeWindow> {
    let label = range.unwrap_or("30d").trim().to_lowercase();

    if let Some((start, end)) = label.split_once("..") {
        return explicit_window(start, end);
    }

    let days: i64 = label
        .strip_suffix('d')
        .and_then(|n| n.parse().ok())
        .filter(|d| (1..=365).contains(d))
        .ok_or_else(|| {
            PitchlinkError::date_parse(format!(
                "invalid range: {} (expected e.g. 7d, 30d, or start..end dates)",
                label
            ))
        })?;

    let to = Utc::now();
    let to_day = to.date_naive();
    Ok(RangeWindow {
        label,
        days,
        from: to - Duration::days(days),
        to,
        from_day: to_day - Duration::days(days - 1),
        to_day,
    })
}

fn explicit_window(start: &str, end: &str) -> Result<RangeWindow> {
    let day = |s: &str| {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            PitchlinkError::date_parse(format!("invalid date: {} (expected YYYY-MM-DD)", s))
        })
    };
    let from_day = day(start)?;
    let to_day = day(end)?;
    if from_day > to_day {
        return Err(PitchlinkError::date_parse(format!(
            "range start {} is after end {}",
            from_day, to_day
        )));
    }

    Ok(RangeWindow {
        label: format!("{}..{}", from_day, to_day),
        days: (to_day - from_day).num_days() + 1,
        from: from_day.and_time(NaiveTime::MIN).and_utc(),
        to: (to_day + Duration::days(1)).and_time(NaiveTime::MIN).and_utc(),
        from_day,
        to_day,
    })
}

// ============ Response DTOs ============

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneBreakdown {
    pub scroll_25: i64,
    pub scroll_50: i64,
    pub scroll_75: i64,
    pub time_30s: i64,
    pub time_60s: i64,
    pub time_120s: i64,
    pub link_opened: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelResponse {
    pub pitch_id: String,
    pub range: String,
    pub views: i64,
    pub unique_visitors: i64,
    pub calls: i64,
    pub emails: i64,
    pub shares: i64,
    pub conversions: i64,
    pub milestones: MilestoneBreakdown,
    /// conversions / views × 100
    pub conversion_rate: f64,
    /// shares / views × 100
    pub share_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViralResponse {
    pub pitch_id: String,
    pub range: String,
    pub views: i64,
    pub shares: i64,
    /// shares / views × 100
    pub coefficient: f64,
    pub viral: bool,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupporterEntry {
    pub supporter_id: String,
    pub referral_id: i64,
    pub depth: i32,
    pub attribution_value: i64,
    pub own_views: i64,
    pub own_calls: i64,
    pub own_emails: i64,
    pub own_shares: i64,
    pub own_conversions: i64,
    pub chain_views: i64,
    pub chain_conversions: i64,
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopSupportersResponse {
    pub pitch_id: String,
    pub supporters: Vec<SupporterEntry>,
}

/// 一张 KPI 卡片：当前窗口总量、对上一等长窗口的变化率、逐日序列
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiCard {
    pub value: i64,
    /// 上一窗口为 0 时定义为 0，不报 ±Inf
    pub delta_pct: f64,
    pub spark: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpisResponse {
    pub pitch_id: String,
    pub range: String,
    pub views: KpiCard,
    pub shares: KpiCard,
    /// calls + emails 合并的「联系」指标
    pub contacts: KpiCard,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    pub platform: String,
    pub views: i64,
    pub shares: i64,
    pub conversions: i64,
    /// views / shares（每次分享带来的浏览数）
    pub efficiency: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsResponse {
    pub pitch_id: String,
    pub range: String,
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummaryResponse {
    pub user_id: String,
    pub range: String,
    pub pitch_count: usize,
    pub views: i64,
    pub calls: i64,
    pub emails: i64,
    pub shares: i64,
    pub conversions: i64,
    /// 用汇总后的 views/shares 计算，不做逐 pitch 平均
    /// （小样本 pitch 会扭曲平均值）
    pub viral_coefficient: f64,
    pub viral: bool,
}

// ============ Service ============

pub struct AnalyticsService {
    storage: Arc<SeaOrmStorage>,
}

/// 百分比变化，prior 为 0 时定义为 0（避免 Inf 污染前端）
fn delta_pct(current: i64, previous: i64) -> f64 {
    if previous == 0 {
        0.0
    } else {
        (current - previous) as f64 / previous as f64 * 100.0
    }
}

fn ratio_per_hundred(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}

/// 事件类型计数表 → 五个核心计数
fn sum_counts(by_type: &HashMap<String, i64>) -> Counts {
    let mut total = Counts::default();
    for (event_type, count) in by_type {
        if let Ok(kind) = EventKind::from_str(event_type) {
            let unit = kind.counts();
            total.views += unit.views * count;
            total.calls += unit.calls * count;
            total.emails += unit.emails * count;
            total.shares += unit.shares * count;
            total.conversions += unit.conversions * count;
        }
    }
    total
}

impl AnalyticsService {
    pub fn new(storage: Arc<SeaOrmStorage>) -> Self {
        Self { storage }
    }

    async fn type_counts(
        &self,
        pitch_id: &str,
        window: &RangeWindow,
    ) -> Result<HashMap<String, i64>> {
        let rows = self
            .storage
            .event_type_counts(pitch_id, window.from, window.to)
            .await?;
        Ok(rows.into_iter().map(|r| (r.event_type, r.count)).collect())
    }

    /// 交互漏斗：action 计数 + milestone 深度分布
    pub async fn funnel(&self, pitch_id: &str, range: Option<&str>) -> Result<FunnelResponse> {
        let window = parse_range(range)?;
        let by_type = self.type_counts(pitch_id, &window).await?;
        let totals = sum_counts(&by_type);

        let milestone = |kind: EventKind| by_type.get(kind.as_ref()).copied().unwrap_or(0);

        let unique_visitors = self
            .storage
            .daily_series(pitch_id, window.from_day, window.to_day)
            .await?
            .iter()
            .map(|d| d.unique_visitors)
            .sum();

        Ok(FunnelResponse {
            pitch_id: pitch_id.to_string(),
            range: window.label,
            views: totals.views,
            unique_visitors,
            calls: totals.calls,
            emails: totals.emails,
            shares: totals.shares,
            conversions: totals.conversions,
            milestones: MilestoneBreakdown {
                scroll_25: milestone(EventKind::Scroll25Percent),
                scroll_50: milestone(EventKind::Scroll50Percent),
                scroll_75: milestone(EventKind::Scroll75Percent),
                time_30s: milestone(EventKind::Time30Seconds),
                time_60s: milestone(EventKind::Time60Seconds),
                time_120s: milestone(EventKind::Time120Seconds),
                link_opened: milestone(EventKind::LinkOpened),
            },
            conversion_rate: ratio_per_hundred(totals.conversions, totals.views),
            share_rate: ratio_per_hundred(totals.shares, totals.views),
        })
    }

    /// 病毒系数：每百次浏览产生的再分享数
    pub async fn viral(&self, pitch_id: &str, range: Option<&str>) -> Result<ViralResponse> {
        let window = parse_range(range)?;
        let by_type = self.type_counts(pitch_id, &window).await?;
        let totals = sum_counts(&by_type);

        let threshold = get_config().policy.viral_threshold;
        let coefficient = ratio_per_hundred(totals.shares, totals.views);

        Ok(ViralResponse {
            pitch_id: pitch_id.to_string(),
            range: window.label,
            views: totals.views,
            shares: totals.shares,
            coefficient,
            viral: coefficient >= threshold,
            threshold,
        })
    }

    /// supporter 榜单：按加权归因值降序
    ///
    /// 并列时先看 last_activity_at（更早活跃的排前），再按 referral id。
    /// 榜单读 chain_stats 的终身累计值；range 参数只做校验，
    /// 不参与排序（派生表没有按日分桶）。
    pub async fn top_supporters(
        &self,
        pitch_id: &str,
        range: Option<&str>,
        limit: usize,
    ) -> Result<TopSupportersResponse> {
        if let Some(range) = range {
            let window = parse_range(Some(range))?;
            debug!(
                "Top supporters for pitch {} rank lifetime totals, range {} not applied",
                pitch_id, window.label
            );
        }

        let policy = &get_config().policy;
        let rows = self.storage.chain_stats_for_pitch(pitch_id).await?;

        let mut entries: Vec<SupporterEntry> = rows
            .into_iter()
            .map(|r| {
                let attribution_value = policy.weight_views * r.own_views
                    + policy.weight_calls * r.own_calls
                    + policy.weight_emails * r.own_emails
                    + policy.weight_shares * r.own_shares
                    + policy.weight_conversions * r.own_conversions;
                SupporterEntry {
                    supporter_id: r.supporter_id,
                    referral_id: r.referral_id,
                    depth: r.depth,
                    attribution_value,
                    own_views: r.own_views,
                    own_calls: r.own_calls,
                    own_emails: r.own_emails,
                    own_shares: r.own_shares,
                    own_conversions: r.own_conversions,
                    chain_views: r.chain_views,
                    chain_conversions: r.chain_conversions,
                    last_activity_at: r.last_activity_at,
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            b.attribution_value
                .cmp(&a.attribution_value)
                .then(a.last_activity_at.cmp(&b.last_activity_at))
                .then(a.referral_id.cmp(&b.referral_id))
        });
        entries.truncate(limit);

        Ok(TopSupportersResponse {
            pitch_id: pitch_id.to_string(),
            supporters: entries,
        })
    }

    /// KPI 卡片：当前窗口 vs 上一个等长窗口 + sparkline
    pub async fn kpis(&self, pitch_id: &str, range: Option<&str>) -> Result<KpisResponse> {
        let window = parse_range(range)?;
        let previous_from = window.from_day - Duration::days(window.days);
        let previous_to = window.from_day - Duration::days(1);

        let series = self
            .storage
            .daily_series(pitch_id, previous_from, window.to_day)
            .await?;

        #[derive(Debug, Clone, Copy, Default)]
        struct DaySums {
            views: i64,
            shares: i64,
            contacts: i64,
        }

        let mut current = DaySums::default();
        let mut previous = DaySums::default();
        let mut by_day: HashMap<NaiveDate, DaySums> = HashMap::new();

        for row in &series {
            let sums = DaySums {
                views: row.views,
                shares: row.shares,
                contacts: row.calls + row.emails,
            };
            if row.day_bucket >= window.from_day {
                current.views += sums.views;
                current.shares += sums.shares;
                current.contacts += sums.contacts;
                by_day.insert(row.day_bucket, sums);
            } else if row.day_bucket <= previous_to {
                previous.views += sums.views;
                previous.shares += sums.shares;
                previous.contacts += sums.contacts;
            }
        }

        // spark 覆盖当前窗口的每一天，没有数据的日补零
        let mut views_spark = Vec::with_capacity(window.days as usize);
        let mut shares_spark = Vec::with_capacity(window.days as usize);
        let mut contacts_spark = Vec::with_capacity(window.days as usize);
        for offset in 0..window.days {
            let day = window.from_day + Duration::days(offset);
            let sums = by_day.get(&day).copied().unwrap_or_default();
            views_spark.push(sums.views);
            shares_spark.push(sums.shares);
            contacts_spark.push(sums.contacts);
        }

        Ok(KpisResponse {
            pitch_id: pitch_id.to_string(),
            range: window.label,
            views: KpiCard {
                value: current.views,
                delta_pct: delta_pct(current.views, previous.views),
                spark: views_spark,
            },
            shares: KpiCard {
                value: current.shares,
                delta_pct: delta_pct(current.shares, previous.shares),
                spark: shares_spark,
            },
            contacts: KpiCard {
                value: current.contacts,
                delta_pct: delta_pct(current.contacts, previous.contacts),
                spark: contacts_spark,
            },
        })
    }

    /// 渠道分解：按平台的核心计数 + 分享效率
    pub async fn channels(&self, pitch_id: &str, range: Option<&str>) -> Result<ChannelsResponse> {
        let window = parse_range(range)?;
        let rows = self
            .storage
            .platform_event_counts(pitch_id, window.from, window.to)
            .await?;

        let mut per_platform: HashMap<String, Counts> = HashMap::new();
        for row in rows {
            let Ok(kind) = EventKind::from_str(&row.event_type) else {
                continue;
            };
            let unit = kind.counts();
            let entry = per_platform.entry(row.platform).or_default();
            entry.views += unit.views * row.count;
            entry.calls += unit.calls * row.count;
            entry.emails += unit.emails * row.count;
            entry.shares += unit.shares * row.count;
            entry.conversions += unit.conversions * row.count;
        }

        let mut channels: Vec<ChannelEntry> = per_platform
            .into_iter()
            .map(|(platform, counts)| ChannelEntry {
                platform,
                views: counts.views,
                shares: counts.shares,
                conversions: counts.conversions,
                efficiency: if counts.shares == 0 {
                    0.0
                } else {
                    counts.views as f64 / counts.shares as f64
                },
            })
            .collect();
        channels.sort_by(|a, b| b.views.cmp(&a.views).then(a.platform.cmp(&b.platform)));

        Ok(ChannelsResponse {
            pitch_id: pitch_id.to_string(),
            range: window.label,
            channels,
        })
    }

    /// owner 名下所有 pitch 的汇总
    pub async fn user_summary(
        &self,
        user_id: &str,
        range: Option<&str>,
    ) -> Result<UserSummaryResponse> {
        let window = parse_range(range)?;

        let pitches = self.storage.pitches_for_user(user_id).await?;
        let rows = self
            .storage
            .event_type_counts_for_user(user_id, window.from, window.to)
            .await?;
        let by_type: HashMap<String, i64> =
            rows.into_iter().map(|r| (r.event_type, r.count)).collect();
        let totals = sum_counts(&by_type);

        let viral_coefficient = ratio_per_hundred(totals.shares, totals.views);

        Ok(UserSummaryResponse {
            user_id: user_id.to_string(),
            range: window.label,
            pitch_count: pitches.len(),
            views: totals.views,
            calls: totals.calls,
            emails: totals.emails,
            shares: totals.shares,
            conversions: totals.conversions,
            viral_coefficient,
            viral: viral_coefficient >= get_config().policy.viral_threshold,
        })
    }
}
