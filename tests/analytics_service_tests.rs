//! AnalyticsService 集成测试
//!
//! 用真实的摄入 + 刷盘路径喂数据，再走读路径断言：
//! 漏斗、病毒系数阈值、supporter 榜单排序、KPI 对比和渠道分解。

use std::sync::{Arc, Once};
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use pitchlink::config::init_config;
use pitchlink::services::{
    AnalyticsService, ChainWalker, CreateReferralRequest, IngestRequest, IngestService,
    OwnerLookup, ReferralService, StaticOwnerLookup,
};
use pitchlink::storage::SeaOrmStorage;
use pitchlink::tracking::manager::AggregateManager;

static INIT: Once = Once::new();

fn init_static_config() {
    INIT.call_once(|| {
        init_config();
    });
}

struct TestApp {
    referrals: ReferralService,
    ingest: IngestService,
    analytics: AnalyticsService,
    _td: TempDir,
}

async fn create_app() -> TestApp {
    init_static_config();
    let td = TempDir::new().unwrap();
    let p = td.path().join("analytics_test.db");
    let u = format!("sqlite://{}?mode=rwc", p.display());
    let storage = Arc::new(SeaOrmStorage::new(&u, "sqlite").await.unwrap());

    // 两个 pitch 同属一个 owner（user summary 用）
    let lookup: Arc<dyn OwnerLookup> = Arc::new(
        StaticOwnerLookup::default()
            .with_owner("pitch-1", "owner-1")
            .with_owner("pitch-2", "owner-1"),
    );
    let walker = Arc::new(ChainWalker::new(Arc::clone(&storage)));
    let manager = AggregateManager::new(
        storage.as_aggregate_sink(),
        Duration::from_secs(3600),
        1_000_000,
    );

    TestApp {
        referrals: ReferralService::new(
            Arc::clone(&storage),
            Arc::clone(&walker),
            Arc::clone(&lookup),
        ),
        ingest: IngestService::new(Arc::clone(&storage), walker, lookup, manager),
        analytics: AnalyticsService::new(storage),
        _td: td,
    }
}

struct TestEvent<'a> {
    pitch: &'a str,
    event_type: &'a str,
    referral_id: Option<i64>,
    platform: &'a str,
    session: &'a str,
    occurred_at: Option<chrono::DateTime<Utc>>,
}

impl Default for TestEvent<'_> {
    fn default() -> Self {
        TestEvent {
            pitch: "pitch-1",
            event_type: "PITCH_VIEWED",
            referral_id: None,
            platform: "whatsapp",
            session: "s1",
            occurred_at: None,
        }
    }
}

async fn feed(app: &TestApp, ev: TestEvent<'_>) {
    app.ingest
        .ingest(IngestRequest {
            pitch_id: ev.pitch.to_string(),
            event_type: ev.event_type.to_string(),
            referral_id: ev.referral_id,
            platform: Some(ev.platform.to_string()),
            session_id: Some(ev.session.to_string()),
            visitor_id: None,
            occurred_at: ev.occurred_at,
            metadata: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_funnel_counts_and_milestones() {
    let app = create_app().await;

    for session in ["s1", "s2", "s3"] {
        feed(&app, TestEvent { session, ..TestEvent::default() }).await;
    }
    feed(&app, TestEvent { event_type: "CALL_CLICKED", ..TestEvent::default() }).await;
    feed(&app, TestEvent { event_type: "EMAIL_CLICKED", ..TestEvent::default() }).await;
    feed(&app, TestEvent { event_type: "SHARE_RESHARED", ..TestEvent::default() }).await;
    feed(&app, TestEvent { event_type: "SCROLL_50_PERCENT", ..TestEvent::default() }).await;
    feed(&app, TestEvent { event_type: "TIME_30_SECONDS", ..TestEvent::default() }).await;
    app.ingest.flush().await;

    let funnel = app.analytics.funnel("pitch-1", Some("7d")).await.unwrap();
    assert_eq!(funnel.views, 3);
    assert_eq!(funnel.unique_visitors, 3);
    assert_eq!(funnel.calls, 1);
    assert_eq!(funnel.emails, 1);
    assert_eq!(funnel.shares, 1);
    // call + email 各贡献一次 conversion
    assert_eq!(funnel.conversions, 2);
    assert_eq!(funnel.milestones.scroll_50, 1);
    assert_eq!(funnel.milestones.time_30s, 1);
    assert_eq!(funnel.milestones.scroll_25, 0);
    let expected_rate = 2.0 / 3.0 * 100.0;
    assert!((funnel.conversion_rate - expected_rate).abs() < 1e-9);
    let expected_share_rate = 1.0 / 3.0 * 100.0;
    assert!((funnel.share_rate - expected_share_rate).abs() < 1e-9);
}

#[tokio::test]
async fn test_viral_threshold_boundary() {
    let app = create_app().await;

    // 100 次浏览 + 1 次再分享 → 系数恰好 1.0，达到阈值算 viral
    for i in 0..100 {
        feed(&app, TestEvent { session: &format!("s{}", i), ..TestEvent::default() }).await;
    }
    feed(&app, TestEvent { event_type: "SHARE_RESHARED", ..TestEvent::default() }).await;
    app.ingest.flush().await;

    let viral = app.analytics.viral("pitch-1", Some("7d")).await.unwrap();
    assert_eq!(viral.views, 100);
    assert_eq!(viral.shares, 1);
    assert!((viral.coefficient - 1.0).abs() < f64::EPSILON);
    assert!(viral.viral);

    // 没有再分享的 pitch 系数为 0
    feed(&app, TestEvent { pitch: "pitch-2", ..TestEvent::default() }).await;
    app.ingest.flush().await;
    let quiet = app.analytics.viral("pitch-2", Some("7d")).await.unwrap();
    assert_eq!(quiet.coefficient, 0.0);
    assert!(!quiet.viral);
}

#[tokio::test]
async fn test_top_supporters_weighted_order_and_tiebreak() {
    let app = create_app().await;
    let make = |supporter: &str| CreateReferralRequest {
        pitch_id: "pitch-1".to_string(),
        supporter_id: supporter.to_string(),
        parent_referral_id: None,
        platform: Some("whatsapp".to_string()),
    };
    let alice = app.referrals.create_or_get(make("alice")).await.unwrap();
    let bob = app.referrals.create_or_get(make("bob")).await.unwrap();
    let carol = app.referrals.create_or_get(make("carol")).await.unwrap();

    let now = Utc::now();
    // alice：1 次 call（calls×5 + conversions×10 = 15）
    feed(&app, TestEvent {
        event_type: "CALL_CLICKED",
        referral_id: Some(alice.referral.id),
        ..TestEvent::default()
    })
    .await;
    // bob 和 carol 各 2 次浏览（value 2，并列）；bob 更早活跃
    for (r, session, at) in [
        (bob.referral.id, "b1", now - chrono::Duration::hours(2)),
        (bob.referral.id, "b2", now - chrono::Duration::hours(2)),
        (carol.referral.id, "c1", now - chrono::Duration::hours(1)),
        (carol.referral.id, "c2", now - chrono::Duration::hours(1)),
    ] {
        feed(&app, TestEvent {
            referral_id: Some(r),
            session,
            occurred_at: Some(at),
            ..TestEvent::default()
        })
        .await;
    }
    app.ingest.flush().await;

    let top = app.analytics.top_supporters("pitch-1", None, 10).await.unwrap();
    let order: Vec<&str> = top.supporters.iter().map(|s| s.supporter_id.as_str()).collect();
    assert_eq!(order, vec!["alice", "bob", "carol"]);
    assert_eq!(top.supporters[0].attribution_value, 15);
    assert_eq!(top.supporters[1].attribution_value, 2);
    assert_eq!(top.supporters[2].attribution_value, 2);

    // limit 截断
    let top2 = app.analytics.top_supporters("pitch-1", None, 2).await.unwrap();
    assert_eq!(top2.supporters.len(), 2);

    // range 接受但不改变终身榜单；非法值照常报错
    let ranged = app
        .analytics
        .top_supporters("pitch-1", Some("7d"), 10)
        .await
        .unwrap();
    let ranged_order: Vec<&str> = ranged
        .supporters
        .iter()
        .map(|s| s.supporter_id.as_str())
        .collect();
    assert_eq!(ranged_order, order);
    assert!(
        app.analytics
            .top_supporters("pitch-1", Some("bogus"), 10)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_kpis_zero_prior_window_and_spark_fill() {
    let app = create_app().await;

    feed(&app, TestEvent { session: "s1", ..TestEvent::default() }).await;
    feed(&app, TestEvent { session: "s2", ..TestEvent::default() }).await;
    feed(&app, TestEvent { event_type: "CALL_CLICKED", ..TestEvent::default() }).await;
    app.ingest.flush().await;

    let kpis = app.analytics.kpis("pitch-1", Some("7d")).await.unwrap();
    assert_eq!(kpis.views.value, 2);
    // call 计入 contacts
    assert_eq!(kpis.contacts.value, 1);
    assert_eq!(kpis.shares.value, 0);

    // 上一窗口为零 → 变化率定义为 0，不是 Inf
    assert_eq!(kpis.views.delta_pct, 0.0);
    assert_eq!(kpis.contacts.delta_pct, 0.0);

    // sparkline 补满 7 天，窗口以今天收尾，只有最后一天有数据
    assert_eq!(kpis.views.spark.len(), 7);
    assert_eq!(kpis.views.spark[6], 2);
    assert!(kpis.views.spark[..6].iter().all(|v| *v == 0));
    assert_eq!(kpis.contacts.spark[6], 1);
    assert!(kpis.shares.spark.iter().all(|v| *v == 0));
}

#[tokio::test]
async fn test_channels_efficiency() {
    let app = create_app().await;

    for session in ["w1", "w2", "w3", "w4"] {
        feed(&app, TestEvent { platform: "whatsapp", session, ..TestEvent::default() }).await;
    }
    for session in ["w1", "w2"] {
        feed(&app, TestEvent {
            event_type: "SHARE_RESHARED",
            platform: "whatsapp",
            session,
            ..TestEvent::default()
        })
        .await;
    }
    for session in ["l1", "l2", "l3"] {
        feed(&app, TestEvent { platform: "linkedin", session, ..TestEvent::default() }).await;
    }
    app.ingest.flush().await;

    let channels = app.analytics.channels("pitch-1", Some("7d")).await.unwrap();
    assert_eq!(channels.channels.len(), 2);

    // views 降序：whatsapp(4) 在 linkedin(3) 前
    let whatsapp = &channels.channels[0];
    assert_eq!(whatsapp.platform, "whatsapp");
    assert_eq!(whatsapp.views, 4);
    assert_eq!(whatsapp.shares, 2);
    assert!((whatsapp.efficiency - 2.0).abs() < f64::EPSILON);

    let linkedin = &channels.channels[1];
    assert_eq!(linkedin.platform, "linkedin");
    assert_eq!(linkedin.views, 3);
    // 没有分享时效率为 0 而不是除零
    assert_eq!(linkedin.efficiency, 0.0);
}

#[tokio::test]
async fn test_user_summary_spans_pitches() {
    let app = create_app().await;

    feed(&app, TestEvent { pitch: "pitch-1", session: "s1", ..TestEvent::default() }).await;
    feed(&app, TestEvent { pitch: "pitch-1", session: "s2", ..TestEvent::default() }).await;
    feed(&app, TestEvent { pitch: "pitch-2", session: "s3", ..TestEvent::default() }).await;
    feed(&app, TestEvent {
        pitch: "pitch-2",
        event_type: "EMAIL_CLICKED",
        ..TestEvent::default()
    })
    .await;
    feed(&app, TestEvent {
        pitch: "pitch-2",
        event_type: "SHARE_RESHARED",
        ..TestEvent::default()
    })
    .await;
    app.ingest.flush().await;

    let summary = app.analytics.user_summary("owner-1", Some("7d")).await.unwrap();
    assert_eq!(summary.pitch_count, 2);
    assert_eq!(summary.views, 3);
    assert_eq!(summary.emails, 1);
    assert_eq!(summary.shares, 1);
    assert_eq!(summary.conversions, 1);

    // 病毒系数用汇总后的 views/shares 算：1 share / 3 views × 100
    let expected = 1.0 / 3.0 * 100.0;
    assert!((summary.viral_coefficient - expected).abs() < 1e-9);
    assert!(summary.viral);

    let empty = app.analytics.user_summary("nobody", Some("7d")).await.unwrap();
    assert_eq!(empty.pitch_count, 0);
    assert_eq!(empty.views, 0);
    assert_eq!(empty.viral_coefficient, 0.0);
    assert!(!empty.viral);
}
