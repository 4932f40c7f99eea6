//! ReferralService 集成测试
//!
//! 覆盖幂等创建、source_type 推导、parent 校验、环检测、
//! 停用语义和注册侧计数（referrals_created / chain_reach）。

use std::sync::{Arc, Once};

use tempfile::TempDir;

use pitchlink::config::init_config;
use pitchlink::errors::PitchlinkError;
use pitchlink::services::{
    ChainWalker, CreateReferralRequest, OwnerLookup, ReferralService, StaticOwnerLookup,
};
use pitchlink::storage::SeaOrmStorage;

static INIT: Once = Once::new();

fn init_static_config() {
    INIT.call_once(|| {
        init_config();
    });
}

async fn create_temp_storage() -> (Arc<SeaOrmStorage>, TempDir) {
    init_static_config();
    let td = TempDir::new().unwrap();
    let p = td.path().join("referral_svc_test.db");
    let u = format!("sqlite://{}?mode=rwc", p.display());
    let s = SeaOrmStorage::new(&u, "sqlite").await.unwrap();
    (Arc::new(s), td)
}

fn make_service(storage: &Arc<SeaOrmStorage>) -> ReferralService {
    let lookup: Arc<dyn OwnerLookup> = Arc::new(
        StaticOwnerLookup::default()
            .with_owner("pitch-1", "owner-1")
            .with_owner("pitch-2", "owner-2"),
    );
    let walker = Arc::new(ChainWalker::new(Arc::clone(storage)));
    ReferralService::new(Arc::clone(storage), walker, lookup)
}

fn req(pitch: &str, supporter: &str, parent: Option<i64>) -> CreateReferralRequest {
    CreateReferralRequest {
        pitch_id: pitch.to_string(),
        supporter_id: supporter.to_string(),
        parent_referral_id: parent,
        platform: Some("whatsapp".to_string()),
    }
}

#[tokio::test]
async fn test_create_is_idempotent_per_pitch_supporter() {
    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    let first = service.create_or_get(req("pitch-1", "alice", None)).await.unwrap();
    assert!(first.created);

    // 重复创建返回同一行，即使 platform 不同
    let second = service
        .create_or_get(CreateReferralRequest {
            platform: Some("email".to_string()),
            ..req("pitch-1", "alice", None)
        })
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.referral.id, first.referral.id);
    assert_eq!(second.referral.platform, "whatsapp");
}

#[tokio::test]
async fn test_source_type_derivation() {
    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    // owner 自己分享 → self
    let own = service.create_or_get(req("pitch-1", "owner-1", None)).await.unwrap();
    assert_eq!(own.referral.source_type, "self");

    // 无 parent 的第三方 → supporter
    let direct = service.create_or_get(req("pitch-1", "bob", None)).await.unwrap();
    assert_eq!(direct.referral.source_type, "supporter");

    // 挂在别人链上 → chain
    let chained = service
        .create_or_get(req("pitch-1", "carol", Some(direct.referral.id)))
        .await
        .unwrap();
    assert_eq!(chained.referral.source_type, "chain");
    assert_eq!(chained.referral.parent_referral_id, Some(direct.referral.id));
}

#[tokio::test]
async fn test_unknown_pitch_is_rejected() {
    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    let err = service
        .create_or_get(req("no-such-pitch", "alice", None))
        .await
        .unwrap_err();
    assert!(matches!(err, PitchlinkError::InvalidPitch(_)));
}

#[tokio::test]
async fn test_parent_must_exist_and_match_pitch() {
    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    // parent 不存在
    let err = service
        .create_or_get(req("pitch-1", "alice", Some(999)))
        .await
        .unwrap_err();
    assert!(matches!(err, PitchlinkError::Validation(_)));

    // parent 属于另一个 pitch
    let other = service.create_or_get(req("pitch-2", "dave", None)).await.unwrap();
    let err = service
        .create_or_get(req("pitch-1", "alice", Some(other.referral.id)))
        .await
        .unwrap_err();
    assert!(matches!(err, PitchlinkError::Validation(_)));
}

#[tokio::test]
async fn test_ancestor_supporter_resolves_idempotently() {
    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    let root = service.create_or_get(req("pitch-1", "alice", None)).await.unwrap();
    let child = service
        .create_or_get(req("pitch-1", "bob", Some(root.referral.id)))
        .await
        .unwrap();

    // alice 已在 bob 的链上；幂等路径先命中，注册表保持无环
    let again = service
        .create_or_get(req("pitch-1", "alice", Some(child.referral.id)))
        .await
        .unwrap();
    assert!(!again.created);
    assert_eq!(again.referral.id, root.referral.id);
}

#[tokio::test]
async fn test_cycle_detected_when_supporter_is_ancestor() {
    use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};

    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    let root = service.create_or_get(req("pitch-1", "alice", None)).await.unwrap();
    let child = service
        .create_or_get(req("pitch-1", "bob", Some(root.referral.id)))
        .await
        .unwrap();

    // 正常路径下 supporter 在链上必然先命中幂等返回；
    // 这里直接改根节点的 supporter 模拟并发竞争留下的状态
    use migration::entities::referral;
    let model = referral::Entity::find_by_id(root.referral.id)
        .one(storage.get_db())
        .await
        .unwrap()
        .unwrap();
    let mut active: referral::ActiveModel = model.into();
    active.supporter_id = Set("carol".to_string());
    active.update(storage.get_db()).await.unwrap();

    let err = service
        .create_or_get(req("pitch-1", "carol", Some(child.referral.id)))
        .await
        .unwrap_err();
    assert!(matches!(err, PitchlinkError::CycleDetected(_)));
}

#[tokio::test]
async fn test_chain_is_root_first_with_depths() {
    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    let root = service.create_or_get(req("pitch-1", "alice", None)).await.unwrap();
    let mid = service
        .create_or_get(req("pitch-1", "bob", Some(root.referral.id)))
        .await
        .unwrap();
    let leaf = service
        .create_or_get(req("pitch-1", "carol", Some(mid.referral.id)))
        .await
        .unwrap();

    let chain = service.chain(leaf.referral.id).await.unwrap();
    let supporters: Vec<&str> = chain.iter().map(|n| n.supporter_id.as_str()).collect();
    assert_eq!(supporters, vec!["alice", "bob", "carol"]);
    assert_eq!(chain[0].depth, 0);
    assert_eq!(chain[2].depth, 2);
    assert_eq!(chain[2].referral_id, leaf.referral.id);

    let err = service.chain(9999).await.unwrap_err();
    assert!(matches!(err, PitchlinkError::NotFound(_)));
}

#[tokio::test]
async fn test_deactivate_and_not_found() {
    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    let r = service.create_or_get(req("pitch-1", "alice", None)).await.unwrap();
    service.deactivate(r.referral.id).await.unwrap();

    let fetched = service.get(r.referral.id).await.unwrap();
    assert!(!fetched.active);

    let err = service.deactivate(12345).await.unwrap_err();
    assert!(matches!(err, PitchlinkError::NotFound(_)));
}

#[tokio::test]
async fn test_registry_counters() {
    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    let root = service.create_or_get(req("pitch-1", "alice", None)).await.unwrap();
    let mid = service
        .create_or_get(req("pitch-1", "bob", Some(root.referral.id)))
        .await
        .unwrap();
    service
        .create_or_get(req("pitch-1", "carol", Some(mid.referral.id)))
        .await
        .unwrap();

    let rows = storage.supporter_rows_for_pitch("pitch-1").await.unwrap();
    let find = |s: &str| rows.iter().find(|r| r.supporter_id == s).unwrap();

    // alice 是两级下线的祖先
    assert_eq!(find("alice").referrals_created, 1);
    assert_eq!(find("alice").chain_reach, 2);
    assert_eq!(find("bob").chain_reach, 1);
    assert_eq!(find("carol").chain_reach, 0);
}

#[tokio::test]
async fn test_new_referral_has_zero_chain_stat_row() {
    let (storage, _td) = create_temp_storage().await;
    let service = make_service(&storage);

    let root = service.create_or_get(req("pitch-1", "alice", None)).await.unwrap();
    let child = service
        .create_or_get(req("pitch-1", "bob", Some(root.referral.id)))
        .await
        .unwrap();

    let row = storage
        .chain_stat_for_referral(child.referral.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.depth, 1);
    assert_eq!(row.own_views, 0);
    assert_eq!(row.chain_views, 0);
}
