//! 配置管理
//!
//! 启动时从 `pitchlink.toml`（可选）和 `PITCHLINK__*` 环境变量加载，
//! 之后通过全局 `get_config()` 只读访问。
//! 归因权重和病毒系数阈值属于产品调参常量，放在 [`PolicyConfig`] 中，
//! 不在调用点硬编码。

use std::sync::OnceLock;

use serde::Deserialize;
use tracing::warn;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub tracking: TrackingConfig,
    pub owner_lookup: OwnerLookupConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_enabled: false,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub retry_count: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://pitchlink.db?mode=rwc".to_string(),
            pool_size: 10,
            retry_count: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// 聚合缓冲定时刷盘间隔（秒）
    pub flush_interval_secs: u64,
    /// 缓冲增量达到该数量时触发刷盘
    pub max_deltas_before_flush: usize,
    /// 里程碑事件去重窗口（秒），同一 (session, event, referral) 只计一次
    pub dedup_window_secs: u64,
    /// 日独立访客窗口（秒），覆盖一个 UTC 日 + 时钟偏移余量
    pub visitor_window_secs: u64,
    /// 链走查硬跳数上限，超出即 ChainTooDeep 截断
    pub max_chain_hops: usize,
    /// 链缓存容量（按 referral id）
    pub chain_cache_capacity: u64,
    pub chain_cache_ttl_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 5,
            max_deltas_before_flush: 500,
            dedup_window_secs: 1800,
            visitor_window_secs: 26 * 3600,
            max_chain_hops: 50,
            chain_cache_capacity: 10_000,
            chain_cache_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OwnerLookupConfig {
    /// 协作方基地址，拼接 `/pitch/{id}/owner`；为空时仅能使用注入的实现
    pub base_url: String,
    pub timeout_ms: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
}

impl Default for OwnerLookupConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_ms: 2000,
            cache_ttl_secs: 300,
            cache_capacity: 10_000,
        }
    }
}

/// 产品调参常量（归因权重和 viral 阈值，可配置覆盖）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub weight_views: i64,
    pub weight_calls: i64,
    pub weight_emails: i64,
    pub weight_shares: i64,
    pub weight_conversions: i64,
    /// shares-per-hundred-views 达到该值视为 viral
    pub viral_threshold: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            weight_views: 1,
            weight_calls: 5,
            weight_emails: 3,
            weight_shares: 2,
            weight_conversions: 10,
            viral_threshold: 1.0,
        }
    }
}

/// 加载配置（toml 文件 + 环境变量覆盖）
fn load_config() -> AppConfig {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("pitchlink").required(false))
        .add_source(
            config::Environment::with_prefix("PITCHLINK")
                .separator("__")
                .try_parsing(true),
        );

    match builder.build().and_then(|c| c.try_deserialize()) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Failed to load config ({}), falling back to defaults", e);
            AppConfig::default()
        }
    }
}

/// 初始化全局配置（重复调用是 no-op）
pub fn init_config() -> &'static AppConfig {
    CONFIG.get_or_init(load_config)
}

/// 获取全局配置（未初始化时使用默认值初始化）
pub fn get_config() -> &'static AppConfig {
    CONFIG.get_or_init(load_config)
}
