//! Pitch owner 查询
//!
//! Pitch 目录属于协作方服务，这里只通过 HTTP 查 owner user_id。
//! 内置 Moka 缓存 + Singleflight，404 做负缓存，
//! 传输层失败不缓存（下一个事件会重试）。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::{trace, warn};

use crate::config::get_config;
use crate::errors::{PitchlinkError, Result};

static HTTP_AGENT: OnceLock<ureq::Agent> = OnceLock::new();

fn get_agent(timeout_ms: u64) -> &'static ureq::Agent {
    HTTP_AGENT.get_or_init(|| {
        ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_millis(timeout_ms)))
            .build()
            .into()
    })
}

/// Pitch → owner 解析接口
///
/// `Ok(None)` 表示 pitch 在协作方不存在（确定性否定），
/// `Err` 表示暂时查不到（超时、网络错误）。
#[async_trait]
pub trait OwnerLookup: Send + Sync {
    async fn owner_of(&self, pitch_id: &str) -> Result<Option<String>>;

    fn name(&self) -> &'static str;
}

/// HTTP 实现：GET {base_url}/pitch/{id}/owner
pub struct HttpOwnerLookup {
    base_url: String,
    timeout_ms: u64,
    /// pitch_id → owner（None 为 404 负缓存）
    cache: Cache<String, Option<String>>,
}

impl HttpOwnerLookup {
    pub fn from_config() -> Self {
        let config = get_config();
        Self::new(
            &config.owner_lookup.base_url,
            config.owner_lookup.timeout_ms,
            config.owner_lookup.cache_capacity,
            config.owner_lookup.cache_ttl_secs,
        )
    }

    pub fn new(base_url: &str, timeout_ms: u64, cache_capacity: u64, cache_ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(cache_capacity)
            .time_to_live(Duration::from_secs(cache_ttl_secs))
            .build();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_ms,
            cache,
        }
    }

    /// 同步请求（在 spawn_blocking 中调用）
    ///
    /// 返回 `None` 表示传输层失败（不缓存），`Some(None)` 表示 404。
    fn fetch_sync(url: String, timeout_ms: u64) -> Option<Option<String>> {
        let agent = get_agent(timeout_ms);

        let resp = match agent.get(&url).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(404)) => {
                trace!("Owner lookup: \"{}\" returned 404", url);
                return Some(None);
            }
            Err(e) => {
                warn!("Owner lookup request to \"{}\" failed: {}", url, e);
                return None;
            }
        };

        let json: serde_json::Value = match resp.into_body().read_json() {
            Ok(j) => j,
            Err(e) => {
                warn!("Owner lookup response from \"{}\" parse failed: {}", url, e);
                return None;
            }
        };

        let owner = json["ownerId"]
            .as_str()
            .or_else(|| json["owner_id"].as_str())
            .or_else(|| json["userId"].as_str())
            .map(String::from);

        match owner {
            Some(owner) => Some(Some(owner)),
            None => {
                warn!("Owner lookup response from \"{}\" has no owner field", url);
                None
            }
        }
    }
}

#[async_trait]
impl OwnerLookup for HttpOwnerLookup {
    async fn owner_of(&self, pitch_id: &str) -> Result<Option<String>> {
        if self.base_url.is_empty() {
            return Err(PitchlinkError::collaborator(
                "owner lookup base_url is not configured".to_string(),
            ));
        }

        let url = format!("{}/pitch/{}/owner", self.base_url, pitch_id);
        let timeout_ms = self.timeout_ms;

        // optionally_get_with：闭包返回 None 时不缓存（传输层失败可立即重试）
        let cached = self
            .cache
            .optionally_get_with(pitch_id.to_string(), async move {
                trace!("Owner cache miss, fetching {}", url);
                tokio::task::spawn_blocking(move || Self::fetch_sync(url, timeout_ms))
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Owner lookup spawn_blocking failed: {}", e);
                        None
                    })
            })
            .await;

        match cached {
            Some(owner) => Ok(owner),
            None => Err(PitchlinkError::collaborator(format!(
                "owner lookup for pitch {} failed",
                pitch_id
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "HttpOwnerLookup"
    }
}

/// 静态映射实现（测试和单机演示用）
#[derive(Default)]
pub struct StaticOwnerLookup {
    owners: std::collections::HashMap<String, String>,
}

impl StaticOwnerLookup {
    pub fn new(owners: std::collections::HashMap<String, String>) -> Self {
        Self { owners }
    }

    pub fn with_owner(mut self, pitch_id: &str, user_id: &str) -> Self {
        self.owners.insert(pitch_id.to_string(), user_id.to_string());
        self
    }
}

#[async_trait]
impl OwnerLookup for StaticOwnerLookup {
    async fn owner_of(&self, pitch_id: &str) -> Result<Option<String>> {
        Ok(self.owners.get(pitch_id).cloned())
    }

    fn name(&self) -> &'static str {
        "StaticOwnerLookup"
    }
}

/// 按配置选择实现：base_url 为空时回退到空的静态映射，
/// 此时所有事件都会因 UnknownPitch 被丢弃（fail closed）。
pub fn owner_lookup_from_config() -> Arc<dyn OwnerLookup> {
    let config = get_config();
    if config.owner_lookup.base_url.is_empty() {
        warn!("owner_lookup.base_url is empty, all events will be rejected as unknown pitch");
        Arc::new(StaticOwnerLookup::default())
    } else {
        Arc::new(HttpOwnerLookup::from_config())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_lookup() {
        let lookup = StaticOwnerLookup::default().with_owner("pitch-1", "user-9");

        assert_eq!(
            lookup.owner_of("pitch-1").await.unwrap(),
            Some("user-9".to_string())
        );
        assert_eq!(lookup.owner_of("pitch-2").await.unwrap(), None);
    }
}
