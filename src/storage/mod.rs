//! SeaORM storage backend
//!
//! 支持 SQLite、MySQL/MariaDB、PostgreSQL，
//! 后端类型从 DATABASE_URL 推断。

mod analytics;
mod connection;
mod counters;
mod events;
mod referrals;
pub mod retry;

pub use analytics::{DailySeriesRow, PlatformCountRow, TypeCountRow};
pub use connection::{connect_generic, connect_sqlite, run_migrations};
pub use events::NewTrackingEvent;
pub use referrals::NewReferral;

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tracing::info;

use crate::errors::{PitchlinkError, Result};
use crate::tracking::AggregateSink;

/// 从数据库 URL 推断数据库类型
pub fn infer_backend_from_url(database_url: &str) -> Result<String> {
    if database_url.starts_with("sqlite://")
        || database_url.ends_with(".db")
        || database_url.ends_with(".sqlite")
        || database_url == ":memory:"
    {
        Ok("sqlite".to_string())
    } else if database_url.starts_with("mysql://") || database_url.starts_with("mariadb://") {
        Ok("mysql".to_string())
    } else if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        Ok("postgres".to_string())
    } else {
        Err(PitchlinkError::database_config(format!(
            "无法从 URL 推断数据库类型: {}. 支持的 URL 格式: sqlite://, mysql://, mariadb://, postgres://",
            database_url
        )))
    }
}

/// SeaORM-based storage backend
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
    backend_name: String,
    /// 重试配置
    retry_config: retry::RetryConfig,
}

impl SeaOrmStorage {
    pub async fn new(database_url: &str, backend_name: &str) -> Result<Self> {
        if database_url.is_empty() {
            return Err(PitchlinkError::database_config(
                "DATABASE_URL 未设置".to_string(),
            ));
        }

        let config = crate::config::get_config();
        let retry_config = retry::RetryConfig {
            max_retries: config.database.retry_count,
            base_delay_ms: config.database.retry_base_delay_ms,
            max_delay_ms: config.database.retry_max_delay_ms,
        };

        let db = if backend_name == "sqlite" {
            connect_sqlite(database_url).await?
        } else {
            connect_generic(database_url, backend_name).await?
        };

        let storage = SeaOrmStorage {
            db,
            backend_name: backend_name.to_string(),
            retry_config,
        };

        run_migrations(&storage.db).await?;

        info!(
            "{} storage initialized",
            storage.backend_name.to_uppercase()
        );
        Ok(storage)
    }

    pub fn get_backend_name(&self) -> &str {
        &self.backend_name
    }

    pub fn as_aggregate_sink(self: &Arc<Self>) -> Arc<dyn AggregateSink> {
        Arc::clone(self) as Arc<dyn AggregateSink>
    }

    /// 获取数据库连接（迁移、诊断等直接访问场景）
    pub fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_backend_from_url() {
        assert_eq!(
            infer_backend_from_url("sqlite://test.db?mode=rwc").unwrap(),
            "sqlite"
        );
        assert_eq!(
            infer_backend_from_url("postgres://localhost/app").unwrap(),
            "postgres"
        );
        assert_eq!(
            infer_backend_from_url("mysql://localhost/app").unwrap(),
            "mysql"
        );
        assert!(infer_backend_from_url("ftp://nope").is_err());
    }
}
