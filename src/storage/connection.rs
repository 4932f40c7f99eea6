//! 数据库连接建立
//!
//! 两条路径：SQLite 走 sqlx 的细粒度选项（单文件部署、测试），
//! MySQL/PostgreSQL 走 SeaORM 的通用连接池。
//! 写负载特征是事件追加 + 刷盘时的批量 upsert，读负载是 dashboard
//! 查询，连接参数按这个形状调。

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

use crate::errors::{PitchlinkError, Result};
use migration::{Migrator, MigratorTrait};

/// 连接 SQLite（自动建库）
///
/// WAL 让事件追加不阻塞 analytics 读；刷盘的 upsert 批次短，
/// busy_timeout 5s 足够等掉并发写锁。
pub async fn connect_sqlite(database_url: &str) -> Result<DatabaseConnection> {
    use sea_orm::SqlxSqliteConnector;
    use sea_orm::sqlx::SqlitePool;
    use sea_orm::sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
    use std::str::FromStr;

    let opt = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| PitchlinkError::database_config(format!("SQLite URL 无法解析: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePool::connect_with(opt)
        .await
        .map_err(|e| PitchlinkError::database_connection(format!("SQLite 连接失败: {}", e)))?;

    Ok(SqlxSqliteConnector::from_sqlx_sqlite_pool(pool))
}

/// 连接 MySQL / PostgreSQL
pub async fn connect_generic(database_url: &str, backend_name: &str) -> Result<DatabaseConnection> {
    let pool_size = crate::config::get_config().database.pool_size;

    let mut opt = ConnectOptions::new(database_url.to_owned());
    // 刷盘是单写者（flush 锁串行化），常驻连接留一个就够，
    // 其余按读峰值弹性扩到 pool_size
    opt.max_connections(pool_size)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(false);

    Database::connect(opt).await.map_err(|e| {
        PitchlinkError::database_connection(format!(
            "{} 连接失败: {}",
            backend_name.to_uppercase(),
            e
        ))
    })
}

/// 建表 / 升级 schema
pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .map_err(|e| PitchlinkError::database_operation(format!("数据库迁移失败: {}", e)))?;

    info!("Database migrations completed");
    Ok(())
}
