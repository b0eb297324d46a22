//! 数据库连接管理
//!
//! 提供数据库连接池初始化功能：
//! - connect_pool：建立 Postgres 连接池
//!
//! 网关写入路径是单控制流（每个轮询周期一个事务），外加查询面
//! 的零星读取，默认连接数上限取 8 已有富余。

use crate::error::StorageError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// 默认连接池上限
const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// 建立 Postgres 连接池（默认连接数上限）。
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StorageError> {
    connect_pool_with_size(database_url, DEFAULT_MAX_CONNECTIONS).await
}

/// 建立 Postgres 连接池，显式指定连接数上限。
pub async fn connect_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await?;
    Ok(pool)
}
