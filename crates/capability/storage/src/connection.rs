//! 数据库连接管理
//!
//! - connect_pool：建立 Postgres 连接池
//! - connect_redis：打开 Redis 客户端（连接按需建立）

use crate::error::StorageError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// 建立 Postgres 连接池
///
/// 最大连接数限制为 8。
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// 打开 Redis 客户端
pub fn connect_redis(redis_url: &str) -> Result<redis::Client, StorageError> {
    Ok(redis::Client::open(redis_url)?)
}
