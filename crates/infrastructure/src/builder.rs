use application::{InMemoryStorage, Storage};
use config::DatabaseConfig;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 按配置选择的存储后端
#[derive(Clone)]
pub enum Infrastructure {
    Postgres(PgStorage),
    InMemory(InMemoryStorage),
}

impl Infrastructure {
    /// 配置了数据库地址时连接 PostgreSQL 并执行迁移，否则使用内存存储
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, InfrastructureError> {
        let Some(url) = config.url.as_deref() else {
            tracing::warn!("未配置数据库，使用内存存储，重启后数据丢失");
            return Ok(Self::InMemory(InMemoryStorage::new()));
        };

        let pool = create_pg_pool(url, config.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!(max_connections = config.max_connections, "数据库连接池已就绪");

        Ok(Self::Postgres(PgStorage::new(pool)))
    }

    pub fn storage(&self) -> Storage {
        match self {
            Infrastructure::Postgres(pg) => pg.storage(),
            Infrastructure::InMemory(memory) => memory.storage(),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Infrastructure::Postgres(_) => "postgres",
            Infrastructure::InMemory(_) => "memory",
        }
    }
}
