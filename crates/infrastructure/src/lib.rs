//! 基础设施层实现。
//!
//! PostgreSQL 存储适配器、连接池与迁移，以及按配置选择存储后端。

pub mod builder;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgGroupRepository, PgMessageRepository, PgStorage, PgUserDirectory,
};
