//! 统一配置中心
//!
//! 配置按以下顺序叠加（后者覆盖前者）：
//! - 内置默认值
//! - 可选的 YAML 配置文件（默认 `config.yaml`）
//! - `CHAT_` 前缀的环境变量，层级用 `__` 分隔，例如 `CHAT_SERVER__PORT=9000`

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHAT_";

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub delivery: DeliveryConfig,
    pub history: HistoryConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// 数据库配置；未设置 `url` 时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
            expiration_hours: 24,
        }
    }
}

/// 重复发送抑制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// 同一 (发送者, 目标, 正文) 在该窗口内重复发送会被折叠
    pub suppression_window_ms: u64,
    /// 抑制记录的保留时长，必须不小于抑制窗口
    pub suppression_retention_ms: u64,
    /// 后台清理周期
    pub sweep_interval_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            suppression_window_ms: 3_000,
            suppression_retention_ms: 10_000,
            sweep_interval_ms: 10_000,
        }
    }
}

impl DeliveryConfig {
    pub fn suppression_window(&self) -> Duration {
        Duration::from_millis(self.suppression_window_ms)
    }

    pub fn suppression_retention(&self) -> Duration {
        Duration::from_millis(self.suppression_retention_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// 历史消息查询配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub default_limit: u32,
    pub max_limit: u32,
    /// 单个存储查询（计数 / 分页）的时间预算
    pub query_budget_ms: u64,
    /// 整个历史请求的超时，超时返回空页而不是错误
    pub overall_timeout_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 100,
            query_budget_ms: 3_000,
            overall_timeout_ms: 5_000,
        }
    }
}

impl HistoryConfig {
    pub fn query_budget(&self) -> Duration {
        Duration::from_millis(self.query_budget_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }
}

impl AppConfig {
    /// 默认值 + `config.yaml` + 环境变量
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config.yaml")
    }

    /// 指定 YAML 文件路径加载；文件不存在时跳过该层
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let figment = Self::figment()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// 只包含默认值的 figment，便于调用方继续叠加
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment
            .extract()
            .map_err(|err| ConfigError::Load(Box::new(err)))?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if let Some(url) = &self.database.url {
            if url.is_empty() {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "database url cannot be empty when set".to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "max connections must be greater than 0".to_string(),
                ));
            }
        }

        let delivery = &self.delivery;
        if delivery.suppression_window_ms == 0 || delivery.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidDeliveryConfig(
                "suppression window and sweep interval must be greater than 0".to_string(),
            ));
        }
        if delivery.suppression_retention_ms < delivery.suppression_window_ms {
            return Err(ConfigError::InvalidDeliveryConfig(
                "suppression retention must not be shorter than the suppression window"
                    .to_string(),
            ));
        }

        let history = &self.history;
        if history.default_limit == 0 || history.default_limit > history.max_limit {
            return Err(ConfigError::InvalidHistoryConfig(
                "limits must satisfy 1 <= default_limit <= max_limit".to_string(),
            ));
        }
        if history.query_budget_ms == 0 || history.query_budget_ms > history.overall_timeout_ms {
            return Err(ConfigError::InvalidHistoryConfig(
                "query budget must be non-zero and not exceed the overall timeout".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[source] Box<figment::Error>),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid delivery configuration: {0}")]
    InvalidDeliveryConfig(String),
    #[error("Invalid history configuration: {0}")]
    InvalidHistoryConfig(String),
}
