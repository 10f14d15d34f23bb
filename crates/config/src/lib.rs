//! 统一配置中心
//!
//! 提供服务的全局配置管理，包括：
//! - HTTP/WebSocket 监听地址
//! - 连接注册表后端（内存 / Redis）
//! - 广播投递超时与重试
//! - 默认会话策略与雷区尺寸
//!
//! 加载优先级：内置默认值 -> 可选配置文件（`APP_CONFIG_FILE`）-> 环境变量（`APP_*`）。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub registry: RegistryConfig,
    #[serde(default)]
    #[validate(nested)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    #[validate(nested)]
    pub board: BoardConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 连接注册表后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    #[default]
    Memory,
    Redis,
}

/// 连接注册表配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_registry"))]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackend,
    #[serde(default)]
    pub redis_url: Option<String>,
    /// 读失败后重试一次前的等待时间
    #[serde(default = "default_read_retry_backoff_ms")]
    pub read_retry_backoff_ms: u64,
}

impl RegistryConfig {
    pub fn read_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.read_retry_backoff_ms)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Memory,
            redis_url: None,
            read_retry_backoff_ms: default_read_retry_backoff_ms(),
        }
    }
}

fn default_read_retry_backoff_ms() -> u64 {
    50
}

fn validate_registry(config: &RegistryConfig) -> Result<(), ValidationError> {
    let has_url = config
        .redis_url
        .as_deref()
        .is_some_and(|url| !url.trim().is_empty());
    if config.backend == RegistryBackend::Redis && !has_url {
        return Err(ValidationError::new("redis_url_required"));
    }
    Ok(())
}

/// 广播器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BroadcastConfig {
    /// 单次投递的超时时间
    #[validate(range(min = 1))]
    pub delivery_timeout_ms: u64,
    /// 瞬时失败后重试前的等待时间
    pub retry_delay_ms: u64,
    /// 每个连接出站队列的容量
    #[validate(range(min = 1))]
    pub outbound_buffer: usize,
}

impl BroadcastConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_ms: 2_000,
            retry_delay_ms: 100,
            outbound_buffer: 64,
        }
    }
}

/// 在线状态协议配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// 连接未携带会话标识时加入的会话；为空则拒绝连接
    #[serde(default)]
    pub default_session: Option<String>,
}

impl PresenceConfig {
    pub fn default_session(&self) -> Option<&str> {
        self.default_session
            .as_deref()
            .map(str::trim)
            .filter(|session| !session.is_empty())
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            default_session: Some("game-x".into()),
        }
    }
}

/// 雷区配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_board"))]
pub struct BoardConfig {
    #[validate(range(min = 1))]
    pub width: u32,
    #[validate(range(min = 1))]
    pub height: u32,
    pub mines: u32,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            width: 16,
            height: 30,
            mines: 99,
        }
    }
}

fn validate_board(board: &BoardConfig) -> Result<(), ValidationError> {
    if u64::from(board.mines) > u64::from(board.width) * u64::from(board.height) {
        return Err(ValidationError::new("too_many_mines"));
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
                cors_origins: vec!["*".into()],
            },
            registry: RegistryConfig::default(),
            broadcast: BroadcastConfig::default(),
            presence: PresenceConfig::default(),
            board: BoardConfig::default(),
        }
    }
}

impl AppConfig {
    /// 按优先级加载：默认值 -> 可选文件（APP_CONFIG_FILE）-> 环境变量（APP_*）
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(Env::prefixed("APP_").split("__"));

        Self::from_figment(fig)
    }

    /// 从已组装好的 figment 提取并校验配置
    pub fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = fig.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}
