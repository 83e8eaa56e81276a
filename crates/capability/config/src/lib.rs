//! 进程运行配置加载。

use std::env;
use std::path::PathBuf;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 进程运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 连接器 JSON 配置文件路径
    pub connector_config: PathBuf,
    /// RPC 方法前缀匹配使用的连接器类型
    pub connector_type: String,
    /// 是否启用内置轮询调度器
    pub scheduler_enabled: bool,
    /// 工作者扩缩容检查间隔（毫秒）
    pub housekeeping_interval_ms: u64,
    /// 关闭时等待后台任务退出的上限（毫秒）
    pub shutdown_timeout_ms: u64,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let connector_config = read_optional("GATEWAY_CONNECTOR_CONFIG")
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::Missing("GATEWAY_CONNECTOR_CONFIG".to_string()))?;
        let connector_type =
            read_optional("GATEWAY_CONNECTOR_TYPE").unwrap_or_else(|| "modbus".to_string());
        let scheduler_enabled = read_bool_with_default("GATEWAY_SCHEDULER", true);
        let housekeeping_interval_ms =
            read_u64_with_default("GATEWAY_HOUSEKEEPING_INTERVAL_MS", 10)?;
        if housekeeping_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "GATEWAY_HOUSEKEEPING_INTERVAL_MS".to_string(),
                "0".to_string(),
            ));
        }
        let shutdown_timeout_ms = read_u64_with_default("GATEWAY_SHUTDOWN_TIMEOUT_MS", 5000)?;

        Ok(Self {
            connector_config,
            connector_type,
            scheduler_enabled,
            housekeeping_interval_ms,
            shutdown_timeout_ms,
        })
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
