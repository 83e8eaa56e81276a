//! 连接器 JSON 配置。
//!
//! ```json
//! {
//!   "name": "Modbus Connector",
//!   "maxMessageNumberPerWorker": 10,
//!   "maxNumberOfWorkers": 100,
//!   "master": { "slaves": [ { "deviceName": "Meter", "type": "tcp", "host": "127.0.0.1", "port": 502 } ] }
//! }
//! ```

use crate::error::ConnectorError;
use domain::{DeviceConfig, Endian, TransportConfig};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// 连接器配置。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_id")]
    pub id: String,
    /// 每个转换工作者承担的队列深度
    #[serde(default = "default_max_message_number_per_worker")]
    pub max_message_number_per_worker: usize,
    #[serde(default = "default_max_number_of_workers")]
    pub max_number_of_workers: usize,
    /// 设备未配置字节序时使用
    #[serde(default)]
    pub byte_order: Endian,
    #[serde(default)]
    pub word_order: Endian,
    #[serde(default)]
    pub master: MasterConfig,
}

/// 主站配置：受管设备列表。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub slaves: Vec<DeviceConfig>,
}

impl ConnectorConfig {
    /// 解析 JSON 配置并校验。
    pub fn from_json(json: &str) -> Result<Self, ConnectorError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| ConnectorError::Config(err.to_string()))?;
        config.sanitized().validate()
    }

    /// 从文件加载配置。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|err| ConnectorError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_json(&json)
    }

    pub fn devices(&self) -> &[DeviceConfig] {
        &self.master.slaves
    }

    fn sanitized(mut self) -> Self {
        if self.max_message_number_per_worker == 0 {
            self.max_message_number_per_worker = 1;
        }
        if self.max_number_of_workers == 0 {
            self.max_number_of_workers = 1;
        }
        self
    }

    fn validate(self) -> Result<Self, ConnectorError> {
        let mut names = HashSet::new();
        for device in self.devices() {
            if device.device_name.trim().is_empty() {
                return Err(ConnectorError::Config("deviceName is empty".to_string()));
            }
            if !names.insert(device.device_name.as_str()) {
                return Err(ConnectorError::Config(format!(
                    "duplicate deviceName: {}",
                    device.device_name
                )));
            }
            if let TransportConfig::Tcp(tcp) = &device.transport {
                if tcp.tls.is_some() {
                    return Err(ConnectorError::Config(format!(
                        "tls transport is not supported: {}",
                        device.device_name
                    )));
                }
            }
        }
        Ok(self)
    }
}

fn default_name() -> String {
    format!("Modbus Connector {}", gateway_telemetry::short_id())
}

fn default_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_max_message_number_per_worker() -> usize {
    10
}

fn default_max_number_of_workers() -> usize {
    100
}
