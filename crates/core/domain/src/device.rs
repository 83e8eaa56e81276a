//! 设备、传输与点位配置。
//!
//! JSON 键名沿用现场配置中的 camelCase 写法，例如：
//!
//! ```json
//! {
//!   "deviceName": "Temp Sensor", "unitId": 1,
//!   "type": "tcp", "host": "127.0.0.1", "port": 5021, "method": "socket",
//!   "byteOrder": "BIG", "pollPeriod": 5000,
//!   "timeseries": [{ "tag": "temp", "type": "16int", "functionCode": 3, "address": 0, "objectsCount": 1 }],
//!   "rpc": { "setTemp": { "type": "16int", "functionCode": 6, "address": 0, "objectsCount": 1 } }
//! }
//! ```

use crate::function::WritePayload;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// 字节序 / 字序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Endian {
    #[serde(alias = "big")]
    Big,
    #[default]
    #[serde(alias = "little")]
    Little,
}

/// Modbus 帧格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framer {
    Socket,
    Rtu,
    Ascii,
}

impl fmt::Display for Framer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Socket => "socket",
            Self::Rtu => "rtu",
            Self::Ascii => "ascii",
        };
        f.write_str(name)
    }
}

/// TCP 传输配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpTransport {
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
    #[serde(default = "default_tcp_framer")]
    pub method: Framer,
    /// 单次操作超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// TLS 参数块；当前传输层不支持，配置加载时拒绝
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<Value>,
}

/// 串口传输配置。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialTransport {
    /// 串口设备路径，如 `/dev/ttyUSB0`
    pub port: String,
    #[serde(default = "default_serial_framer")]
    pub method: Framer,
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_bytesize")]
    pub bytesize: u8,
    /// `N` / `E` / `O`
    #[serde(default = "default_parity")]
    pub parity: String,
    #[serde(default = "default_stopbits")]
    pub stopbits: u8,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

/// 设备所在的物理传输。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Tcp(TcpTransport),
    Serial(SerialTransport),
}

impl TransportConfig {
    /// 物理连接键：同一键共享同一个协议客户端实例。
    pub fn connection_key(&self) -> ConnectionKey {
        match self {
            Self::Tcp(tcp) => ConnectionKey::Tcp {
                host: tcp.host.clone(),
                port: tcp.port,
                method: tcp.method,
            },
            Self::Serial(serial) => ConnectionKey::Serial {
                port: serial.port.clone(),
                method: serial.method,
            },
        }
    }

    pub fn timeout_secs(&self) -> u64 {
        match self {
            Self::Tcp(tcp) => tcp.timeout,
            Self::Serial(serial) => serial.timeout,
        }
    }
}

/// 共享物理连接的标识。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionKey {
    Tcp {
        host: String,
        port: u16,
        method: Framer,
    },
    Serial {
        port: String,
        method: Framer,
    },
}

impl ConnectionKey {
    /// 串行总线同一时刻只允许一个在途操作。
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Serial { .. })
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port, method } => write!(f, "tcp://{}:{} ({})", host, port, method),
            Self::Serial { port, method } => write!(f, "serial://{} ({})", port, method),
        }
    }
}

/// 点位 / 命令配置。
///
/// 轮询点位与 RPC 命令共用同一结构；未识别的键保留在 `extra` 中供转换器使用。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointConfig {
    #[serde(default)]
    pub tag: String,
    #[serde(rename = "type", default = "default_data_type")]
    pub data_type: String,
    #[serde(default)]
    pub function_code: u8,
    #[serde(default)]
    pub address: u16,
    #[serde(
        default = "default_objects_count",
        alias = "registersCount",
        alias = "registerCount"
    )]
    pub objects_count: u16,
    /// 写类点位的固定载荷
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<WritePayload>,
    /// 命令的写入值（`set` 请求或配置中给出）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_order: Option<Endian>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_order: Option<Endian>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PointConfig {
    /// 读取 `extra` 中的数值参数（如 `divider`、`multiplier`）。
    pub fn extra_f64(&self, key: &str) -> Option<f64> {
        match self.extra.get(key)? {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

/// 设备配置段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Attributes,
    Timeseries,
    AttributeUpdates,
    Rpc,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attributes => "attributes",
            Self::Timeseries => "timeseries",
            Self::AttributeUpdates => "attributeUpdates",
            Self::Rpc => "rpc",
        }
    }
}

/// 设备配置（加载后不可变）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub device_name: String,
    #[serde(default = "default_device_type")]
    pub device_type: String,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub byte_order: Option<Endian>,
    #[serde(default)]
    pub word_order: Option<Endian>,
    /// 轮询周期（毫秒）
    #[serde(default = "default_poll_period")]
    pub poll_period: u64,
    #[serde(default)]
    pub connect_attempt_count: Option<u32>,
    #[serde(default)]
    pub connect_attempt_time_ms: Option<u64>,
    #[serde(default)]
    pub wait_after_failed_attempts_ms: Option<u64>,
    #[serde(default)]
    pub attributes: Vec<PointConfig>,
    #[serde(default)]
    pub timeseries: Vec<PointConfig>,
    #[serde(default)]
    pub attribute_updates: Vec<PointConfig>,
    /// 配置中可写成 map（tag → 命令）或 list，加载时统一为有序列表
    #[serde(default, deserialize_with = "deserialize_command_table")]
    pub rpc: Vec<PointConfig>,
}

impl DeviceConfig {
    pub fn connection_key(&self) -> ConnectionKey {
        self.transport.connection_key()
    }

    /// 需要轮询的段（命令段不轮询）。
    pub fn polled_sections(&self) -> [(Section, &[PointConfig]); 2] {
        [
            (Section::Attributes, self.attributes.as_slice()),
            (Section::Timeseries, self.timeseries.as_slice()),
        ]
    }

    pub fn find_command(&self, tag: &str) -> Option<&PointConfig> {
        self.rpc.iter().find(|command| command.tag == tag)
    }
}

fn deserialize_command_table<'de, D>(deserializer: D) -> Result<Vec<PointConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CommandTable {
        List(Vec<PointConfig>),
        Map(BTreeMap<String, PointConfig>),
    }

    let commands = match Option::<CommandTable>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(CommandTable::List(commands)) => commands,
        Some(CommandTable::Map(commands)) => commands
            .into_iter()
            .map(|(tag, mut command)| {
                if command.tag.is_empty() {
                    command.tag = tag;
                }
                command
            })
            .collect(),
    };
    Ok(commands)
}

fn default_tcp_port() -> u16 {
    502
}

fn default_tcp_framer() -> Framer {
    Framer::Socket
}

fn default_serial_framer() -> Framer {
    Framer::Rtu
}

fn default_timeout() -> u64 {
    35
}

fn default_baudrate() -> u32 {
    19200
}

fn default_bytesize() -> u8 {
    8
}

fn default_parity() -> String {
    "N".to_string()
}

fn default_stopbits() -> u8 {
    1
}

fn default_data_type() -> String {
    "16int".to_string()
}

fn default_objects_count() -> u16 {
    1
}

fn default_device_type() -> String {
    "default".to_string()
}

fn default_unit_id() -> u8 {
    1
}

fn default_poll_period() -> u64 {
    5000
}
