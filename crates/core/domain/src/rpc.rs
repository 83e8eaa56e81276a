use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// 设备不存在时的回复文本。
pub const DEVICE_NOT_FOUND: &str = "DEVICE CONNECTOR FOR DEVICE NOT FOUND!";

/// 命令不存在时的回复文本。
pub const METHOD_NOT_FOUND: &str = "METHOD NOT FOUND!";

/// 入站 RPC 请求；`device` 缺省表示连接器级广播。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub device: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, alias = "requestId")]
    pub id: Option<u64>,
}

/// 下行转换使用的请求内容。
#[derive(Debug, Clone, PartialEq)]
pub struct RpcContent {
    pub method: String,
    pub params: Value,
}

/// RPC 回复（推送到回复通道或在广播结果中内联返回）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReply {
    pub device: String,
    pub id: Option<u64>,
    pub content: Value,
    pub success: bool,
}

impl RpcReply {
    pub fn success(device: impl Into<String>, id: Option<u64>, content: Value) -> Self {
        Self {
            device: device.into(),
            id,
            content,
            success: true,
        }
    }

    /// 失败回复：`{method: message}`。
    pub fn failure(
        device: impl Into<String>,
        id: Option<u64>,
        method: &str,
        message: impl Into<String>,
    ) -> Self {
        let mut content = Map::new();
        content.insert(method.to_string(), Value::String(message.into()));
        Self {
            device: device.into(),
            id,
            content: Value::Object(content),
            success: false,
        }
    }

    /// 写操作确认：`{success: true}`。
    pub fn written(device: impl Into<String>, id: Option<u64>) -> Self {
        Self::success(device, id, json!({ "success": true }))
    }
}

/// 服务端属性更新推送。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    pub device: String,
    pub data: Map<String, Value>,
}
