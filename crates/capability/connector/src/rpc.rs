//! RPC 分发：命令解析、下行转换、协议调用与回复构造。

use crate::context::ConnectorContext;
use crate::device::DeviceRuntime;
use crate::engine::build_request;
use crate::error::ConnectorError;
use domain::{
    DeviceConfig, DeviceResponses, Endian, METHOD_NOT_FOUND, Operation, PointConfig, RawResponse,
    ResponseEntry, RpcContent, RpcReply, Section,
};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

/// 参数串中需要转换为整数的键。
const INTEGER_KEYS: [&str; 3] = ["functionCode", "objectsCount", "address"];

/// 解析 `key=value;key=value` 参数串。
///
/// 不是恰好一个 `=` 或键值为空的片段被跳过；整数键转换失败同样跳过。
pub fn parse_param_string(params: &str) -> Map<String, Value> {
    let mut parsed = Map::new();
    for entry in params.split(';') {
        let mut parts = entry.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() || value.is_empty() {
            continue;
        }
        if INTEGER_KEYS.contains(&key) {
            match value.parse::<i64>() {
                Ok(number) => {
                    parsed.insert(key.to_string(), Value::from(number));
                }
                Err(_) => {
                    debug!(target: "gateway.rpc", key = %key, value = %value, "param_skipped");
                }
            }
        } else {
            parsed.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    parsed
}

/// 识别连接器前缀方法（如 `modbus_set`）。
///
/// 前缀与连接器类型一致时返回 `(设备名, 方法, 剩余参数)`：设备名取参数第一个空格
/// 分隔片段中最后一个 `=` 之后的部分，剩余参数为第一个空格之后的内容。
pub fn split_connector_method(
    method: &str,
    params: &Value,
    connector_type: &str,
) -> Option<(String, String, Value)> {
    let mut parts = method.split('_');
    let (Some(prefix), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return None;
    };
    if prefix != connector_type {
        return None;
    }
    let Value::String(text) = params else {
        return None;
    };
    let (head, rest) = text.split_once(' ').unwrap_or((text.as_str(), ""));
    let device = head.rsplit('=').next().unwrap_or(head).to_string();
    Some((device, name.to_string(), Value::String(rest.to_string())))
}

/// 把 RPC 参数（对象或参数串）解析为一次性命令配置。
pub fn command_from_params(params: &Value) -> Result<PointConfig, ConnectorError> {
    let map = match params {
        Value::String(text) => parse_param_string(text),
        Value::Object(map) => map.clone(),
        other => {
            return Err(ConnectorError::Config(format!(
                "rpc params must be an object or key=value string, got {}",
                other
            )));
        }
    };
    serde_json::from_value(Value::Object(map))
        .map_err(|err| ConnectorError::Config(err.to_string()))
}

/// 为设备解析命令：保留方法 `get`/`set` 从参数构造命令，其余按 tag 查命令表。
///
/// 失败时返回回复文本（方法不存在或参数非法）。
pub fn resolve_command(
    device: &DeviceConfig,
    method: &str,
    params: &Value,
) -> Result<PointConfig, String> {
    if method == "get" || method == "set" {
        return command_from_params(params).map_err(|err| err.to_string());
    }
    device
        .find_command(method)
        .cloned()
        .ok_or_else(|| METHOD_NOT_FOUND.to_string())
}

pub struct RpcDispatcher;

impl RpcDispatcher {
    /// 在设备上执行一条命令并构造回复；任何失败都转为失败回复。
    pub async fn process(
        device: &mut DeviceRuntime,
        ctx: &ConnectorContext,
        method: &str,
        command: PointConfig,
        params: Value,
        id: Option<u64>,
    ) -> RpcReply {
        let name = device.name().to_string();
        match Self::dispatch(device, ctx, method, command, params).await {
            Ok(Some(content)) => {
                debug!(target: "gateway.rpc", device = %name, method = %method, "rpc_read_completed");
                RpcReply::success(name, id, content)
            }
            Ok(None) => {
                debug!(target: "gateway.rpc", device = %name, method = %method, "rpc_write_completed");
                RpcReply::written(name, id)
            }
            Err(err) => {
                warn!(target: "gateway.rpc", device = %name, method = %method, error = %err, "rpc_failed");
                RpcReply::failure(name, id, method, err.to_string())
            }
        }
    }

    /// 读类返回 `Some(数据点对象)`，写类确认返回 `None`。
    async fn dispatch(
        device: &mut DeviceRuntime,
        ctx: &ConnectorContext,
        method: &str,
        mut command: PointConfig,
        params: Value,
    ) -> Result<Option<Value>, ConnectorError> {
        let _bus = device.bus_guard(ctx).await?;
        command.byte_order = Some(device.config().byte_order.unwrap_or(Endian::Little));
        command.word_order = Some(device.config().word_order.unwrap_or(Endian::Little));

        let operation = Operation::from_code(command.function_code).ok_or_else(|| {
            ConnectorError::Config(format!("unknown function code {}", command.function_code))
        })?;
        let payload = if operation.is_write() {
            let content = RpcContent {
                method: method.to_string(),
                params,
            };
            let payload = ctx
                .downlink
                .convert(&command, &content)
                .map_err(|err| ConnectorError::Conversion(err.to_string()))?;
            Some(payload)
        } else {
            None
        };

        let request = build_request(&command, payload)?;
        let response = device.execute_with_retry(ctx, &request).await?;
        if !response.is_read() {
            return Ok(None);
        }
        Self::convert_read(device, ctx, method, command, response).map(Some)
    }

    fn convert_read(
        device: &DeviceRuntime,
        ctx: &ConnectorContext,
        method: &str,
        command: PointConfig,
        response: RawResponse,
    ) -> Result<Value, ConnectorError> {
        let mut responses = DeviceResponses::default();
        responses.insert(
            Section::Rpc,
            method,
            ResponseEntry {
                device: device.name().to_string(),
                request: command,
                response,
            },
        );
        let converted = ctx
            .uplink
            .convert(device.converter_config(), &responses)
            .map_err(|err| {
                error!(target: "gateway.rpc", device = %device.name(), method = %method, error = %err, "rpc_conversion_failed");
                ConnectorError::Conversion(err.to_string())
            })?;
        Ok(Value::Object(
            converted.map(|data| data.to_object()).unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn param_string_coerces_integer_keys() {
        let parsed = parse_param_string("address=10;objectsCount=2");
        assert_eq!(Value::Object(parsed), json!({"address": 10, "objectsCount": 2}));
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let parsed = parse_param_string("type=16int;broken;a=b=c;=5;address=x;functionCode=3;value=");
        assert_eq!(Value::Object(parsed), json!({"type": "16int", "functionCode": 3}));
    }

    #[test]
    fn connector_prefixed_method_names_the_device() {
        let params = json!("deviceName=Meter type=16int;functionCode=3;address=1");
        let (device, method, rest) =
            split_connector_method("modbus_get", &params, "modbus").unwrap();
        assert_eq!(device, "Meter");
        assert_eq!(method, "get");
        assert_eq!(rest, json!("type=16int;functionCode=3;address=1"));

        assert!(split_connector_method("opcua_get", &params, "modbus").is_none());
        assert!(split_connector_method("setValue", &params, "modbus").is_none());
        assert!(split_connector_method("modbus_set_value", &params, "modbus").is_none());
    }

    #[test]
    fn commands_resolve_from_params_or_table() {
        let device: DeviceConfig = serde_json::from_value(json!({
            "deviceName": "Meter", "type": "tcp", "host": "127.0.0.1",
            "rpc": {"setTemp": {"type": "16int", "functionCode": 6, "address": 4}}
        }))
        .unwrap();

        let named = resolve_command(&device, "setTemp", &Value::Null).unwrap();
        assert_eq!((named.tag.as_str(), named.address), ("setTemp", 4));

        let adhoc = resolve_command(
            &device,
            "set",
            &json!("type=16int;functionCode=6;address=5;value=1234"),
        )
        .unwrap();
        assert_eq!(adhoc.function_code, 6);
        assert_eq!(adhoc.address, 5);
        assert_eq!(adhoc.value, Some(json!("1234")));

        assert_eq!(
            resolve_command(&device, "reboot", &Value::Null).unwrap_err(),
            METHOD_NOT_FOUND
        );
    }
}
