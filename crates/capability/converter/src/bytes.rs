use crate::codec::{self, DataType};
use crate::{ConversionError, DownlinkConverter, UplinkConverter};
use domain::{
    ConvertedData, ConverterConfig, Datapoint, DeviceResponses, Operation, PointConfig, RawResponse,
    ResponseEntry, RpcContent, WriteKind, WritePayload,
};
use serde_json::Value;

/// 按点位 `type` 解码寄存器 / 位响应的上行转换器。
///
/// 属性段 → `attributes`；遥测段与 RPC 读结果 → `telemetry`。
/// 点位上的 `divider` / `multiplier` 在解码后应用。
#[derive(Debug, Clone, Default)]
pub struct BytesUplinkConverter;

impl BytesUplinkConverter {
    pub fn new() -> Self {
        Self
    }

    fn decode(
        &self,
        config: &ConverterConfig,
        entry: &ResponseEntry,
    ) -> Result<Option<Value>, ConversionError> {
        let point = &entry.request;
        let data_type = DataType::parse(&point.data_type)?;
        let byte_order = point.byte_order.unwrap_or(config.byte_order);
        let word_order = point.word_order.unwrap_or(config.word_order);

        let value = match &entry.response {
            RawResponse::Written => return Ok(None),
            RawResponse::Bits(bits) => codec::decode_bits(bits, data_type)?,
            RawResponse::Registers(registers) => {
                codec::decode_registers(registers, data_type, byte_order, word_order)?
            }
        };
        scale(value, point).map(Some)
    }
}

impl UplinkConverter for BytesUplinkConverter {
    fn convert(
        &self,
        config: &ConverterConfig,
        responses: &DeviceResponses,
    ) -> Result<Option<ConvertedData>, ConversionError> {
        let mut data = ConvertedData::new(&config.device_name, &config.device_type);

        for (tag, entry) in &responses.attributes {
            if let Some(value) = self.decode(config, entry)? {
                data.attributes.push(Datapoint::new(tag, value));
            }
        }
        for (tag, entry) in responses.timeseries.iter().chain(responses.rpc.iter()) {
            if let Some(value) = self.decode(config, entry)? {
                data.telemetry.push(Datapoint::new(tag, value));
            }
        }
        Ok(Some(data))
    }
}

/// 把写入值编码为线圈或寄存器载荷的下行转换器。
///
/// 写入值来源依次为：命令的固定 `payload`、命令的 `value`、请求 `params`
/// （对象取 `value` 键，标量或数组直接使用）。
#[derive(Debug, Clone, Default)]
pub struct BytesDownlinkConverter;

impl BytesDownlinkConverter {
    pub fn new() -> Self {
        Self
    }
}

impl DownlinkConverter for BytesDownlinkConverter {
    fn convert(
        &self,
        command: &PointConfig,
        content: &RpcContent,
    ) -> Result<WritePayload, ConversionError> {
        if let Some(payload) = &command.payload {
            return Ok(payload.clone());
        }
        let value = command
            .value
            .clone()
            .or_else(|| value_from_params(&content.params))
            .ok_or_else(|| {
                ConversionError::MissingData(format!("no value to write for {}", content.method))
            })?;

        let operation = Operation::from_code(command.function_code).ok_or_else(|| {
            ConversionError::UnsupportedType(format!("function code {}", command.function_code))
        })?;
        let data_type = DataType::parse(&command.data_type)?;
        let byte_order = command.byte_order.unwrap_or_default();
        let word_order = command.word_order.unwrap_or_default();

        let payload = match operation {
            Operation::WriteSingle(WriteKind::Coil) => {
                let bits = codec::encode_bits(&value)?;
                WritePayload::Bits(bits.into_iter().take(1).collect())
            }
            Operation::WriteMultiple(WriteKind::Coil) => {
                WritePayload::Bits(codec::encode_bits(&value)?)
            }
            Operation::WriteSingle(WriteKind::Register) => {
                let value = unscale(value, command, data_type)?;
                let registers =
                    codec::encode_registers(&value, data_type, byte_order, word_order)?;
                if registers.len() != 1 {
                    return Err(ConversionError::InvalidValue(format!(
                        "function code 6 writes one register, {} encodes to {}",
                        command.data_type,
                        registers.len()
                    )));
                }
                WritePayload::Registers(registers)
            }
            Operation::WriteMultiple(WriteKind::Register) => {
                let value = unscale(value, command, data_type)?;
                WritePayload::Registers(codec::encode_registers(
                    &value, data_type, byte_order, word_order,
                )?)
            }
            Operation::Read(_) => {
                return Err(ConversionError::UnsupportedType(format!(
                    "function code {} is not a write",
                    command.function_code
                )));
            }
        };
        if payload.is_empty() {
            return Err(ConversionError::MissingData(format!(
                "empty payload for {}",
                content.method
            )));
        }
        Ok(payload)
    }
}

fn value_from_params(params: &Value) -> Option<Value> {
    match params {
        Value::Null => None,
        Value::Object(map) => map.get("value").cloned(),
        other => Some(other.clone()),
    }
}

fn scale(value: Value, point: &PointConfig) -> Result<Value, ConversionError> {
    let divider = point.extra_f64("divider");
    let multiplier = point.extra_f64("multiplier");
    if (divider.is_none() && multiplier.is_none()) || !value.is_number() {
        return Ok(value);
    }
    let mut number = codec::number(&value)?;
    if let Some(divider) = divider {
        if divider == 0.0 {
            return Err(ConversionError::InvalidValue("divider is zero".to_string()));
        }
        number /= divider;
    }
    if let Some(multiplier) = multiplier {
        number *= multiplier;
    }
    codec::float_value(number)
}

/// `scale` 的逆运算，整数类型在编码时取整。
fn unscale(value: Value, point: &PointConfig, data_type: DataType) -> Result<Value, ConversionError> {
    let divider = point.extra_f64("divider");
    let multiplier = point.extra_f64("multiplier");
    if divider.is_none() && multiplier.is_none() {
        return Ok(value);
    }
    if !(data_type.is_integer() || matches!(data_type, DataType::Float32 | DataType::Float64)) {
        return Ok(value);
    }
    let mut number = codec::number(&value)?;
    if let Some(divider) = divider {
        number *= divider;
    }
    if let Some(multiplier) = multiplier {
        if multiplier == 0.0 {
            return Err(ConversionError::InvalidValue("multiplier is zero".to_string()));
        }
        number /= multiplier;
    }
    codec::float_value(number)
}
