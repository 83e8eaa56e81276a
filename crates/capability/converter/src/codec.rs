//! 寄存器 / 位 与 JSON 值之间的编解码。
//!
//! 多寄存器数值由 `wordOrder` 决定字的先后：`BIG` 时首个寄存器为高位字，
//! `LITTLE` 时首个寄存器为低位字。单个寄存器内按高字节在前解释；
//! `byteOrder` 只影响字符串在寄存器内的字节排列。

use crate::ConversionError;
use domain::Endian;
use serde_json::{Number, Value};

/// 点位数据类型（配置中的 `type`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    Bits,
    Bit,
    String,
}

impl DataType {
    pub fn parse(name: &str) -> Result<Self, ConversionError> {
        let data_type = match name.trim().to_ascii_lowercase().as_str() {
            "16int" | "int16" => Self::Int16,
            "16uint" | "uint16" => Self::Uint16,
            "32int" | "int32" => Self::Int32,
            "32uint" | "uint32" => Self::Uint32,
            "64int" | "int64" => Self::Int64,
            "64uint" | "uint64" => Self::Uint64,
            "32float" | "float32" | "float" => Self::Float32,
            "64float" | "float64" | "double" => Self::Float64,
            "bits" => Self::Bits,
            "bit" | "bool" | "boolean" => Self::Bit,
            "string" => Self::String,
            other => return Err(ConversionError::UnsupportedType(other.to_string())),
        };
        Ok(data_type)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int16 | Self::Uint16 | Self::Int32 | Self::Uint32 | Self::Int64 | Self::Uint64
        )
    }
}

pub(crate) fn decode_bits(bits: &[bool], data_type: DataType) -> Result<Value, ConversionError> {
    if bits.is_empty() {
        return Err(ConversionError::MissingData("empty bit response".to_string()));
    }
    let value = match data_type {
        DataType::Bits => Value::Array(bits.iter().copied().map(Value::Bool).collect()),
        _ => Value::Bool(bits[0]),
    };
    Ok(value)
}

pub(crate) fn decode_registers(
    registers: &[u16],
    data_type: DataType,
    byte_order: Endian,
    word_order: Endian,
) -> Result<Value, ConversionError> {
    if registers.is_empty() {
        return Err(ConversionError::MissingData("empty register response".to_string()));
    }
    let value = match data_type {
        DataType::Int16 => Value::from(combine(registers, 1, word_order)? as u16 as i16),
        DataType::Uint16 => Value::from(combine(registers, 1, word_order)? as u16),
        DataType::Int32 => Value::from(combine(registers, 2, word_order)? as u32 as i32),
        DataType::Uint32 => Value::from(combine(registers, 2, word_order)? as u32),
        DataType::Int64 => Value::from(combine(registers, 4, word_order)? as i64),
        DataType::Uint64 => Value::from(combine(registers, 4, word_order)?),
        DataType::Float32 => {
            float_value(f32::from_bits(combine(registers, 2, word_order)? as u32) as f64)?
        }
        DataType::Float64 => float_value(f64::from_bits(combine(registers, 4, word_order)?))?,
        DataType::Bits => Value::Array(
            registers
                .iter()
                .flat_map(|register| (0..16).map(move |bit| register & (1 << bit) != 0))
                .map(Value::Bool)
                .collect(),
        ),
        DataType::Bit => Value::Bool(registers[0] & 1 != 0),
        DataType::String => decode_string(registers, byte_order)?,
    };
    Ok(value)
}

pub(crate) fn encode_registers(
    value: &Value,
    data_type: DataType,
    byte_order: Endian,
    word_order: Endian,
) -> Result<Vec<u16>, ConversionError> {
    let registers = match data_type {
        DataType::Int16 => vec![narrow::<i16>(integer(value)?)? as u16],
        DataType::Uint16 => vec![narrow::<u16>(integer(value)?)?],
        DataType::Int32 => split(narrow::<i32>(integer(value)?)? as u32 as u64, 2, word_order),
        DataType::Uint32 => split(narrow::<u32>(integer(value)?)? as u64, 2, word_order),
        DataType::Int64 => split(narrow::<i64>(integer(value)?)? as u64, 4, word_order),
        DataType::Uint64 => split(narrow::<u64>(integer(value)?)?, 4, word_order),
        DataType::Float32 => split((number(value)? as f32).to_bits() as u64, 2, word_order),
        DataType::Float64 => split(number(value)?.to_bits(), 4, word_order),
        DataType::Bit => vec![u16::from(truthy(value)?)],
        DataType::Bits => encode_bits(value)?
            .chunks(16)
            .map(|chunk| {
                chunk
                    .iter()
                    .enumerate()
                    .fold(0u16, |acc, (bit, on)| if *on { acc | (1 << bit) } else { acc })
            })
            .collect(),
        DataType::String => encode_string(value, byte_order)?,
    };
    Ok(registers)
}

pub(crate) fn encode_bits(value: &Value) -> Result<Vec<bool>, ConversionError> {
    match value {
        Value::Array(items) => items.iter().map(truthy).collect(),
        other => Ok(vec![truthy(other)?]),
    }
}

/// JSON 值转为浮点数；字符串按数字解析。
pub(crate) fn number(value: &Value) -> Result<f64, ConversionError> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| ConversionError::InvalidValue(number.to_string())),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| ConversionError::InvalidValue(format!("not a number: {}", text))),
        Value::Bool(flag) => Ok(if *flag { 1.0 } else { 0.0 }),
        other => Err(ConversionError::InvalidValue(format!("not a number: {}", other))),
    }
}

pub(crate) fn float_value(value: f64) -> Result<Value, ConversionError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ConversionError::InvalidValue(format!("non-finite value {}", value)))
}

fn integer(value: &Value) -> Result<i128, ConversionError> {
    if let Value::Number(number) = value {
        if let Some(int) = number.as_i64() {
            return Ok(int as i128);
        }
        if let Some(uint) = number.as_u64() {
            return Ok(uint as i128);
        }
    }
    if let Value::String(text) = value {
        if let Ok(int) = text.trim().parse::<i128>() {
            return Ok(int);
        }
    }
    let float = number(value)?;
    if !float.is_finite() {
        return Err(ConversionError::InvalidValue(format!("non-finite value {}", float)));
    }
    Ok(float.round() as i128)
}

fn narrow<T: TryFrom<i128>>(value: i128) -> Result<T, ConversionError> {
    T::try_from(value).map_err(|_| {
        ConversionError::InvalidValue(format!(
            "{} out of range for {}",
            value,
            std::any::type_name::<T>()
        ))
    })
}

fn truthy(value: &Value) -> Result<bool, ConversionError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => Ok(number.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "1" => Ok(true),
            "false" | "off" | "0" => Ok(false),
            other => Err(ConversionError::InvalidValue(format!("not a bit: {}", other))),
        },
        other => Err(ConversionError::InvalidValue(format!("not a bit: {}", other))),
    }
}

/// 取前 `words` 个寄存器，按字序组合为高位在前的整数。
fn combine(registers: &[u16], words: usize, word_order: Endian) -> Result<u64, ConversionError> {
    if registers.len() < words {
        return Err(ConversionError::MissingData(format!(
            "need {} registers, got {}",
            words,
            registers.len()
        )));
    }
    let take = &registers[..words];
    let fold = |acc: u64, word: &u16| (acc << 16) | u64::from(*word);
    let raw = match word_order {
        Endian::Big => take.iter().fold(0, fold),
        Endian::Little => take.iter().rev().fold(0, fold),
    };
    Ok(raw)
}

fn split(raw: u64, words: usize, word_order: Endian) -> Vec<u16> {
    let mut registers: Vec<u16> = (0..words)
        .rev()
        .map(|index| (raw >> (index * 16)) as u16)
        .collect();
    if word_order == Endian::Little {
        registers.reverse();
    }
    registers
}

fn decode_string(registers: &[u16], byte_order: Endian) -> Result<Value, ConversionError> {
    let bytes: Vec<u8> = registers
        .iter()
        .flat_map(|register| match byte_order {
            Endian::Big => register.to_be_bytes(),
            Endian::Little => register.to_le_bytes(),
        })
        .collect();
    let text = String::from_utf8(bytes)
        .map_err(|err| ConversionError::InvalidValue(err.to_string()))?;
    Ok(Value::String(text.trim_end_matches('\0').to_string()))
}

fn encode_string(value: &Value, byte_order: Endian) -> Result<Vec<u16>, ConversionError> {
    let text = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    Ok(text
        .as_bytes()
        .chunks(2)
        .map(|chunk| {
            let pair = [chunk[0], chunk.get(1).copied().unwrap_or(0)];
            match byte_order {
                Endian::Big => u16::from_be_bytes(pair),
                Endian::Little => u16::from_le_bytes(pair),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn word_order_controls_word_significance() {
        let registers = [0x0001, 0x0002];
        assert_eq!(
            decode_registers(&registers, DataType::Uint32, Endian::Big, Endian::Big).unwrap(),
            json!(0x0001_0002u32)
        );
        assert_eq!(
            decode_registers(&registers, DataType::Uint32, Endian::Big, Endian::Little).unwrap(),
            json!(0x0002_0001u32)
        );
    }

    #[test]
    fn signed_single_register() {
        assert_eq!(
            decode_registers(&[0xFFFE], DataType::Int16, Endian::Little, Endian::Little).unwrap(),
            json!(-2)
        );
    }

    #[test]
    fn short_response_is_missing_data() {
        let err = decode_registers(&[1], DataType::Float64, Endian::Big, Endian::Big)
            .expect_err("needs four registers");
        assert!(matches!(err, ConversionError::MissingData(_)));
    }

    #[test]
    fn float_encoding_follows_word_order() {
        let big = encode_registers(&json!(1.5), DataType::Float32, Endian::Big, Endian::Big).unwrap();
        assert_eq!(big, vec![0x3FC0, 0x0000]);
        let little =
            encode_registers(&json!("1.5"), DataType::Float32, Endian::Big, Endian::Little).unwrap();
        assert_eq!(little, vec![0x0000, 0x3FC0]);
    }

    #[test]
    fn out_of_range_integer_is_rejected() {
        let err = encode_registers(&json!(70000), DataType::Uint16, Endian::Big, Endian::Big)
            .expect_err("too large");
        assert!(matches!(err, ConversionError::InvalidValue(_)));
    }

    #[test]
    fn strings_respect_byte_order() {
        let registers = encode_registers(&json!("abc"), DataType::String, Endian::Big, Endian::Big)
            .unwrap();
        assert_eq!(registers, vec![0x6162, 0x6300]);
        assert_eq!(
            decode_registers(&registers, DataType::String, Endian::Big, Endian::Big).unwrap(),
            json!("abc")
        );
    }

    #[test]
    fn unknown_type_name() {
        assert!(matches!(
            DataType::parse("24int"),
            Err(ConversionError::UnsupportedType(_))
        ));
        assert_eq!(DataType::parse("32FLOAT").unwrap(), DataType::Float32);
    }
}
