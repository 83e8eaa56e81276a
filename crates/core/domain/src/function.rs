//! Modbus 功能码与协议操作。
//!
//! 功能码在加载/分发时解析为 [`Operation`]，调用方显式 match，
//! 不使用以数字为键的回调表。

use serde::{Deserialize, Serialize};

/// 读操作的对象类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadKind {
    /// 线圈 (0x01)
    Coils,
    /// 离散输入 (0x02)
    DiscreteInputs,
    /// 保持寄存器 (0x03)
    HoldingRegisters,
    /// 输入寄存器 (0x04)
    InputRegisters,
}

/// 写操作的对象类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteKind {
    Coil,
    Register,
}

/// 功能码解析后的操作类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read(ReadKind),
    WriteSingle(WriteKind),
    WriteMultiple(WriteKind),
}

impl Operation {
    /// 由功能码解析操作；未知功能码返回 `None`。
    pub fn from_code(code: u8) -> Option<Self> {
        let operation = match code {
            1 => Self::Read(ReadKind::Coils),
            2 => Self::Read(ReadKind::DiscreteInputs),
            3 => Self::Read(ReadKind::HoldingRegisters),
            4 => Self::Read(ReadKind::InputRegisters),
            5 => Self::WriteSingle(WriteKind::Coil),
            6 => Self::WriteSingle(WriteKind::Register),
            15 => Self::WriteMultiple(WriteKind::Coil),
            16 => Self::WriteMultiple(WriteKind::Register),
            _ => return None,
        };
        Some(operation)
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Read(ReadKind::Coils) => 1,
            Self::Read(ReadKind::DiscreteInputs) => 2,
            Self::Read(ReadKind::HoldingRegisters) => 3,
            Self::Read(ReadKind::InputRegisters) => 4,
            Self::WriteSingle(WriteKind::Coil) => 5,
            Self::WriteSingle(WriteKind::Register) => 6,
            Self::WriteMultiple(WriteKind::Coil) => 15,
            Self::WriteMultiple(WriteKind::Register) => 16,
        }
    }

    pub fn is_read(self) -> bool {
        matches!(self, Self::Read(_))
    }

    pub fn is_write(self) -> bool {
        !self.is_read()
    }
}

/// 写操作载荷（线圈值或寄存器值）。
///
/// 配置中以 JSON 数组出现：`[true, false]` 或 `[1234, 5]`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WritePayload {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
}

impl WritePayload {
    pub fn len(&self) -> usize {
        match self {
            Self::Bits(bits) => bits.len(),
            Self::Registers(registers) => registers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 一次协议操作请求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolRequest {
    pub operation: Operation,
    pub address: u16,
    /// 读操作的对象数量；写操作等于载荷长度
    pub count: u16,
    pub payload: Option<WritePayload>,
}

impl ProtocolRequest {
    pub fn read(kind: ReadKind, address: u16, count: u16) -> Self {
        Self {
            operation: Operation::Read(kind),
            address,
            count,
            payload: None,
        }
    }

    pub fn write(operation: Operation, address: u16, payload: WritePayload) -> Self {
        Self {
            operation,
            address,
            count: payload.len() as u16,
            payload: Some(payload),
        }
    }
}

/// 协议客户端返回的原始响应。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawResponse {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
    /// 写操作确认
    Written,
}

impl RawResponse {
    pub fn is_read(&self) -> bool {
        !matches!(self, Self::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_codes_resolve_to_operations() {
        for code in [1u8, 2, 3, 4, 5, 6, 15, 16] {
            let operation = Operation::from_code(code).expect("known code");
            assert_eq!(operation.code(), code);
        }
        assert_eq!(Operation::from_code(7), None);
        assert!(Operation::from_code(3).unwrap().is_read());
        assert!(Operation::from_code(16).unwrap().is_write());
    }

    #[test]
    fn write_payload_from_json() {
        let bits: WritePayload = serde_json::from_str("[true, false]").unwrap();
        assert_eq!(bits, WritePayload::Bits(vec![true, false]));
        let registers: WritePayload = serde_json::from_str("[1234, 5]").unwrap();
        assert_eq!(registers, WritePayload::Registers(vec![1234, 5]));
    }
}
