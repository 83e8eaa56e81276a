//! # 数据转换能力模块
//!
//! - 上行：一轮轮询（或一次 RPC 读）收集的原始响应 → 规范化数据点
//! - 下行：命令配置 + RPC 请求内容 → 写入载荷
//!
//! 连接器只依赖 [`UplinkConverter`] / [`DownlinkConverter`] 两个 trait，
//! 随附的 [`BytesUplinkConverter`] / [`BytesDownlinkConverter`] 覆盖常用数据类型。

mod bytes;
mod codec;

pub use bytes::{BytesDownlinkConverter, BytesUplinkConverter};
pub use codec::DataType;

use domain::{ConvertedData, ConverterConfig, DeviceResponses, PointConfig, RpcContent, WritePayload};

/// 转换错误。
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("missing data: {0}")]
    MissingData(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
}

/// 上行转换器：返回 `None` 表示本次无可转发数据。
pub trait UplinkConverter: Send + Sync {
    fn convert(
        &self,
        config: &ConverterConfig,
        responses: &DeviceResponses,
    ) -> Result<Option<ConvertedData>, ConversionError>;
}

/// 下行转换器：把写类命令转换为线上载荷。
pub trait DownlinkConverter: Send + Sync {
    fn convert(
        &self,
        command: &PointConfig,
        content: &RpcContent,
    ) -> Result<WritePayload, ConversionError>;
}
