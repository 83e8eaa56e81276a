//! 网关核心领域模型：所有能力模块共享的类型。

pub mod data;
pub mod device;
pub mod function;
pub mod rpc;

pub use data::{ConvertedData, ConverterConfig, Datapoint, DeviceResponses, ResponseEntry};
pub use device::{
    ConnectionKey, DeviceConfig, Endian, Framer, PointConfig, Section, SerialTransport,
    TcpTransport, TransportConfig,
};
pub use function::{Operation, ProtocolRequest, RawResponse, ReadKind, WriteKind, WritePayload};
pub use rpc::{
    AttributeUpdate, DEVICE_NOT_FOUND, METHOD_NOT_FOUND, RpcContent, RpcReply, RpcRequest,
};
