//! 连接器各组件共享的运行上下文。

use crate::conversion::ConversionQueue;
use crate::pool::ConnectionPool;
use crate::sink::GatewaySink;
use gateway_converter::{DownlinkConverter, UplinkConverter};
use gateway_protocol::ClientFactory;
use std::sync::Arc;

pub struct ConnectorContext {
    pub name: String,
    pub id: String,
    /// RPC 方法前缀（如 `modbus_set` 中的 `modbus`）
    pub connector_type: String,
    pub pool: ConnectionPool,
    pub sink: Arc<dyn GatewaySink>,
    pub uplink: Arc<dyn UplinkConverter>,
    pub downlink: Arc<dyn DownlinkConverter>,
    pub conversions: Arc<ConversionQueue>,
}

impl ConnectorContext {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        connector_type: impl Into<String>,
        factory: Arc<dyn ClientFactory>,
        sink: Arc<dyn GatewaySink>,
        uplink: Arc<dyn UplinkConverter>,
        downlink: Arc<dyn DownlinkConverter>,
    ) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            connector_type: connector_type.into(),
            pool: ConnectionPool::new(factory),
            sink,
            uplink,
            downlink,
            conversions: Arc::new(ConversionQueue::new()),
        }
    }
}
