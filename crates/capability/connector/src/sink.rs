//! 网关侧出口：转换结果、设备上下线与 RPC 回复。

use crate::error::ConnectorError;
use async_trait::async_trait;
use domain::{ConvertedData, RpcReply};
use std::sync::RwLock;
use tracing::info;

/// 网关出口抽象（存储、设备注册、回复通道）。
#[async_trait]
pub trait GatewaySink: Send + Sync {
    async fn deliver(
        &self,
        data: ConvertedData,
        connector_name: &str,
        connector_id: &str,
    ) -> Result<(), ConnectorError>;

    async fn device_online(&self, device: &str, device_type: &str) -> Result<(), ConnectorError>;

    async fn device_offline(&self, device: &str) -> Result<(), ConnectorError>;

    async fn reply(&self, reply: RpcReply) -> Result<(), ConnectorError>;
}

/// 只输出日志的出口（二进制默认使用）。
#[derive(Debug, Default)]
pub struct LoggingSink;

#[async_trait]
impl GatewaySink for LoggingSink {
    async fn deliver(
        &self,
        data: ConvertedData,
        connector_name: &str,
        connector_id: &str,
    ) -> Result<(), ConnectorError> {
        let payload =
            serde_json::to_string(&data).map_err(|err| ConnectorError::Sink(err.to_string()))?;
        info!(
            target: "gateway.connector",
            connector = %connector_name,
            connector_id = %connector_id,
            device = %data.device_name,
            attributes = data.attributes_datapoints_count(),
            telemetry = data.telemetry_datapoints_count(),
            payload = %payload,
            "data_delivered"
        );
        Ok(())
    }

    async fn device_online(&self, device: &str, device_type: &str) -> Result<(), ConnectorError> {
        info!(target: "gateway.connector", device = %device, device_type = %device_type, "device_online");
        Ok(())
    }

    async fn device_offline(&self, device: &str) -> Result<(), ConnectorError> {
        info!(target: "gateway.connector", device = %device, "device_offline");
        Ok(())
    }

    async fn reply(&self, reply: RpcReply) -> Result<(), ConnectorError> {
        info!(
            target: "gateway.rpc",
            device = %reply.device,
            request_id = ?reply.id,
            success = reply.success,
            content = %reply.content,
            "rpc_replied"
        );
        Ok(())
    }
}

/// 一条已投递的转换结果。
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub data: ConvertedData,
    pub connector_name: String,
    pub connector_id: String,
}

/// 内存出口（测试与本地联调使用）。
#[derive(Debug, Default)]
pub struct InMemorySink {
    deliveries: RwLock<Vec<Delivery>>,
    online: RwLock<Vec<String>>,
    offline: RwLock<Vec<String>>,
    replies: RwLock<Vec<RpcReply>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        read_all(&self.deliveries)
    }

    /// 按上线顺序记录的设备名
    pub fn online(&self) -> Vec<String> {
        read_all(&self.online)
    }

    pub fn offline(&self) -> Vec<String> {
        read_all(&self.offline)
    }

    pub fn replies(&self) -> Vec<RpcReply> {
        read_all(&self.replies)
    }
}

#[async_trait]
impl GatewaySink for InMemorySink {
    async fn deliver(
        &self,
        data: ConvertedData,
        connector_name: &str,
        connector_id: &str,
    ) -> Result<(), ConnectorError> {
        let mut deliveries = self
            .deliveries
            .write()
            .map_err(|_| ConnectorError::Sink("lock failed".to_string()))?;
        deliveries.push(Delivery {
            data,
            connector_name: connector_name.to_string(),
            connector_id: connector_id.to_string(),
        });
        Ok(())
    }

    async fn device_online(&self, device: &str, _device_type: &str) -> Result<(), ConnectorError> {
        let mut online = self
            .online
            .write()
            .map_err(|_| ConnectorError::Sink("lock failed".to_string()))?;
        online.push(device.to_string());
        Ok(())
    }

    async fn device_offline(&self, device: &str) -> Result<(), ConnectorError> {
        let mut offline = self
            .offline
            .write()
            .map_err(|_| ConnectorError::Sink("lock failed".to_string()))?;
        offline.push(device.to_string());
        Ok(())
    }

    async fn reply(&self, reply: RpcReply) -> Result<(), ConnectorError> {
        let mut replies = self
            .replies
            .write()
            .map_err(|_| ConnectorError::Sink("lock failed".to_string()))?;
        replies.push(reply);
        Ok(())
    }
}

fn read_all<T: Clone>(lock: &RwLock<Vec<T>>) -> Vec<T> {
    match lock.read() {
        Ok(items) => items.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}
