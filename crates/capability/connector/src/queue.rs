//! 全局工作队列：调度器投递轮询 / 数据事件，消费循环按设备路由。

use crate::error::ConnectorError;
use domain::ConvertedData;
use tokio::sync::mpsc;

/// 设备事件类型。
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEventKind {
    /// 轮询该设备
    Poll,
    /// 直接转发已转换的数据
    SendData(ConvertedData),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub device: String,
    pub kind: DeviceEventKind,
}

/// 工作队列发送端，可克隆给任意生产者。
#[derive(Debug, Clone)]
pub struct WorkQueue {
    sender: mpsc::UnboundedSender<DeviceEvent>,
}

impl WorkQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn push(&self, event: DeviceEvent) -> Result<(), ConnectorError> {
        self.sender.send(event).map_err(|_| ConnectorError::Closed)
    }

    pub fn poll(&self, device: impl Into<String>) -> Result<(), ConnectorError> {
        self.push(DeviceEvent {
            device: device.into(),
            kind: DeviceEventKind::Poll,
        })
    }

    pub fn send_data(
        &self,
        device: impl Into<String>,
        data: ConvertedData,
    ) -> Result<(), ConnectorError> {
        self.push(DeviceEvent {
            device: device.into(),
            kind: DeviceEventKind::SendData(data),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
