//! 协议客户端抽象。

use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{ProtocolRequest, RawResponse, TransportConfig};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 一条物理连接上的协议客户端。
///
/// 每个连接键对应一个实例；按功能码执行单次读或写。
#[async_trait]
pub trait ProtocolClient: Send {
    async fn connect(&mut self) -> Result<(), ProtocolError>;

    fn is_connected(&self) -> bool;

    async fn close(&mut self);

    async fn execute(
        &mut self,
        unit_id: u8,
        request: &ProtocolRequest,
    ) -> Result<RawResponse, ProtocolError>;
}

/// 连接池中共享的客户端句柄。
pub type SharedClient = Arc<Mutex<Box<dyn ProtocolClient>>>;

/// 按传输配置创建协议客户端。
pub trait ClientFactory: Send + Sync {
    fn create(&self, transport: &TransportConfig) -> Result<Box<dyn ProtocolClient>, ProtocolError>;
}

pub fn share(client: Box<dyn ProtocolClient>) -> SharedClient {
    Arc::new(Mutex::new(client))
}
