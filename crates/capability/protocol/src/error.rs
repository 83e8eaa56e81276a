//! 协议错误类型定义

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误（不可达、被关闭）
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 设备返回的 Modbus 异常响应
    #[error("modbus exception: {0}")]
    Exception(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 当前传输或帧格式不支持的操作
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// 请求参数错误
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// 尚未建立连接
    #[error("not connected")]
    NotConnected,
}

impl ProtocolError {
    /// 是否为传输层故障（需要拆除连接）；设备异常响应不属于传输故障。
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::Exception(_) | Self::InvalidRequest(_))
    }
}
