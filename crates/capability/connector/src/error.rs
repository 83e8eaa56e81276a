//! 连接器错误类型定义

/// 连接器运行错误。
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// 配置缺失或非法（设备、命令、参数串）
    #[error("config error: {0}")]
    Config(String),

    /// 连接建立失败、等待重试或处于冷却期
    #[error("connect error: {0}")]
    Connect(String),

    /// 协议操作失败（重试后仍失败）
    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("sink error: {0}")]
    Sink(String),

    /// 连接器已关闭
    #[error("connector closed")]
    Closed,
}
