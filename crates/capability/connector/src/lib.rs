//! # Modbus 连接器运行时
//!
//! ## 数据流
//!
//! ```text
//! PollScheduler ──► WorkQueue ──► 消费循环 ──► 设备通道 (DeviceRuntime)
//!                                                 │
//!                     ConnectionPool / DeviceConnection ◄┘
//!                                                 │
//!                                          ProtocolClient
//!                                                 │
//!                                    ConversionQueue ──► WorkerPool ──► GatewaySink
//! ```
//!
//! RPC 经 [`ModbusConnector::server_side_rpc`] 进入，排入目标设备通道，与该设备的
//! 轮询严格顺序执行；串口等独占总线在连接与分发期间持有总线互斥锁。

mod config;
mod connection;
mod connector;
mod context;
mod conversion;
mod device;
mod engine;
mod error;
mod pool;
mod queue;
mod rpc;
mod scheduler;
mod sink;

pub use config::{ConnectorConfig, MasterConfig};
pub use connection::{ConnectionState, DeviceConnection, RetryPolicy};
pub use connector::{ConnectorOptions, ModbusConnector, RpcOutcome};
pub use context::ConnectorContext;
pub use conversion::{ConversionQueue, ConversionTask, Rebalance, WorkerPool, desired_workers};
pub use device::DeviceRuntime;
pub use engine::{PollEngine, PollReport, build_request};
pub use error::ConnectorError;
pub use pool::ConnectionPool;
pub use queue::{DeviceEvent, DeviceEventKind, WorkQueue};
pub use rpc::{
    RpcDispatcher, command_from_params, parse_param_string, resolve_command,
    split_connector_method,
};
pub use scheduler::PollScheduler;
pub use sink::{Delivery, GatewaySink, InMemorySink, LoggingSink};
