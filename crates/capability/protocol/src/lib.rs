//! # 协议通信能力模块
//!
//! 为网关连接器提供统一的协议客户端抽象：
//! - **ModbusClient**：基于 tokio-modbus 的 TCP / RTU over TCP / 串口 RTU 客户端
//! - **MemoryClient**：内存从站表，用于测试与本地联调
//!
//! ## 架构设计
//!
//! ```text
//! DeviceConfig (type + host/port 或 串口参数)
//!       │
//!       ▼
//! ConnectionKey ──► ClientFactory::create
//!       │
//!       ▼
//! SharedClient (Arc<Mutex<Box<dyn ProtocolClient>>>)
//!       │
//!       ▼
//! execute(unit_id, ProtocolRequest) → RawResponse
//! ```
//!
//! 功能码映射：1/2/3/4 为读，5/6 为单写，15/16 为多写。

mod client;
mod error;
mod memory;
mod modbus;

pub use client::{ClientFactory, ProtocolClient, SharedClient, share};
pub use error::ProtocolError;
pub use memory::{MemoryBank, MemoryClient, MemoryClientFactory};
pub use modbus::{ModbusClient, ModbusClientFactory};
