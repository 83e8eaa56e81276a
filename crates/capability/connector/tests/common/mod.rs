#![allow(dead_code)]

use domain::{DeviceConfig, Endian};
use gateway_connector::{ConnectorContext, DeviceRuntime, InMemorySink};
use gateway_converter::{BytesDownlinkConverter, BytesUplinkConverter};
use gateway_protocol::{MemoryBank, MemoryClientFactory};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub fn device(value: Value) -> DeviceConfig {
    serde_json::from_value(value).expect("device config")
}

pub fn bank_for(factory: &MemoryClientFactory, device: &DeviceConfig) -> MemoryBank {
    factory.bank(&device.connection_key())
}

pub fn context(factory: Arc<MemoryClientFactory>, sink: Arc<InMemorySink>) -> ConnectorContext {
    ConnectorContext::new(
        "Test Connector",
        "test-id",
        "modbus",
        factory,
        sink,
        Arc::new(BytesUplinkConverter::new()),
        Arc::new(BytesDownlinkConverter::new()),
    )
}

pub fn runtime(device: &DeviceConfig) -> DeviceRuntime {
    DeviceRuntime::new(Arc::new(device.clone()), Endian::Little, Endian::Little)
}

/// 轮询等待条件成立（最多约 2 秒）。
pub async fn wait_for(condition: impl Fn() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
