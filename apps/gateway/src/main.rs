//! Modbus 网关进程：加载连接器配置、启动轮询与转换，Ctrl-C 协作式关闭。

use gateway_config::AppConfig;
use gateway_connector::{ConnectorConfig, ConnectorOptions, LoggingSink, ModbusConnector};
use gateway_telemetry::{init_tracing, metrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let connector_config = ConnectorConfig::load(&config.connector_config)?;
    info!(
        target: "gateway.connector",
        path = %config.connector_config.display(),
        devices = connector_config.devices().len(),
        "connector_config_loaded"
    );

    let options = ConnectorOptions {
        connector_type: config.connector_type.clone(),
        housekeeping_interval: Duration::from_millis(config.housekeeping_interval_ms),
        ..ConnectorOptions::default()
    };
    let connector = ModbusConnector::start(connector_config, Arc::new(LoggingSink), options)?;
    if config.scheduler_enabled {
        connector.start_scheduler()?;
    }

    tokio::signal::ctrl_c().await?;
    info!(target: "gateway.connector", connector = %connector.name(), "shutdown_requested");
    connector
        .close(Duration::from_millis(config.shutdown_timeout_ms))
        .await?;

    let snapshot = metrics().snapshot();
    info!(target: "gateway.connector", metrics = ?snapshot, "connector_metrics");
    Ok(())
}
