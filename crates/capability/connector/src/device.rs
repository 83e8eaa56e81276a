//! 单个受管设备的运行时状态。

use crate::connection::{DeviceConnection, RetryPolicy};
use crate::context::ConnectorContext;
use crate::error::ConnectorError;
use domain::{ConnectionKey, ConverterConfig, DeviceConfig, Endian, ProtocolRequest, RawResponse};
use gateway_protocol::{ProtocolError, SharedClient};
use gateway_telemetry::{record_connection_teardown, record_message_received};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{info, warn};

/// 设备运行时：配置、连接状态与上线标记，由所属设备通道独占。
pub struct DeviceRuntime {
    config: Arc<DeviceConfig>,
    key: ConnectionKey,
    connection: DeviceConnection,
    converter_config: ConverterConfig,
    online: bool,
}

impl DeviceRuntime {
    pub fn new(config: Arc<DeviceConfig>, byte_order: Endian, word_order: Endian) -> Self {
        let converter_config = ConverterConfig {
            device_name: config.device_name.clone(),
            device_type: config.device_type.clone(),
            byte_order: config.byte_order.unwrap_or(byte_order),
            word_order: config.word_order.unwrap_or(word_order),
        };
        Self {
            key: config.connection_key(),
            connection: DeviceConnection::new(
                config.device_name.clone(),
                RetryPolicy::for_device(&config),
            ),
            converter_config,
            online: false,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.device_name
    }

    pub fn config(&self) -> &Arc<DeviceConfig> {
        &self.config
    }

    pub fn converter_config(&self) -> &ConverterConfig {
        &self.converter_config
    }

    pub fn connection(&self) -> &DeviceConnection {
        &self.connection
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// 串行总线上持有的互斥守卫；连接与分发的整个临界区内保持。
    pub async fn bus_guard(
        &self,
        ctx: &ConnectorContext,
    ) -> Result<Option<OwnedMutexGuard<()>>, ConnectorError> {
        match ctx.pool.bus_lock(&self.key)? {
            Some(lock) => Ok(Some(lock.lock_owned().await)),
            None => Ok(None),
        }
    }

    /// 确保连接可用；首次连上时通知设备上线，连接失败时通知下线。
    pub async fn ensure_connected(
        &mut self,
        ctx: &ConnectorContext,
    ) -> Result<SharedClient, ConnectorError> {
        let result = self
            .connection
            .ensure_connected(&ctx.pool, &self.config.transport, Instant::now())
            .await;
        match &result {
            Ok(_) if !self.online => {
                self.online = true;
                if let Err(err) = ctx
                    .sink
                    .device_online(&self.config.device_name, &self.config.device_type)
                    .await
                {
                    warn!(target: "gateway.connector", device = %self.name(), error = %err, "device_online_failed");
                }
            }
            Err(_) => self.set_offline(ctx).await,
            _ => {}
        }
        result
    }

    /// 执行一次协议操作；失败时恰好重试一次。
    ///
    /// 传输故障先拆除连接并立即重连再重试；设备异常响应在原连接上重试。
    /// 第二次失败返回错误，由调用方放弃本轮。
    pub async fn execute_with_retry(
        &mut self,
        ctx: &ConnectorContext,
        request: &ProtocolRequest,
    ) -> Result<RawResponse, ConnectorError> {
        let unit_id = self.config.unit_id;
        let client = self.ensure_connected(ctx).await?;

        let first = client.lock().await.execute(unit_id, request).await;
        let err = match first {
            Ok(response) => {
                record_message_received();
                return Ok(response);
            }
            Err(ProtocolError::InvalidRequest(message)) => {
                return Err(ConnectorError::Config(message));
            }
            Err(err) => err,
        };
        warn!(
            target: "gateway.connector",
            device = %self.name(),
            function_code = request.operation.code(),
            address = request.address,
            error = %err,
            "dispatch_failed_retrying"
        );

        let client = if err.is_transport() {
            self.teardown(ctx, &client).await;
            self.ensure_connected(ctx).await?
        } else {
            client
        };

        let second = client.lock().await.execute(unit_id, request).await;
        match second {
            Ok(response) => {
                record_message_received();
                Ok(response)
            }
            Err(err) => {
                if err.is_transport() {
                    self.teardown(ctx, &client).await;
                }
                Err(ConnectorError::Dispatch(err.to_string()))
            }
        }
    }

    /// 拆除连接并通知设备下线。
    pub async fn teardown(&mut self, ctx: &ConnectorContext, client: &SharedClient) {
        client.lock().await.close().await;
        self.connection.mark_disconnected();
        record_connection_teardown();
        info!(target: "gateway.connection", device = %self.name(), "connection_torn_down");
        self.set_offline(ctx).await;
    }

    async fn set_offline(&mut self, ctx: &ConnectorContext) {
        if !self.online {
            return;
        }
        self.online = false;
        if let Err(err) = ctx.sink.device_offline(&self.config.device_name).await {
            warn!(target: "gateway.connector", device = %self.name(), error = %err, "device_offline_failed");
        }
    }
}
