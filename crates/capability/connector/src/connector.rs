//! 连接器运行时：装配设备通道、消费循环、转换工作者池与 RPC 入口。
//!
//! 每个设备一个通道 task，独占该设备的 [`DeviceRuntime`]，顺序处理轮询、
//! 数据转发与 RPC；不同设备的通道并发运行。消费循环只负责把工作队列中的事件
//! 路由到对应通道。

use crate::config::ConnectorConfig;
use crate::context::ConnectorContext;
use crate::conversion::WorkerPool;
use crate::device::DeviceRuntime;
use crate::engine::PollEngine;
use crate::error::ConnectorError;
use crate::queue::{DeviceEvent, DeviceEventKind, WorkQueue};
use crate::rpc::{RpcDispatcher, command_from_params, resolve_command, split_connector_method};
use crate::scheduler::PollScheduler;
use crate::sink::GatewaySink;
use domain::{
    AttributeUpdate, ConvertedData, DEVICE_NOT_FOUND, DeviceConfig, METHOD_NOT_FOUND, PointConfig,
    RpcReply, RpcRequest,
};
use gateway_converter::{
    BytesDownlinkConverter, BytesUplinkConverter, DownlinkConverter, UplinkConverter,
};
use gateway_protocol::{ClientFactory, ModbusClientFactory};
use gateway_telemetry::{record_message_sent, record_rpc_failure, record_rpc_request};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 连接器装配选项。
pub struct ConnectorOptions {
    pub factory: Arc<dyn ClientFactory>,
    pub uplink: Arc<dyn UplinkConverter>,
    pub downlink: Arc<dyn DownlinkConverter>,
    /// RPC 方法前缀，如 `modbus`
    pub connector_type: String,
    /// 工作者扩缩容检查间隔
    pub housekeeping_interval: Duration,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            factory: Arc::new(ModbusClientFactory),
            uplink: Arc::new(BytesUplinkConverter::new()),
            downlink: Arc::new(BytesDownlinkConverter::new()),
            connector_type: "modbus".to_string(),
            housekeeping_interval: Duration::from_millis(10),
        }
    }
}

/// RPC 处理结果。
#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    /// 定向调用：回复经 sink 推送（仅当带请求 id 时）
    Direct { success: bool, pushed: bool },
    /// 连接器级广播：每个受管设备一条结果，内联返回
    Broadcast(Vec<RpcReply>),
}

enum LaneCommand {
    Poll,
    SendData(ConvertedData),
    Rpc {
        method: String,
        command: PointConfig,
        params: Value,
        id: Option<u64>,
        reply: oneshot::Sender<RpcReply>,
    },
}

struct Lane {
    config: Arc<DeviceConfig>,
    sender: mpsc::UnboundedSender<LaneCommand>,
    /// 已有轮询排队时合并后续轮询事件
    poll_pending: Arc<AtomicBool>,
}

/// Modbus 连接器。
pub struct ModbusConnector {
    ctx: Arc<ConnectorContext>,
    devices: Vec<Arc<DeviceConfig>>,
    lanes: Arc<HashMap<String, Lane>>,
    workers: Arc<WorkerPool>,
    queue: WorkQueue,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ModbusConnector {
    /// 启动连接器：设备通道、消费循环、`Main` 工作者与扩缩容循环。
    pub fn start(
        config: ConnectorConfig,
        sink: Arc<dyn GatewaySink>,
        options: ConnectorOptions,
    ) -> Result<Self, ConnectorError> {
        let ctx = Arc::new(ConnectorContext::new(
            config.name.clone(),
            config.id.clone(),
            options.connector_type,
            options.factory,
            sink,
            options.uplink,
            options.downlink,
        ));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let devices: Vec<Arc<DeviceConfig>> =
            config.devices().iter().cloned().map(Arc::new).collect();
        let mut lanes = HashMap::new();
        for device in &devices {
            let (sender, receiver) = mpsc::unbounded_channel();
            let poll_pending = Arc::new(AtomicBool::new(false));
            let runtime = DeviceRuntime::new(device.clone(), config.byte_order, config.word_order);
            tasks.push(tokio::spawn(run_lane(
                runtime,
                ctx.clone(),
                receiver,
                poll_pending.clone(),
                shutdown_rx.clone(),
            )));
            lanes.insert(
                device.device_name.clone(),
                Lane {
                    config: device.clone(),
                    sender,
                    poll_pending,
                },
            );
        }
        let lanes = Arc::new(lanes);

        let (queue, events) = WorkQueue::channel();
        tasks.push(tokio::spawn(run_consumer(
            lanes.clone(),
            events,
            shutdown_rx.clone(),
        )));

        let workers = Arc::new(WorkerPool::start(
            ctx.clone(),
            config.max_message_number_per_worker,
            config.max_number_of_workers,
            shutdown_rx.clone(),
        ));
        tasks.push(tokio::spawn(run_housekeeping(
            workers.clone(),
            options.housekeeping_interval,
            shutdown_rx,
        )));

        info!(
            target: "gateway.connector",
            connector = %ctx.name,
            connector_id = %ctx.id,
            devices = devices.len(),
            "connector_started"
        );
        Ok(Self {
            ctx,
            devices,
            lanes,
            workers,
            queue,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn id(&self) -> &str {
        &self.ctx.id
    }

    /// 受管设备名（配置顺序）。
    pub fn device_names(&self) -> Vec<String> {
        self.devices
            .iter()
            .map(|device| device.device_name.clone())
            .collect()
    }

    /// 工作队列发送端，外部调度器通过它投递事件。
    pub fn work_queue(&self) -> WorkQueue {
        self.queue.clone()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn pending_conversions(&self) -> usize {
        self.ctx.conversions.len()
    }

    /// 启动内置轮询调度器。
    pub fn start_scheduler(&self) -> Result<(), ConnectorError> {
        let handles =
            PollScheduler::spawn(&self.devices, self.queue.clone(), self.shutdown.subscribe());
        self.tasks
            .lock()
            .map_err(|_| ConnectorError::Config("task list lock failed".to_string()))?
            .extend(handles);
        info!(target: "gateway.connector", connector = %self.ctx.name, "scheduler_started");
        Ok(())
    }

    /// 处理服务端 RPC。
    pub async fn server_side_rpc(&self, request: RpcRequest) -> RpcOutcome {
        let RpcRequest {
            mut device,
            mut method,
            mut params,
            id,
        } = request;
        if let Some((name, stripped, rest)) =
            split_connector_method(&method, &params, &self.ctx.connector_type)
        {
            device = Some(name);
            method = stripped;
            params = rest;
        }

        let Some(device) = device else {
            return RpcOutcome::Broadcast(self.broadcast(&method, &params, id).await);
        };
        record_rpc_request();
        info!(target: "gateway.rpc", device = %device, method = %method, request_id = ?id, "rpc_received");

        let reply = match self.lanes.get(&device) {
            None => {
                error!(target: "gateway.rpc", device = %device, connector = %self.ctx.name, "rpc_device_not_found");
                RpcReply::failure(device.as_str(), id, &method, DEVICE_NOT_FOUND)
            }
            Some(lane) => match resolve_command(&lane.config, &method, &params) {
                Ok(command) => self.call(lane, &method, command, params, id).await,
                Err(message) => {
                    error!(target: "gateway.rpc", device = %device, method = %method, error = %message, "rpc_command_not_found");
                    RpcReply::failure(device.as_str(), id, &method, message)
                }
            },
        };

        let success = reply.success;
        if !success {
            record_rpc_failure();
        }
        if id.is_none() {
            return RpcOutcome::Direct {
                success,
                pushed: false,
            };
        }
        let pushed = match self.ctx.sink.reply(reply).await {
            Ok(()) => true,
            Err(err) => {
                error!(target: "gateway.rpc", device = %device, error = %err, "rpc_reply_failed");
                false
            }
        };
        RpcOutcome::Direct { success, pushed }
    }

    /// 服务端属性更新：按 `attributeUpdates` 命令写入设备，不推送回复。
    ///
    /// 未知设备或无匹配命令的键各返回一条失败回复。
    pub async fn on_attributes_update(&self, update: AttributeUpdate) -> Vec<RpcReply> {
        let Some(lane) = self.lanes.get(&update.device) else {
            error!(target: "gateway.rpc", device = %update.device, connector = %self.ctx.name, "attribute_update_device_not_found");
            return update
                .data
                .keys()
                .map(|key| RpcReply::failure(update.device.as_str(), None, key, DEVICE_NOT_FOUND))
                .collect();
        };
        let mut replies = Vec::with_capacity(update.data.len());
        for (key, value) in &update.data {
            let Some(command) = lane
                .config
                .attribute_updates
                .iter()
                .find(|command| &command.tag == key)
            else {
                error!(target: "gateway.rpc", device = %update.device, tag = %key, "attribute_update_command_not_found");
                replies.push(RpcReply::failure(
                    update.device.as_str(),
                    None,
                    key,
                    METHOD_NOT_FOUND,
                ));
                continue;
            };
            debug!(target: "gateway.rpc", device = %update.device, tag = %key, "attribute_update_received");
            let reply = self
                .call(lane, key, command.clone(), value.clone(), None)
                .await;
            if !reply.success {
                warn!(target: "gateway.rpc", device = %update.device, tag = %key, content = %reply.content, "attribute_update_failed");
            }
            replies.push(reply);
        }
        replies
    }

    /// 协作式关闭：停止循环与工作者，等待进行中的操作完成后关闭全部连接。
    pub async fn close(&self, timeout: Duration) -> Result<(), ConnectorError> {
        let _ = self.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .map_err(|_| ConnectorError::Config("task list lock failed".to_string()))?
            .drain(..)
            .collect();
        for task in tasks {
            if tokio::time::timeout(timeout, task).await.is_err() {
                warn!(target: "gateway.connector", connector = %self.ctx.name, "task_shutdown_timeout");
            }
        }
        self.workers.shutdown(timeout).await;
        self.ctx.pool.close_all().await?;
        info!(target: "gateway.connector", connector = %self.ctx.name, "connector_stopped");
        Ok(())
    }

    async fn broadcast(&self, method: &str, params: &Value, id: Option<u64>) -> Vec<RpcReply> {
        debug!(target: "gateway.rpc", method = %method, devices = self.devices.len(), "rpc_broadcast");
        let mut replies = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            record_rpc_request();
            let reply = match (self.lanes.get(&device.device_name), command_from_params(params)) {
                (Some(lane), Ok(command)) => {
                    self.call(lane, method, command, params.clone(), id).await
                }
                (_, Err(err)) => {
                    RpcReply::failure(device.device_name.as_str(), id, method, err.to_string())
                }
                (None, Ok(_)) => {
                    RpcReply::failure(device.device_name.as_str(), id, method, DEVICE_NOT_FOUND)
                }
            };
            if !reply.success {
                record_rpc_failure();
            }
            replies.push(reply);
        }
        replies
    }

    /// 经设备通道执行命令，与该设备的轮询严格排序。
    async fn call(
        &self,
        lane: &Lane,
        method: &str,
        command: PointConfig,
        params: Value,
        id: Option<u64>,
    ) -> RpcReply {
        let device = lane.config.device_name.as_str();
        let (reply, receiver) = oneshot::channel();
        let sent = lane.sender.send(LaneCommand::Rpc {
            method: method.to_string(),
            command,
            params,
            id,
            reply,
        });
        if sent.is_err() {
            return RpcReply::failure(device, id, method, ConnectorError::Closed.to_string());
        }
        receiver
            .await
            .unwrap_or_else(|_| RpcReply::failure(device, id, method, ConnectorError::Closed.to_string()))
    }
}

async fn run_lane(
    mut device: DeviceRuntime,
    ctx: Arc<ConnectorContext>,
    mut commands: mpsc::UnboundedReceiver<LaneCommand>,
    poll_pending: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let command = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };
        match command {
            LaneCommand::Poll => {
                poll_pending.store(false, Ordering::SeqCst);
                PollEngine::poll_device(&mut device, &ctx).await;
            }
            LaneCommand::SendData(data) => deliver(&ctx, data).await,
            LaneCommand::Rpc {
                method,
                command,
                params,
                id,
                reply,
            } => {
                let result =
                    RpcDispatcher::process(&mut device, &ctx, &method, command, params, id).await;
                if reply.send(result).is_err() {
                    debug!(target: "gateway.rpc", device = %device.name(), method = %method, "rpc_caller_gone");
                }
            }
        }
    }
    debug!(target: "gateway.connector", device = %device.name(), "device_lane_stopped");
}

async fn deliver(ctx: &ConnectorContext, data: ConvertedData) {
    let device = data.device_name.clone();
    match ctx.sink.deliver(data, &ctx.name, &ctx.id).await {
        Ok(()) => record_message_sent(),
        Err(err) => {
            error!(target: "gateway.connector", device = %device, error = %err, "delivery_failed")
        }
    }
}

async fn run_consumer(
    lanes: Arc<HashMap<String, Lane>>,
    mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        route(&lanes, event);
    }
    debug!(target: "gateway.connector", "consumer_stopped");
}

fn route(lanes: &HashMap<String, Lane>, event: DeviceEvent) {
    let Some(lane) = lanes.get(&event.device) else {
        warn!(target: "gateway.connector", device = %event.device, "event_device_not_found");
        return;
    };
    let command = match event.kind {
        DeviceEventKind::Poll => {
            if lane.poll_pending.swap(true, Ordering::SeqCst) {
                debug!(target: "gateway.engine", device = %event.device, "poll_coalesced");
                return;
            }
            LaneCommand::Poll
        }
        DeviceEventKind::SendData(data) => LaneCommand::SendData(data),
    };
    if lane.sender.send(command).is_err() {
        warn!(target: "gateway.connector", device = %event.device, "device_lane_closed");
    }
}

async fn run_housekeeping(
    workers: Arc<WorkerPool>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = workers.rebalance() {
                    error!(target: "gateway.conversion", error = %err, "rebalance_failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(target: "gateway.conversion", "housekeeping_stopped");
}
