//! 转换流水线：无界 FIFO 队列 + 自适应工作者池。
//!
//! 工作者数量 = clamp(ceil(队列深度 / 每工作者容量), 1, 上限)。
//! 每次扩缩容只增减一个；缩容只移除最近加入且空闲的工作者，`Main` 始终保留。

use crate::context::ConnectorContext;
use crate::error::ConnectorError;
use domain::{ConvertedData, ConverterConfig, DeviceResponses};
use gateway_converter::{ConversionError, UplinkConverter};
use gateway_telemetry::{
    record_conversion_failure, record_message_sent, record_worker_retired, record_worker_spawned,
    short_id,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 工作者空闲时等待新任务的上限。
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// 待转换任务。
pub struct ConversionTask {
    converter: Arc<dyn UplinkConverter>,
    config: ConverterConfig,
    responses: DeviceResponses,
}

impl ConversionTask {
    pub fn new(
        converter: Arc<dyn UplinkConverter>,
        config: ConverterConfig,
        responses: DeviceResponses,
    ) -> Self {
        Self {
            converter,
            config,
            responses,
        }
    }

    pub fn device(&self) -> &str {
        &self.config.device_name
    }

    pub fn run(self) -> Result<Option<ConvertedData>, ConversionError> {
        self.converter.convert(&self.config, &self.responses)
    }
}

/// 转换任务队列；每个任务只交给一个工作者。
#[derive(Default)]
pub struct ConversionQueue {
    tasks: Mutex<VecDeque<ConversionTask>>,
    notify: Notify,
}

impl ConversionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> Result<MutexGuard<'_, VecDeque<ConversionTask>>, ConnectorError> {
        self.tasks
            .lock()
            .map_err(|_| ConnectorError::Conversion("queue lock failed".to_string()))
    }

    pub fn push(&self, task: ConversionTask) -> Result<(), ConnectorError> {
        self.tasks()?.push_back(task);
        self.notify.notify_one();
        Ok(())
    }

    pub fn pop(&self) -> Result<Option<ConversionTask>, ConnectorError> {
        Ok(self.tasks()?.pop_front())
    }

    pub fn len(&self) -> usize {
        self.tasks().map(|tasks| tasks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 等待新任务通知，最多等待 `limit`。
    pub async fn wait(&self, limit: Duration) {
        let _ = tokio::time::timeout(limit, self.notify.notified()).await;
    }
}

/// 期望的工作者数量。
pub fn desired_workers(queue_depth: usize, per_worker: usize, max_workers: usize) -> usize {
    queue_depth
        .div_ceil(per_worker.max(1))
        .clamp(1, max_workers.max(1))
}

struct Worker {
    name: String,
    busy: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// 扩缩容结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rebalance {
    Unchanged,
    Spawned(String),
    Retired(String),
}

/// 自适应转换工作者池。
pub struct WorkerPool {
    ctx: Arc<ConnectorContext>,
    workers: Mutex<Vec<Worker>>,
    per_worker: usize,
    max_workers: usize,
    shutdown: watch::Receiver<bool>,
}

impl WorkerPool {
    /// 创建工作者池并启动 `Main` 工作者。
    pub fn start(
        ctx: Arc<ConnectorContext>,
        per_worker: usize,
        max_workers: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let main = spawn_worker("Main".to_string(), ctx.clone(), shutdown.clone());
        Self {
            ctx,
            workers: Mutex::new(vec![main]),
            per_worker: per_worker.max(1),
            max_workers: max_workers.max(1),
            shutdown,
        }
    }

    fn workers(&self) -> Result<MutexGuard<'_, Vec<Worker>>, ConnectorError> {
        self.workers
            .lock()
            .map_err(|_| ConnectorError::Conversion("worker pool lock failed".to_string()))
    }

    pub fn len(&self) -> usize {
        self.workers().map(|workers| workers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 当前工作者名称（按加入顺序）。
    pub fn names(&self) -> Vec<String> {
        self.workers()
            .map(|workers| workers.iter().map(|worker| worker.name.clone()).collect())
            .unwrap_or_default()
    }

    /// 按队列深度增减一个工作者。
    pub fn rebalance(&self) -> Result<Rebalance, ConnectorError> {
        let desired = desired_workers(self.ctx.conversions.len(), self.per_worker, self.max_workers);
        let mut workers = self.workers()?;

        if desired > workers.len() {
            let name = format!("Converter worker {}", short_id());
            workers.push(spawn_worker(
                name.clone(),
                self.ctx.clone(),
                self.shutdown.clone(),
            ));
            record_worker_spawned();
            info!(target: "gateway.conversion", worker = %name, workers = workers.len(), "worker_spawned");
            return Ok(Rebalance::Spawned(name));
        }

        if desired < workers.len() && workers.len() > 1 {
            let idle = workers
                .iter()
                .skip(1)
                .rposition(|worker| !worker.busy.load(Ordering::SeqCst));
            if let Some(offset) = idle {
                let worker = workers.remove(offset + 1);
                worker.stop.store(true, Ordering::SeqCst);
                record_worker_retired();
                info!(target: "gateway.conversion", worker = %worker.name, workers = workers.len(), "worker_retired");
                return Ok(Rebalance::Retired(worker.name));
            }
        }
        Ok(Rebalance::Unchanged)
    }

    /// 停止全部工作者并等待退出；进行中的任务会先完成。
    pub async fn shutdown(&self, limit: Duration) {
        let workers: Vec<Worker> = match self.workers() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(err) => {
                error!(target: "gateway.conversion", error = %err, "worker_shutdown_failed");
                return;
            }
        };
        for worker in &workers {
            worker.stop.store(true, Ordering::SeqCst);
        }
        for worker in workers {
            if tokio::time::timeout(limit, worker.handle).await.is_err() {
                error!(target: "gateway.conversion", worker = %worker.name, "worker_shutdown_timeout");
            }
        }
    }
}

fn spawn_worker(
    name: String,
    ctx: Arc<ConnectorContext>,
    shutdown: watch::Receiver<bool>,
) -> Worker {
    let busy = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(run_worker(
        name.clone(),
        ctx,
        busy.clone(),
        stop.clone(),
        shutdown,
    ));
    Worker {
        name,
        busy,
        stop,
        handle,
    }
}

async fn run_worker(
    name: String,
    ctx: Arc<ConnectorContext>,
    busy: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
) {
    debug!(target: "gateway.conversion", worker = %name, "worker_started");
    while !stop.load(Ordering::SeqCst) && !*shutdown.borrow() {
        // 先标记忙碌再取任务，缩容检查不会移除持有任务的工作者
        busy.store(true, Ordering::SeqCst);
        match ctx.conversions.pop() {
            Ok(Some(task)) => {
                process(&name, &ctx, task).await;
                busy.store(false, Ordering::SeqCst);
            }
            Ok(None) => {
                busy.store(false, Ordering::SeqCst);
                ctx.conversions.wait(IDLE_WAIT).await;
            }
            Err(err) => {
                busy.store(false, Ordering::SeqCst);
                error!(target: "gateway.conversion", worker = %name, error = %err, "queue_unavailable");
                tokio::time::sleep(IDLE_WAIT).await;
            }
        }
    }
    debug!(target: "gateway.conversion", worker = %name, "worker_stopped");
}

async fn process(worker: &str, ctx: &ConnectorContext, task: ConversionTask) {
    let device = task.device().to_string();
    let outcome = tokio::task::spawn_blocking(move || task.run()).await;
    let data = match outcome {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            debug!(target: "gateway.conversion", worker = %worker, device = %device, "conversion_empty");
            return;
        }
        Ok(Err(err)) => {
            record_conversion_failure();
            error!(target: "gateway.conversion", worker = %worker, device = %device, error = %err, "conversion_failed");
            return;
        }
        Err(err) => {
            record_conversion_failure();
            error!(target: "gateway.conversion", worker = %worker, device = %device, error = %err, "conversion_panicked");
            return;
        }
    };

    if data.datapoints_count() == 0 {
        debug!(target: "gateway.conversion", worker = %worker, device = %device, "conversion_empty");
        return;
    }
    info!(
        target: "gateway.conversion",
        worker = %worker,
        device = %device,
        attributes = data.attributes_datapoints_count(),
        telemetry = data.telemetry_datapoints_count(),
        "data_converted"
    );
    match ctx.sink.deliver(data, &ctx.name, &ctx.id).await {
        Ok(()) => record_message_sent(),
        Err(err) => {
            error!(target: "gateway.conversion", worker = %worker, device = %device, error = %err, "delivery_failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_workers_is_clamped_ceiling() {
        assert_eq!(desired_workers(0, 10, 100), 1);
        assert_eq!(desired_workers(1, 10, 100), 1);
        assert_eq!(desired_workers(10, 10, 100), 1);
        assert_eq!(desired_workers(11, 10, 100), 2);
        assert_eq!(desired_workers(95, 10, 100), 10);
        assert_eq!(desired_workers(5000, 10, 3), 3);
        assert_eq!(desired_workers(7, 0, 0), 1);
    }
}
