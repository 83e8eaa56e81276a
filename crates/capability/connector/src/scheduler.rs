//! 内置轮询调度器：按设备 `pollPeriod` 周期投递 POLL 事件。

use crate::queue::WorkQueue;
use domain::DeviceConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// 轮询周期下限。
const MIN_POLL_PERIOD: Duration = Duration::from_millis(10);

pub struct PollScheduler;

impl PollScheduler {
    /// 每个设备一个定时任务；错过的节拍直接跳过，不会堆积事件。
    pub fn spawn(
        devices: &[Arc<DeviceConfig>],
        queue: WorkQueue,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        devices
            .iter()
            .map(|device| {
                let name = device.device_name.clone();
                let period = Duration::from_millis(device.poll_period).max(MIN_POLL_PERIOD);
                tokio::spawn(run_schedule(name, period, queue.clone(), shutdown.clone()))
            })
            .collect()
    }
}

async fn run_schedule(
    device: String,
    period: Duration,
    queue: WorkQueue,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(target: "gateway.engine", device = %device, period_ms = period.as_millis() as u64, "schedule_started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if queue.poll(device.as_str()).is_err() {
                    warn!(target: "gateway.engine", device = %device, "schedule_queue_closed");
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(target: "gateway.engine", device = %device, "schedule_stopped");
}
