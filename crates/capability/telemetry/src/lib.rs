//! 追踪初始化、连接器统计与短标识生成。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 连接器统计快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub messages_sent: u64,
    pub conversion_failures: u64,
    pub rpc_requests: u64,
    pub rpc_failures: u64,
    pub reconnect_attempts: u64,
    pub connection_teardowns: u64,
    pub workers_spawned: u64,
    pub workers_retired: u64,
}

/// 连接器统计计数。
pub struct ConnectorMetrics {
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
    conversion_failures: AtomicU64,
    rpc_requests: AtomicU64,
    rpc_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    connection_teardowns: AtomicU64,
    workers_spawned: AtomicU64,
    workers_retired: AtomicU64,
}

impl ConnectorMetrics {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            conversion_failures: AtomicU64::new(0),
            rpc_requests: AtomicU64::new(0),
            rpc_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            connection_teardowns: AtomicU64::new(0),
            workers_spawned: AtomicU64::new(0),
            workers_retired: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            conversion_failures: self.conversion_failures.load(Ordering::Relaxed),
            rpc_requests: self.rpc_requests.load(Ordering::Relaxed),
            rpc_failures: self.rpc_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            connection_teardowns: self.connection_teardowns.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
            workers_retired: self.workers_retired.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConnectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<ConnectorMetrics> = OnceLock::new();

/// 获取全局统计实例。
pub fn metrics() -> &'static ConnectorMetrics {
    METRICS.get_or_init(ConnectorMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成 5 位十六进制短标识（用于连接器与工作者命名）。
pub fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..5].to_string()
}

/// 记录成功的协议操作次数。
pub fn record_message_received() {
    metrics().messages_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录推送到 sink 的转换结果次数。
pub fn record_message_sent() {
    metrics().messages_sent.fetch_add(1, Ordering::Relaxed);
}

/// 记录转换失败次数。
pub fn record_conversion_failure() {
    metrics()
        .conversion_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录 RPC 请求次数（广播按设备计）。
pub fn record_rpc_request() {
    metrics().rpc_requests.fetch_add(1, Ordering::Relaxed);
}

/// 记录失败的 RPC 回复次数。
pub fn record_rpc_failure() {
    metrics().rpc_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接尝试次数。
pub fn record_reconnect_attempt() {
    metrics()
        .reconnect_attempts
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录因传输故障拆除连接的次数。
pub fn record_connection_teardown() {
    metrics()
        .connection_teardowns
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录转换工作者扩容次数。
pub fn record_worker_spawned() {
    metrics().workers_spawned.fetch_add(1, Ordering::Relaxed);
}

/// 记录转换工作者缩容次数。
pub fn record_worker_retired() {
    metrics().workers_retired.fetch_add(1, Ordering::Relaxed);
}
