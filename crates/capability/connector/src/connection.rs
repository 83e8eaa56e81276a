//! 设备连接状态与重连策略。
//!
//! 每次 [`DeviceConnection::ensure_connected`] 最多发起一次连接尝试，
//! 两次尝试间隔不少于 `attempt_delay`；连续失败达到上限后进入冷却期，
//! 冷却期满计数归零。

use crate::error::ConnectorError;
use crate::pool::ConnectionPool;
use domain::{DeviceConfig, TransportConfig};
use gateway_protocol::SharedClient;
use gateway_telemetry::record_reconnect_attempt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 重连策略（设备可覆盖，带下限钳制）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempt_limit: u32,
    pub attempt_delay: Duration,
    pub cooldown: Duration,
}

impl RetryPolicy {
    pub const MIN_ATTEMPT_DELAY: Duration = Duration::from_millis(500);
    pub const MIN_COOLDOWN: Duration = Duration::from_millis(1000);

    pub fn new(attempt_limit: u32, attempt_delay: Duration, cooldown: Duration) -> Self {
        Self {
            attempt_limit: attempt_limit.max(1),
            attempt_delay: attempt_delay.max(Self::MIN_ATTEMPT_DELAY),
            cooldown: cooldown.max(Self::MIN_COOLDOWN),
        }
    }

    pub fn for_device(device: &DeviceConfig) -> Self {
        let defaults = Self::default();
        Self::new(
            device
                .connect_attempt_count
                .unwrap_or(defaults.attempt_limit),
            device
                .connect_attempt_time_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.attempt_delay),
            device
                .wait_after_failed_attempts_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.cooldown),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), Duration::from_millis(300_000))
    }
}

/// 设备连接状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    CoolingDown { since: Instant },
}

/// 单个设备的连接管理。
#[derive(Debug)]
pub struct DeviceConnection {
    device: String,
    policy: RetryPolicy,
    state: ConnectionState,
    attempts: u32,
    last_attempt: Option<Instant>,
    last_connect: Option<Instant>,
}

impl DeviceConnection {
    pub fn new(device: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            device: device.into(),
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
            last_attempt: None,
            last_connect: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn last_connect(&self) -> Option<Instant> {
        self.last_connect
    }

    /// 确保连接可用并返回客户端。
    pub async fn ensure_connected(
        &mut self,
        pool: &ConnectionPool,
        transport: &TransportConfig,
        now: Instant,
    ) -> Result<SharedClient, ConnectorError> {
        // 同一连接键的客户端可能已被其他设备重连，冷却中也可直接使用
        let client = pool.acquire(transport)?;
        if client.lock().await.is_connected() {
            self.mark_connected(now);
            return Ok(client);
        }

        if let ConnectionState::CoolingDown { since } = self.state {
            if now.duration_since(since) < self.policy.cooldown {
                return Err(ConnectorError::Connect(format!(
                    "cooling down after {} failed attempts",
                    self.attempts
                )));
            }
            info!(target: "gateway.connection", device = %self.device, "connection_cooldown_elapsed");
            self.attempts = 0;
            self.state = ConnectionState::Disconnected;
        }

        if let Some(last) = self.last_attempt {
            if now.duration_since(last) < self.policy.attempt_delay {
                return Err(ConnectorError::Connect("next attempt not due".to_string()));
            }
        }

        let client = if self.attempts > 0 {
            pool.force_refresh(transport)?
        } else {
            client
        };
        self.state = ConnectionState::Connecting;
        self.attempts += 1;
        self.last_attempt = Some(now);
        record_reconnect_attempt();
        debug!(
            target: "gateway.connection",
            device = %self.device,
            attempt = self.attempts,
            limit = self.policy.attempt_limit,
            "connect_attempt"
        );

        let result = client.lock().await.connect().await;
        match result {
            Ok(()) => {
                self.mark_connected(now);
                Ok(client)
            }
            Err(err) => {
                warn!(
                    target: "gateway.connection",
                    device = %self.device,
                    attempt = self.attempts,
                    error = %err,
                    "connect_failed"
                );
                if self.attempts >= self.policy.attempt_limit {
                    warn!(
                        target: "gateway.connection",
                        device = %self.device,
                        limit = self.policy.attempt_limit,
                        cooldown_ms = self.policy.cooldown.as_millis() as u64,
                        "connect_attempts_exhausted"
                    );
                    self.state = ConnectionState::CoolingDown { since: now };
                } else {
                    self.state = ConnectionState::Disconnected;
                }
                Err(ConnectorError::Connect(err.to_string()))
            }
        }
    }

    /// 传输故障后标记断开；允许立即重连一次。
    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.last_attempt = None;
    }

    fn mark_connected(&mut self, now: Instant) {
        if self.state != ConnectionState::Connected {
            self.last_connect = Some(now);
            info!(target: "gateway.connection", device = %self.device, "connected");
        }
        self.attempts = 0;
        self.state = ConnectionState::Connected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Framer, TcpTransport};
    use gateway_protocol::MemoryClientFactory;
    use std::sync::Arc;

    fn transport() -> TransportConfig {
        TransportConfig::Tcp(TcpTransport {
            host: "10.0.0.9".to_string(),
            port: 502,
            method: Framer::Socket,
            timeout: 1,
            tls: None,
        })
    }

    #[test]
    fn policy_floors_are_applied() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_millis(10));
        assert_eq!(policy.attempt_limit, 1);
        assert_eq!(policy.attempt_delay, RetryPolicy::MIN_ATTEMPT_DELAY);
        assert_eq!(policy.cooldown, RetryPolicy::MIN_COOLDOWN);

        let defaults = RetryPolicy::default();
        assert_eq!(defaults.attempt_limit, 5);
        assert_eq!(defaults.attempt_delay, Duration::from_millis(500));
        assert_eq!(defaults.cooldown, Duration::from_millis(300_000));
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_never_exceed_limit_and_reset_after_cooldown() {
        let factory = Arc::new(MemoryClientFactory::new());
        let bank = factory.bank(&transport().connection_key());
        bank.fail_next_connects(10);
        let pool = ConnectionPool::new(factory);
        let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_millis(2000));
        let mut connection = DeviceConnection::new("meter", policy);

        for expected in 1..=3 {
            let now = Instant::now();
            assert!(connection.ensure_connected(&pool, &transport(), now).await.is_err());
            assert_eq!(connection.attempts(), expected);
            tokio::time::advance(Duration::from_millis(500)).await;
        }
        assert!(matches!(
            connection.state(),
            ConnectionState::CoolingDown { .. }
        ));

        // 冷却期内不再尝试
        assert!(connection
            .ensure_connected(&pool, &transport(), Instant::now())
            .await
            .is_err());
        assert_eq!(connection.attempts(), 3);

        tokio::time::advance(Duration::from_millis(2000)).await;
        bank.fail_next_connects(0);
        connection
            .ensure_connected(&pool, &transport(), Instant::now())
            .await
            .expect("connected after cooldown");
        assert_eq!(connection.attempts(), 0);
        assert_eq!(connection.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_are_spaced_by_delay() {
        let factory = Arc::new(MemoryClientFactory::new());
        factory
            .bank(&transport().connection_key())
            .fail_next_connects(1);
        let pool = ConnectionPool::new(factory.clone());
        let mut connection = DeviceConnection::new("meter", RetryPolicy::default());

        assert!(connection
            .ensure_connected(&pool, &transport(), Instant::now())
            .await
            .is_err());
        let err = connection
            .ensure_connected(&pool, &transport(), Instant::now())
            .await
            .err()
            .expect("too early");
        assert!(err.to_string().contains("not due"));
        assert_eq!(connection.attempts(), 1);

        tokio::time::advance(Duration::from_millis(500)).await;
        connection
            .ensure_connected(&pool, &transport(), Instant::now())
            .await
            .expect("second attempt succeeds");
        // 失败后的重试使用重新创建的客户端
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cooling_device_reuses_client_reconnected_by_peer() {
        let factory = Arc::new(MemoryClientFactory::new());
        factory
            .bank(&transport().connection_key())
            .fail_next_connects(1);
        let pool = ConnectionPool::new(factory.clone());
        let policy = RetryPolicy::new(1, Duration::from_millis(500), Duration::from_millis(2000));
        let mut cooling = DeviceConnection::new("meter", policy);
        let mut peer = DeviceConnection::new("peer", RetryPolicy::default());

        assert!(cooling
            .ensure_connected(&pool, &transport(), Instant::now())
            .await
            .is_err());
        assert!(matches!(
            cooling.state(),
            ConnectionState::CoolingDown { .. }
        ));

        peer.ensure_connected(&pool, &transport(), Instant::now())
            .await
            .expect("peer connects");
        cooling
            .ensure_connected(&pool, &transport(), Instant::now())
            .await
            .expect("shared client already connected");
        assert_eq!(cooling.state(), ConnectionState::Connected);
        assert_eq!(cooling.attempts(), 0);
        assert_eq!(factory.created(), 1);
    }
}
