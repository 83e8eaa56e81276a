//! 按连接键缓存协议客户端。

use crate::error::ConnectorError;
use domain::{ConnectionKey, TransportConfig};
use gateway_protocol::{ClientFactory, SharedClient, share};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// 连接池：同一连接键只存在一个协议客户端实例。
pub struct ConnectionPool {
    factory: Arc<dyn ClientFactory>,
    clients: Mutex<HashMap<ConnectionKey, SharedClient>>,
    bus_locks: Mutex<HashMap<ConnectionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
            bus_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 取缓存的客户端，不存在时创建。
    pub fn acquire(&self, transport: &TransportConfig) -> Result<SharedClient, ConnectorError> {
        let key = transport.connection_key();
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| ConnectorError::Connect("pool lock failed".to_string()))?;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = self.create(transport)?;
        debug!(target: "gateway.connection", transport = %key, "client_created");
        clients.insert(key, client.clone());
        Ok(client)
    }

    /// 丢弃缓存的客户端并重新创建。
    pub fn force_refresh(&self, transport: &TransportConfig) -> Result<SharedClient, ConnectorError> {
        let key = transport.connection_key();
        let client = self.create(transport)?;
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| ConnectorError::Connect("pool lock failed".to_string()))?;
        clients.insert(key.clone(), client.clone());
        info!(target: "gateway.connection", transport = %key, "client_recreated");
        Ok(client)
    }

    /// 串行总线的互斥锁；非独占连接返回 `None`。
    pub fn bus_lock(
        &self,
        key: &ConnectionKey,
    ) -> Result<Option<Arc<tokio::sync::Mutex<()>>>, ConnectorError> {
        if !key.is_exclusive() {
            return Ok(None);
        }
        let mut locks = self
            .bus_locks
            .lock()
            .map_err(|_| ConnectorError::Connect("bus lock table failed".to_string()))?;
        Ok(Some(locks.entry(key.clone()).or_default().clone()))
    }

    pub fn len(&self) -> usize {
        self.clients.lock().map(|clients| clients.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 关闭并清空全部客户端。
    pub async fn close_all(&self) -> Result<(), ConnectorError> {
        let clients: Vec<(ConnectionKey, SharedClient)> = {
            let mut clients = self
                .clients
                .lock()
                .map_err(|_| ConnectorError::Connect("pool lock failed".to_string()))?;
            clients.drain().collect()
        };
        for (key, client) in clients {
            client.lock().await.close().await;
            debug!(target: "gateway.connection", transport = %key, "client_closed");
        }
        Ok(())
    }

    fn create(&self, transport: &TransportConfig) -> Result<SharedClient, ConnectorError> {
        self.factory
            .create(transport)
            .map(share)
            .map_err(|err| ConnectorError::Connect(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{Framer, SerialTransport, TcpTransport};
    use gateway_protocol::MemoryClientFactory;

    fn tcp(host: &str) -> TransportConfig {
        TransportConfig::Tcp(TcpTransport {
            host: host.to_string(),
            port: 502,
            method: Framer::Socket,
            timeout: 1,
            tls: None,
        })
    }

    #[test]
    fn same_key_shares_one_client() {
        let factory = Arc::new(MemoryClientFactory::new());
        let pool = ConnectionPool::new(factory.clone());
        let first = pool.acquire(&tcp("10.0.0.1")).unwrap();
        let second = pool.acquire(&tcp("10.0.0.1")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        pool.acquire(&tcp("10.0.0.2")).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(factory.created(), 2);
    }

    #[test]
    fn force_refresh_replaces_cached_client() {
        let pool = ConnectionPool::new(Arc::new(MemoryClientFactory::new()));
        let first = pool.acquire(&tcp("10.0.0.1")).unwrap();
        let refreshed = pool.force_refresh(&tcp("10.0.0.1")).unwrap();
        assert!(!Arc::ptr_eq(&first, &refreshed));
        let again = pool.acquire(&tcp("10.0.0.1")).unwrap();
        assert!(Arc::ptr_eq(&refreshed, &again));
    }

    #[test]
    fn only_serial_buses_have_locks() {
        let pool = ConnectionPool::new(Arc::new(MemoryClientFactory::new()));
        assert!(pool.bus_lock(&tcp("10.0.0.1").connection_key()).unwrap().is_none());

        let serial = TransportConfig::Serial(SerialTransport {
            port: "/dev/ttyUSB0".to_string(),
            method: Framer::Rtu,
            baudrate: 9600,
            bytesize: 8,
            parity: "N".to_string(),
            stopbits: 1,
            timeout: 1,
        });
        let first = pool.bus_lock(&serial.connection_key()).unwrap().unwrap();
        let second = pool.bus_lock(&serial.connection_key()).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
