//! 内存模拟客户端（测试与本地联调使用）。
//!
//! [`MemoryBank`] 模拟一条物理连接背后的从站寄存器表，可注入连接失败、
//! 传输失败与异常响应，并记录在途操作数以便校验总线互斥。

use crate::client::{ClientFactory, ProtocolClient};
use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{
    ConnectionKey, Operation, ProtocolRequest, RawResponse, ReadKind, TransportConfig, WriteKind,
    WritePayload,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Cell = (u8, u16);

#[derive(Debug, Default)]
struct BankState {
    coils: HashMap<Cell, bool>,
    discrete_inputs: HashMap<Cell, bool>,
    holding_registers: HashMap<Cell, u16>,
    input_registers: HashMap<Cell, u16>,
    latency: Duration,
    fail_connects: u32,
    fail_ops: u32,
    exception_ops: u32,
    connects: u32,
    op_log: Vec<u8>,
    in_flight: usize,
    max_in_flight: usize,
}

/// 共享的从站数据表；克隆后指向同一份状态。
#[derive(Debug, Clone, Default)]
pub struct MemoryBank {
    state: Arc<Mutex<BankState>>,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BankState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 每次操作的模拟耗时
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn set_coil(&self, unit_id: u8, address: u16, value: bool) {
        self.lock().coils.insert((unit_id, address), value);
    }

    pub fn coil(&self, unit_id: u8, address: u16) -> Option<bool> {
        self.lock().coils.get(&(unit_id, address)).copied()
    }

    pub fn set_discrete_input(&self, unit_id: u8, address: u16, value: bool) {
        self.lock().discrete_inputs.insert((unit_id, address), value);
    }

    pub fn set_holding_register(&self, unit_id: u8, address: u16, value: u16) {
        self.lock().holding_registers.insert((unit_id, address), value);
    }

    pub fn holding_register(&self, unit_id: u8, address: u16) -> Option<u16> {
        self.lock()
            .holding_registers
            .get(&(unit_id, address))
            .copied()
    }

    pub fn set_input_register(&self, unit_id: u8, address: u16, value: u16) {
        self.lock().input_registers.insert((unit_id, address), value);
    }

    /// 接下来 `count` 次连接失败
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().fail_connects = count;
    }

    /// 接下来 `count` 次操作以传输错误失败（连接随之断开）
    pub fn fail_next_ops(&self, count: u32) {
        self.lock().fail_ops = count;
    }

    /// 接下来 `count` 次操作返回 Modbus 异常响应
    pub fn exception_next_ops(&self, count: u32) {
        self.lock().exception_ops = count;
    }

    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    /// 按执行顺序记录的从站地址
    pub fn op_log(&self) -> Vec<u8> {
        self.lock().op_log.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    fn begin(&self, unit_id: u8) -> Duration {
        let mut state = self.lock();
        state.in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.in_flight);
        state.op_log.push(unit_id);
        state.latency
    }

    fn finish(&self, unit_id: u8, request: &ProtocolRequest) -> Result<RawResponse, ProtocolError> {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        if state.fail_ops > 0 {
            state.fail_ops -= 1;
            return Err(ProtocolError::Connection("simulated transport failure".to_string()));
        }
        if state.exception_ops > 0 {
            state.exception_ops -= 1;
            return Err(ProtocolError::Exception("IllegalDataAddress".to_string()));
        }

        let cells = (0..request.count).map(|offset| (unit_id, request.address.wrapping_add(offset)));
        let response = match request.operation {
            Operation::Read(ReadKind::Coils) => {
                RawResponse::Bits(cells.map(|cell| state.coils.get(&cell).copied().unwrap_or(false)).collect())
            }
            Operation::Read(ReadKind::DiscreteInputs) => RawResponse::Bits(
                cells
                    .map(|cell| state.discrete_inputs.get(&cell).copied().unwrap_or(false))
                    .collect(),
            ),
            Operation::Read(ReadKind::HoldingRegisters) => RawResponse::Registers(
                cells
                    .map(|cell| state.holding_registers.get(&cell).copied().unwrap_or(0))
                    .collect(),
            ),
            Operation::Read(ReadKind::InputRegisters) => RawResponse::Registers(
                cells
                    .map(|cell| state.input_registers.get(&cell).copied().unwrap_or(0))
                    .collect(),
            ),
            Operation::WriteSingle(kind) | Operation::WriteMultiple(kind) => {
                match (kind, &request.payload) {
                    (WriteKind::Coil, Some(WritePayload::Bits(bits))) if !bits.is_empty() => {
                        for (cell, value) in cells.zip(bits) {
                            state.coils.insert(cell, *value);
                        }
                    }
                    (WriteKind::Register, Some(WritePayload::Registers(registers)))
                        if !registers.is_empty() =>
                    {
                        for (cell, value) in cells.zip(registers) {
                            state.holding_registers.insert(cell, *value);
                        }
                    }
                    _ => {
                        return Err(ProtocolError::InvalidRequest(format!(
                            "payload does not match function code {}",
                            request.operation.code()
                        )));
                    }
                }
                RawResponse::Written
            }
        };
        Ok(response)
    }
}

/// 操作 [`MemoryBank`] 的协议客户端。
#[derive(Debug)]
pub struct MemoryClient {
    bank: MemoryBank,
    connected: bool,
}

impl MemoryClient {
    pub fn new(bank: MemoryBank) -> Self {
        Self {
            bank,
            connected: false,
        }
    }
}

#[async_trait]
impl ProtocolClient for MemoryClient {
    async fn connect(&mut self) -> Result<(), ProtocolError> {
        let mut state = self.bank.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            return Err(ProtocolError::Connection("simulated connect failure".to_string()));
        }
        state.connects += 1;
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) {
        self.connected = false;
    }

    async fn execute(
        &mut self,
        unit_id: u8,
        request: &ProtocolRequest,
    ) -> Result<RawResponse, ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::NotConnected);
        }
        let latency = self.bank.begin(unit_id);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let result = self.bank.finish(unit_id, request);
        if matches!(&result, Err(err) if err.is_transport()) {
            self.connected = false;
        }
        result
    }
}

/// 每个连接键对应一个 [`MemoryBank`] 的客户端工厂。
#[derive(Debug, Default)]
pub struct MemoryClientFactory {
    banks: Mutex<HashMap<ConnectionKey, MemoryBank>>,
    created: AtomicUsize,
}

impl MemoryClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取（或创建）连接键对应的数据表
    pub fn bank(&self, key: &ConnectionKey) -> MemoryBank {
        let mut banks = self
            .banks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        banks.entry(key.clone()).or_default().clone()
    }

    /// 已创建的客户端数量
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }
}

impl ClientFactory for MemoryClientFactory {
    fn create(
        &self,
        transport: &TransportConfig,
    ) -> Result<Box<dyn ProtocolClient>, ProtocolError> {
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryClient::new(
            self.bank(&transport.connection_key()),
        )))
    }
}
