//! Modbus 客户端实现（基于 tokio-modbus）
//!
//! 支持的传输与帧格式：
//! - TCP + socket 帧（Modbus TCP）
//! - TCP + rtu 帧（RTU over TCP，常见于串口服务器）
//! - 串口 + rtu 帧
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let mut client = ModbusClient::new(transport);
//! client.connect().await?;
//! let response = client
//!     .execute(1, &ProtocolRequest::read(ReadKind::HoldingRegisters, 0, 2))
//!     .await?;
//! ```

use crate::client::{ClientFactory, ProtocolClient};
use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{
    Framer, Operation, ProtocolRequest, RawResponse, ReadKind, SerialTransport, TransportConfig,
    WriteKind, WritePayload,
};
use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::{Reader, Slave, SlaveContext, Writer};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// 连接建立超时上限
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 基于 tokio-modbus 的协议客户端
pub struct ModbusClient {
    transport: TransportConfig,
    io_timeout: Duration,
    ctx: Option<Context>,
}

impl ModbusClient {
    pub fn new(transport: TransportConfig) -> Self {
        let io_timeout = Duration::from_secs(transport.timeout_secs().max(1));
        Self {
            transport,
            io_timeout,
            ctx: None,
        }
    }

    async fn connect_tcp(host: &str, port: u16, method: Framer) -> Result<Context, ProtocolError> {
        let target = format!("{}:{}", host, port);
        let addr = tokio::net::lookup_host(&target)
            .await?
            .next()
            .ok_or_else(|| ProtocolError::Connection(format!("cannot resolve {}", target)))?;

        match method {
            Framer::Socket => {
                let ctx = with_deadline(CONNECT_TIMEOUT, tokio_modbus::client::tcp::connect(addr))
                    .await?
                    .map_err(|e| ProtocolError::Connection(e.to_string()))?;
                Ok(ctx)
            }
            Framer::Rtu => {
                let stream = with_deadline(CONNECT_TIMEOUT, TcpStream::connect(addr))
                    .await?
                    .map_err(|e| ProtocolError::Connection(e.to_string()))?;
                Ok(tokio_modbus::client::rtu::attach(stream))
            }
            Framer::Ascii => Err(ProtocolError::Unsupported(
                "ascii framer over tcp".to_string(),
            )),
        }
    }

    fn connect_serial(&self, serial: &SerialTransport) -> Result<Context, ProtocolError> {
        if serial.method != Framer::Rtu {
            return Err(ProtocolError::Unsupported(format!(
                "{} framer on serial line",
                serial.method
            )));
        }
        let data_bits = match serial.bytesize {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let parity = match serial.parity.to_ascii_uppercase().as_str() {
            "E" => tokio_serial::Parity::Even,
            "O" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        };
        let stop_bits = match serial.stopbits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };
        let port = tokio_serial::new(&serial.port, serial.baudrate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(self.io_timeout)
            .open_native_async()
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        Ok(tokio_modbus::client::rtu::attach(port))
    }

    async fn run(
        ctx: &mut Context,
        io_timeout: Duration,
        request: &ProtocolRequest,
    ) -> Result<RawResponse, ProtocolError> {
        let address = request.address;
        let count = request.count;
        let response = match request.operation {
            Operation::Read(ReadKind::Coils) => {
                RawResponse::Bits(settle(io_timeout, ctx.read_coils(address, count)).await?)
            }
            Operation::Read(ReadKind::DiscreteInputs) => RawResponse::Bits(
                settle(io_timeout, ctx.read_discrete_inputs(address, count)).await?,
            ),
            Operation::Read(ReadKind::HoldingRegisters) => RawResponse::Registers(
                settle(io_timeout, ctx.read_holding_registers(address, count)).await?,
            ),
            Operation::Read(ReadKind::InputRegisters) => RawResponse::Registers(
                settle(io_timeout, ctx.read_input_registers(address, count)).await?,
            ),
            Operation::WriteSingle(WriteKind::Coil) => {
                let value = first_bit(request)?;
                settle(io_timeout, ctx.write_single_coil(address, value)).await?;
                RawResponse::Written
            }
            Operation::WriteSingle(WriteKind::Register) => {
                let value = first_register(request)?;
                settle(io_timeout, ctx.write_single_register(address, value)).await?;
                RawResponse::Written
            }
            Operation::WriteMultiple(WriteKind::Coil) => {
                let values = bits(request)?;
                settle(io_timeout, ctx.write_multiple_coils(address, values)).await?;
                RawResponse::Written
            }
            Operation::WriteMultiple(WriteKind::Register) => {
                let values = registers(request)?;
                settle(io_timeout, ctx.write_multiple_registers(address, values)).await?;
                RawResponse::Written
            }
        };
        Ok(response)
    }
}

#[async_trait]
impl ProtocolClient for ModbusClient {
    async fn connect(&mut self) -> Result<(), ProtocolError> {
        let ctx = match &self.transport {
            TransportConfig::Tcp(tcp) => Self::connect_tcp(&tcp.host, tcp.port, tcp.method).await?,
            TransportConfig::Serial(serial) => self.connect_serial(serial)?,
        };
        info!(
            target: "gateway.protocol",
            transport = %self.transport.connection_key(),
            "modbus_connected"
        );
        self.ctx = Some(ctx);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn close(&mut self) {
        // 丢弃 Context 即关闭底层连接
        if self.ctx.take().is_some() {
            debug!(
                target: "gateway.protocol",
                transport = %self.transport.connection_key(),
                "modbus_closed"
            );
        }
    }

    async fn execute(
        &mut self,
        unit_id: u8,
        request: &ProtocolRequest,
    ) -> Result<RawResponse, ProtocolError> {
        let io_timeout = self.io_timeout;
        let ctx = self.ctx.as_mut().ok_or(ProtocolError::NotConnected)?;
        ctx.set_slave(Slave(unit_id));

        let result = Self::run(ctx, io_timeout, request).await;
        match &result {
            Ok(response) => debug!(
                target: "gateway.protocol",
                unit_id = unit_id,
                function_code = request.operation.code(),
                address = request.address,
                response = ?response,
                "modbus_request_done"
            ),
            Err(err) => {
                warn!(
                    target: "gateway.protocol",
                    unit_id = unit_id,
                    function_code = request.operation.code(),
                    address = request.address,
                    error = %err,
                    "modbus_request_failed"
                );
                if err.is_transport() {
                    self.ctx = None;
                }
            }
        }
        result
    }
}

/// 默认客户端工厂：为每个连接键创建一个 [`ModbusClient`]。
#[derive(Debug, Default)]
pub struct ModbusClientFactory;

impl ClientFactory for ModbusClientFactory {
    fn create(
        &self,
        transport: &TransportConfig,
    ) -> Result<Box<dyn ProtocolClient>, ProtocolError> {
        Ok(Box::new(ModbusClient::new(transport.clone())))
    }
}

async fn with_deadline<F: Future>(limit: Duration, future: F) -> Result<F::Output, ProtocolError> {
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ProtocolError::Timeout(format!("no response within {:?}", limit)))
}

/// 展开 tokio-modbus 的两层结果：外层为传输错误，内层为设备异常码。
async fn settle<T, E, X, F>(limit: Duration, future: F) -> Result<T, ProtocolError>
where
    F: Future<Output = Result<Result<T, X>, E>>,
    E: Display,
    X: Debug,
{
    with_deadline(limit, future)
        .await?
        .map_err(|e| ProtocolError::Connection(e.to_string()))?
        .map_err(|e| ProtocolError::Exception(format!("{:?}", e)))
}

fn bits(request: &ProtocolRequest) -> Result<&[bool], ProtocolError> {
    match &request.payload {
        Some(WritePayload::Bits(bits)) if !bits.is_empty() => Ok(bits),
        _ => Err(ProtocolError::InvalidRequest(format!(
            "function code {} needs a non-empty bit payload",
            request.operation.code()
        ))),
    }
}

fn registers(request: &ProtocolRequest) -> Result<&[u16], ProtocolError> {
    match &request.payload {
        Some(WritePayload::Registers(registers)) if !registers.is_empty() => Ok(registers),
        _ => Err(ProtocolError::InvalidRequest(format!(
            "function code {} needs a non-empty register payload",
            request.operation.code()
        ))),
    }
}

fn first_bit(request: &ProtocolRequest) -> Result<bool, ProtocolError> {
    bits(request).map(|bits| bits[0])
}

fn first_register(request: &ProtocolRequest) -> Result<u16, ProtocolError> {
    registers(request).map(|registers| registers[0])
}
