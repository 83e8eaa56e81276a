//! 轮询引擎：按段读取设备点位并把结果交给转换流水线。

use crate::context::ConnectorContext;
use crate::conversion::ConversionTask;
use crate::device::DeviceRuntime;
use crate::error::ConnectorError;
use domain::{DeviceResponses, Operation, PointConfig, ProtocolRequest, ResponseEntry, WritePayload};
use tracing::{debug, error, warn};

/// 单轮轮询结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// 本轮是否建立了连接
    pub connected: bool,
    /// 成功读取的点位数
    pub items: usize,
    /// 第二次失败后放弃了剩余点位
    pub abandoned: bool,
    /// 是否投递了转换任务
    pub enqueued: bool,
}

/// 由点位配置构造协议请求；写类功能码需要载荷（显式给出或取点位固定载荷）。
pub fn build_request(
    point: &PointConfig,
    payload: Option<WritePayload>,
) -> Result<ProtocolRequest, ConnectorError> {
    let operation = Operation::from_code(point.function_code).ok_or_else(|| {
        ConnectorError::Config(format!(
            "unknown function code {} for {}",
            point.function_code, point.tag
        ))
    })?;
    match operation {
        Operation::Read(kind) => Ok(ProtocolRequest::read(
            kind,
            point.address,
            point.objects_count,
        )),
        _ => {
            let payload = payload.or_else(|| point.payload.clone()).ok_or_else(|| {
                ConnectorError::Config(format!("no payload for write point {}", point.tag))
            })?;
            Ok(ProtocolRequest::write(operation, point.address, payload))
        }
    }
}

pub struct PollEngine;

impl PollEngine {
    /// 轮询一个设备的属性段与遥测段。
    pub async fn poll_device(device: &mut DeviceRuntime, ctx: &ConnectorContext) -> PollReport {
        let mut report = PollReport::default();
        let _bus = match device.bus_guard(ctx).await {
            Ok(guard) => guard,
            Err(err) => {
                error!(target: "gateway.engine", device = %device.name(), error = %err, "bus_lock_failed");
                return report;
            }
        };

        if let Err(err) = device.ensure_connected(ctx).await {
            debug!(target: "gateway.engine", device = %device.name(), error = %err, "poll_skipped");
            return report;
        }
        report.connected = true;

        let config = device.config().clone();
        let mut responses = DeviceResponses::default();
        'sections: for (section, points) in config.polled_sections() {
            for point in points {
                let request = match build_request(point, None) {
                    Ok(request) => request,
                    Err(err) => {
                        error!(target: "gateway.engine", device = %device.name(), tag = %point.tag, error = %err, "point_skipped");
                        continue;
                    }
                };
                match device.execute_with_retry(ctx, &request).await {
                    Ok(response) => {
                        report.items += 1;
                        responses.insert(
                            section,
                            point.tag.clone(),
                            ResponseEntry {
                                device: config.device_name.clone(),
                                request: point.clone(),
                                response,
                            },
                        );
                    }
                    Err(ConnectorError::Config(message)) => {
                        error!(target: "gateway.engine", device = %device.name(), tag = %point.tag, error = %message, "point_skipped");
                    }
                    Err(err) => {
                        warn!(
                            target: "gateway.engine",
                            device = %device.name(),
                            section = section.as_str(),
                            tag = %point.tag,
                            error = %err,
                            "poll_cycle_abandoned"
                        );
                        report.abandoned = true;
                        break 'sections;
                    }
                }
            }
        }

        if responses.has_datapoints() {
            let task = ConversionTask::new(
                ctx.uplink.clone(),
                device.converter_config().clone(),
                responses,
            );
            match ctx.conversions.push(task) {
                Ok(()) => report.enqueued = true,
                Err(err) => {
                    error!(target: "gateway.engine", device = %device.name(), error = %err, "conversion_enqueue_failed")
                }
            }
        }
        debug!(
            target: "gateway.engine",
            device = %device.name(),
            items = report.items,
            abandoned = report.abandoned,
            "device_polled"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ReadKind, WriteKind};
    use serde_json::json;

    fn point(value: serde_json::Value) -> PointConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn read_codes_build_read_requests() {
        let request = build_request(
            &point(json!({"tag": "t", "functionCode": 4, "address": 7, "objectsCount": 2})),
            None,
        )
        .unwrap();
        assert_eq!(request, ProtocolRequest::read(ReadKind::InputRegisters, 7, 2));
    }

    #[test]
    fn write_codes_need_a_payload() {
        let command = point(json!({"tag": "t", "functionCode": 16, "address": 1}));
        assert!(matches!(
            build_request(&command, None),
            Err(ConnectorError::Config(_))
        ));
        let request =
            build_request(&command, Some(WritePayload::Registers(vec![1, 2]))).unwrap();
        assert_eq!(
            request.operation,
            Operation::WriteMultiple(WriteKind::Register)
        );
        assert_eq!(request.count, 2);
    }

    #[test]
    fn unknown_function_code_is_a_config_fault() {
        assert!(matches!(
            build_request(&point(json!({"tag": "t", "functionCode": 43})), None),
            Err(ConnectorError::Config(_))
        ));
    }
}
