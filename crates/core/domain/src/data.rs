use crate::device::{Endian, PointConfig, Section};
use crate::function::RawResponse;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 单个点位的请求与原始响应。
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEntry {
    /// 发起请求的设备名
    pub device: String,
    pub request: PointConfig,
    pub response: RawResponse,
}

/// 一轮轮询（或一次 RPC）收集的原始响应，按段与 tag 归档。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceResponses {
    pub attributes: BTreeMap<String, ResponseEntry>,
    pub timeseries: BTreeMap<String, ResponseEntry>,
    pub rpc: BTreeMap<String, ResponseEntry>,
}

impl DeviceResponses {
    pub fn insert(&mut self, section: Section, tag: impl Into<String>, entry: ResponseEntry) {
        let target = match section {
            Section::Attributes => &mut self.attributes,
            Section::Timeseries => &mut self.timeseries,
            Section::AttributeUpdates | Section::Rpc => &mut self.rpc,
        };
        target.insert(tag.into(), entry);
    }

    /// 属性段或遥测段是否有数据。
    pub fn has_datapoints(&self) -> bool {
        !self.attributes.is_empty() || !self.timeseries.is_empty()
    }
}

/// 转换所需的合并配置（设备覆盖连接器默认值）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterConfig {
    pub device_name: String,
    pub device_type: String,
    pub byte_order: Endian,
    pub word_order: Endian,
}

/// 规范化数据点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub key: String,
    pub value: Value,
}

impl Datapoint {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// 上行转换结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedData {
    pub device_name: String,
    pub device_type: String,
    pub attributes: Vec<Datapoint>,
    pub telemetry: Vec<Datapoint>,
}

impl ConvertedData {
    pub fn new(device_name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            device_type: device_type.into(),
            attributes: Vec::new(),
            telemetry: Vec::new(),
        }
    }

    pub fn attributes_datapoints_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn telemetry_datapoints_count(&self) -> usize {
        self.telemetry.len()
    }

    pub fn datapoints_count(&self) -> usize {
        self.attributes_datapoints_count() + self.telemetry_datapoints_count()
    }

    /// 全部数据点展平为 `{key: value}`（RPC 回复载荷）。
    pub fn to_object(&self) -> Map<String, Value> {
        self.attributes
            .iter()
            .chain(self.telemetry.iter())
            .map(|point| (point.key.clone(), point.value.clone()))
            .collect()
    }
}
