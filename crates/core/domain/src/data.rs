use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 传输层输入原始报文。
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub device_id: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at_ms: i64,
}

/// 规范化后的设备采样记录。
///
/// 发布到总线后不可变；参数表为开放映射，未识别的键原样保留。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub device_id: String,
    pub ts_ms: i64,
    pub parameters: BTreeMap<String, f64>,
    pub process_stage: Option<String>,
}

/// 设备在线状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Unknown,
    Online,
    Offline,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Unknown => "unknown",
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
        }
    }
}

/// 设备状态变更事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub device_id: String,
    pub old_status: DeviceStatus,
    pub new_status: DeviceStatus,
    pub ts_ms: i64,
}

/// 良率采样，取值范围 [0, 100]。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YieldSample {
    pub ts_ms: i64,
    pub value: f64,
}

/// 流水线级故障事件（pipeline.error 主题的载荷）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFault {
    pub source: String,
    pub message: String,
    pub ts_ms: i64,
}
