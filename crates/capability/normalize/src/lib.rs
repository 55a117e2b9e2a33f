use domain::{CanonicalRecord, RawMessage};
use serde_json::Value;
use std::collections::BTreeMap;

/// 规范化错误。调用方计数并丢弃，不进入总线。
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// 报文键的归类结果。
enum FieldKind {
    /// 数值参数，携带规范名
    Parameter(&'static str),
    /// 未识别的键，按原名透传（需为数值）
    Passthrough,
    /// 工艺段（process_stage）
    Stage,
    /// 设备时间戳
    Timestamp,
    /// 文本元数据（recipe/lot/wafer/equipment），不进入参数表
    Metadata,
    /// 嵌套气体流量对象
    Gas,
}

/// 设备上行使用的短字段名映射。
fn classify(key: &str) -> FieldKind {
    match key {
        "t" | "temp" | "temperature" => FieldKind::Parameter("temperature"),
        "p" | "pressure" => FieldKind::Parameter("pressure"),
        "rf" | "rf_power" => FieldKind::Parameter("rf_power"),
        "ep" | "endpoint" => FieldKind::Parameter("endpoint"),
        "hum" | "humidity" => FieldKind::Parameter("humidity"),
        "vib" | "vibration" => FieldKind::Parameter("vibration"),
        "fe" | "focus_error" => FieldKind::Parameter("focus_error"),
        "yld" | "yield" => FieldKind::Parameter("yield"),
        "ch" | "channel" => FieldKind::Parameter("channel"),
        "st" | "step" | "stage" => FieldKind::Stage,
        "ts" => FieldKind::Timestamp,
        "rt" | "recipe" | "lot" | "wf" | "wafer_id" | "eq" | "equipment" => FieldKind::Metadata,
        "g" => FieldKind::Gas,
        _ => FieldKind::Passthrough,
    }
}

/// RawMessage -> CanonicalRecord 规范化器。无跨调用状态。
#[derive(Debug, Clone, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// 校验并规范化一条原始报文。
    ///
    /// 失败的报文由调用方丢弃并计数，成功的记录保证至少含一个数值参数。
    pub fn normalize(&self, message: &RawMessage) -> Result<CanonicalRecord, NormalizeError> {
        if message.device_id.trim().is_empty() {
            return Err(NormalizeError::UnknownDevice(message.topic.clone()));
        }

        let value: Value = serde_json::from_slice(&message.payload)
            .map_err(|err| NormalizeError::MalformedPayload(err.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| NormalizeError::MalformedPayload("expected json object".to_string()))?;

        let mut parameters = BTreeMap::new();
        let mut process_stage = None;
        let mut device_ts = None;

        for (key, field) in object {
            match classify(key) {
                FieldKind::Parameter(name) => {
                    parameters.insert(name.to_string(), numeric(key, field)?);
                }
                FieldKind::Passthrough => {
                    parameters.insert(key.clone(), numeric(key, field)?);
                }
                FieldKind::Stage => {
                    process_stage = Some(stage_text(field)?);
                }
                FieldKind::Timestamp => {
                    device_ts = field.as_f64();
                }
                FieldKind::Metadata => {}
                FieldKind::Gas => {
                    let gases = field.as_object().ok_or_else(|| {
                        NormalizeError::MalformedPayload("gas field must be an object".to_string())
                    })?;
                    for (gas, flow) in gases {
                        parameters.insert(format!("gas_{gas}"), numeric(gas, flow)?);
                    }
                }
            }
        }

        if parameters.is_empty() {
            return Err(NormalizeError::MalformedPayload(
                "no numeric parameters".to_string(),
            ));
        }

        Ok(CanonicalRecord {
            device_id: message.device_id.clone(),
            ts_ms: normalize_ts(device_ts, message.received_at_ms),
            parameters,
            process_stage,
        })
    }
}

fn numeric(key: &str, value: &Value) -> Result<f64, NormalizeError> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| NormalizeError::MalformedPayload(format!("non-numeric value for {key}")))
}

fn stage_text(value: &Value) -> Result<String, NormalizeError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(NormalizeError::MalformedPayload(
            "process stage must be string or number".to_string(),
        )),
    }
}

/// 设备时间戳统一到毫秒；微秒/秒刻度按量级识别。
fn normalize_ts(device_ts: Option<f64>, received_at_ms: i64) -> i64 {
    let Some(ts) = device_ts else {
        return received_at_ms;
    };
    if !ts.is_finite() || ts <= 0.0 {
        return received_at_ms;
    }
    if ts > 1e14 {
        // 微秒刻度
        (ts / 1000.0) as i64
    } else if ts < 1e11 {
        // 秒刻度
        (ts * 1000.0) as i64
    } else {
        ts as i64
    }
}
