pub mod data;

pub use data::{
    CanonicalRecord, DeviceStatus, PipelineFault, RawMessage, StatusChange, YieldSample,
};

/// 当前 Unix 时间戳（毫秒）。各 crate 共享的时间基准。
pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
