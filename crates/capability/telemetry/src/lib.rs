//! 追踪初始化与流水线指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 流水线指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub raw_messages: u64,
    pub normalized_records: u64,
    pub dropped_malformed: u64,
    pub dropped_unknown_device: u64,
    pub bus_published: u64,
    pub bus_overflow: u64,
    pub batch_commit_success: u64,
    pub batch_commit_failure: u64,
    pub batch_retries: u64,
    pub records_persisted: u64,
    pub pool_exhausted: u64,
    pub status_transitions: u64,
    pub yield_updates: u64,
}

/// 流水线指标（进程级计数器）。
pub struct PipelineMetrics {
    raw_messages: AtomicU64,
    normalized_records: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_unknown_device: AtomicU64,
    bus_published: AtomicU64,
    bus_overflow: AtomicU64,
    batch_commit_success: AtomicU64,
    batch_commit_failure: AtomicU64,
    batch_retries: AtomicU64,
    records_persisted: AtomicU64,
    pool_exhausted: AtomicU64,
    status_transitions: AtomicU64,
    yield_updates: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            raw_messages: AtomicU64::new(0),
            normalized_records: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            dropped_unknown_device: AtomicU64::new(0),
            bus_published: AtomicU64::new(0),
            bus_overflow: AtomicU64::new(0),
            batch_commit_success: AtomicU64::new(0),
            batch_commit_failure: AtomicU64::new(0),
            batch_retries: AtomicU64::new(0),
            records_persisted: AtomicU64::new(0),
            pool_exhausted: AtomicU64::new(0),
            status_transitions: AtomicU64::new(0),
            yield_updates: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            raw_messages: self.raw_messages.load(Ordering::Relaxed),
            normalized_records: self.normalized_records.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unknown_device: self.dropped_unknown_device.load(Ordering::Relaxed),
            bus_published: self.bus_published.load(Ordering::Relaxed),
            bus_overflow: self.bus_overflow.load(Ordering::Relaxed),
            batch_commit_success: self.batch_commit_success.load(Ordering::Relaxed),
            batch_commit_failure: self.batch_commit_failure.load(Ordering::Relaxed),
            batch_retries: self.batch_retries.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            pool_exhausted: self.pool_exhausted.load(Ordering::Relaxed),
            status_transitions: self.status_transitions.load(Ordering::Relaxed),
            yield_updates: self.yield_updates.load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static PipelineMetrics {
    METRICS.get_or_init(PipelineMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录原始报文接收次数。
pub fn record_raw_message() {
    metrics().raw_messages.fetch_add(1, Ordering::Relaxed);
}

/// 记录规范化输出次数。
pub fn record_normalized_record() {
    metrics().normalized_records.fetch_add(1, Ordering::Relaxed);
}

/// 记录畸形报文丢弃次数。
pub fn record_dropped_malformed() {
    metrics().dropped_malformed.fetch_add(1, Ordering::Relaxed);
}

/// 记录无设备标识丢弃次数。
pub fn record_dropped_unknown_device() {
    metrics()
        .dropped_unknown_device
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录总线发布次数。
pub fn record_bus_published() {
    metrics().bus_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录订阅者队列溢出（丢弃最旧事件）次数。
pub fn record_bus_overflow() {
    metrics().bus_overflow.fetch_add(1, Ordering::Relaxed);
}

/// 记录批次提交成功次数。
pub fn record_batch_commit_success() {
    metrics()
        .batch_commit_success
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录批次硬失败次数（重试耗尽或永久错误）。
pub fn record_batch_commit_failure() {
    metrics()
        .batch_commit_failure
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录批次重试次数。
pub fn record_batch_retry() {
    metrics().batch_retries.fetch_add(1, Ordering::Relaxed);
}

/// 记录持久化成功的记录条数。
pub fn record_records_persisted(count: u64) {
    metrics()
        .records_persisted
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录连接池获取超时次数。
pub fn record_pool_exhausted() {
    metrics().pool_exhausted.fetch_add(1, Ordering::Relaxed);
}

/// 记录设备状态变更次数。
pub fn record_status_transition() {
    metrics().status_transitions.fetch_add(1, Ordering::Relaxed);
}

/// 记录良率发布次数。
pub fn record_yield_update() {
    metrics().yield_updates.fetch_add(1, Ordering::Relaxed);
}
