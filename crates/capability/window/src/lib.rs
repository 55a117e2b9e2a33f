//! 滚动窗口缓存。
//!
//! 按 (device_id, parameter) 维护固定容量的环形缓冲，供观测接口
//! 查询最近历史。序列按首条样本懒创建，写满后覆盖最旧样本。

use domain::CanonicalRecord;
use fab_bus::{BusEvent, EventBus, Topic};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// 单点样本。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointSample {
    pub ts_ms: i64,
    pub value: f64,
}

/// 固定容量环形缓冲。head 指向下一个写入槽位。
struct Ring {
    slots: Vec<PointSample>,
    capacity: usize,
    head: usize,
    len: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, sample: PointSample) {
        if self.len < self.capacity {
            self.slots.push(sample);
            self.len += 1;
        } else {
            self.slots[self.head] = sample;
        }
        self.head = (self.head + 1) % self.capacity;
    }

    /// 按到达顺序（旧到新）返回全部样本。
    fn snapshot(&self) -> Vec<PointSample> {
        if self.len < self.capacity {
            return self.slots.clone();
        }
        let mut out = Vec::with_capacity(self.len);
        for offset in 0..self.len {
            out.push(self.slots[(self.head + offset) % self.len]);
        }
        out
    }
}

/// 滚动窗口缓存。
pub struct WindowCache {
    capacity: usize,
    series: RwLock<HashMap<(String, String), Ring>>,
}

impl WindowCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 记录的每个参数各追加一个样本。
    pub fn ingest(&self, record: &CanonicalRecord) {
        let mut series = match self.series.write() {
            Ok(series) => series,
            Err(_) => return,
        };
        for (parameter, value) in &record.parameters {
            let key = (record.device_id.clone(), parameter.clone());
            series
                .entry(key)
                .or_insert_with(|| Ring::new(self.capacity))
                .push(PointSample {
                    ts_ms: record.ts_ms,
                    value: *value,
                });
        }
    }

    /// 指定序列的最近样本（旧到新）。不存在的序列返回空。
    pub fn history(&self, device_id: &str, parameter: &str) -> Vec<PointSample> {
        self.series
            .read()
            .ok()
            .and_then(|series| {
                series
                    .get(&(device_id.to_string(), parameter.to_string()))
                    .map(Ring::snapshot)
            })
            .unwrap_or_default()
    }

    /// 出现过样本的设备列表，排序去重。
    pub fn devices(&self) -> Vec<String> {
        let mut devices: Vec<String> = self
            .series
            .read()
            .map(|series| series.keys().map(|(device, _)| device.clone()).collect())
            .unwrap_or_default();
        devices.sort();
        devices.dedup();
        devices
    }

    /// 指定设备出现过的参数列表，排序。
    pub fn parameters(&self, device_id: &str) -> Vec<String> {
        let mut parameters: Vec<String> = self
            .series
            .read()
            .map(|series| {
                series
                    .keys()
                    .filter(|(device, _)| device == device_id)
                    .map(|(_, parameter)| parameter.clone())
                    .collect()
            })
            .unwrap_or_default();
        parameters.sort();
        parameters
    }
}

/// 启动窗口缓存任务：消费 telemetry.processed 并填充缓存。
pub fn spawn(cache: Arc<WindowCache>, bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let subscription = bus.subscribe(Topic::TelemetryProcessed);
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if let BusEvent::Record(record) = event {
                cache.ingest(&record);
            }
        }
    })
}
