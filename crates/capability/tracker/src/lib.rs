//! 设备在线状态跟踪。
//!
//! 任何规范化记录都视为心跳。后台扫描按固定间隔检查心跳年龄，
//! 连续缺失达到阈值才判离线（抖动消抖），每次状态变更恰好发布一次。

use domain::{DeviceStatus, StatusChange, now_epoch_ms};
use fab_bus::{BusEvent, EventBus, Topic};
use fab_telemetry::record_status_transition;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// 跟踪器参数。
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub heartbeat_interval_ms: u64,
    /// 心跳年龄超过 multiplier × interval 记一次缺失
    pub heartbeat_miss_multiplier: u32,
    /// 连续缺失达到该值转为 Offline
    pub offline_miss_threshold: u32,
    pub sweep_interval_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5000,
            heartbeat_miss_multiplier: 2,
            offline_miss_threshold: 6,
            sweep_interval_ms: 5000,
        }
    }
}

/// 单设备状态。仅由跟踪器变更。
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub device_id: String,
    pub status: DeviceStatus,
    pub last_heartbeat_ms: i64,
    pub consecutive_misses: u32,
}

/// 设备状态跟踪器。
pub struct DeviceTracker {
    config: TrackerConfig,
    bus: EventBus,
    states: Mutex<HashMap<String, DeviceState>>,
}

impl DeviceTracker {
    pub fn new(config: TrackerConfig, bus: EventBus) -> Self {
        Self {
            config,
            bus,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// 处理一次心跳。乱序到达不会回拨 last_heartbeat。
    pub fn observe(&self, device_id: &str, ts_ms: i64) {
        let change = {
            let mut states = match self.states.lock() {
                Ok(states) => states,
                Err(_) => return,
            };
            let state = states
                .entry(device_id.to_string())
                .or_insert_with(|| DeviceState {
                    device_id: device_id.to_string(),
                    status: DeviceStatus::Unknown,
                    last_heartbeat_ms: 0,
                    consecutive_misses: 0,
                });
            state.last_heartbeat_ms = state.last_heartbeat_ms.max(ts_ms);
            state.consecutive_misses = 0;
            if state.status != DeviceStatus::Online {
                let old_status = state.status;
                state.status = DeviceStatus::Online;
                Some(StatusChange {
                    device_id: device_id.to_string(),
                    old_status,
                    new_status: DeviceStatus::Online,
                    ts_ms,
                })
            } else {
                None
            }
        };
        if let Some(change) = change {
            self.publish(change);
        }
    }

    /// 一次离线扫描。对每个在线设备检查心跳年龄并累计缺失。
    pub fn sweep(&self, now_ms: i64) {
        let miss_age =
            (self.config.heartbeat_interval_ms * self.config.heartbeat_miss_multiplier as u64)
                as i64;
        let mut changes = Vec::new();
        {
            let mut states = match self.states.lock() {
                Ok(states) => states,
                Err(_) => return,
            };
            for state in states.values_mut() {
                if state.status != DeviceStatus::Online {
                    continue;
                }
                if now_ms.saturating_sub(state.last_heartbeat_ms) <= miss_age {
                    continue;
                }
                state.consecutive_misses += 1;
                if state.consecutive_misses >= self.config.offline_miss_threshold {
                    state.status = DeviceStatus::Offline;
                    changes.push(StatusChange {
                        device_id: state.device_id.clone(),
                        old_status: DeviceStatus::Online,
                        new_status: DeviceStatus::Offline,
                        ts_ms: now_ms,
                    });
                }
            }
        }
        for change in changes {
            self.publish(change);
        }
    }

    /// 全部设备状态快照。
    pub fn states(&self) -> Vec<DeviceState> {
        self.states
            .lock()
            .map(|states| states.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn state(&self, device_id: &str) -> Option<DeviceState> {
        self.states
            .lock()
            .ok()
            .and_then(|states| states.get(device_id).cloned())
    }

    fn publish(&self, change: StatusChange) {
        record_status_transition();
        info!(
            target: "fab.tracker",
            device_id = %change.device_id,
            old_status = change.old_status.as_str(),
            new_status = change.new_status.as_str(),
            ts_ms = change.ts_ms,
            "device_status_changed"
        );
        self.bus.publish(Topic::DeviceStatus, BusEvent::Status(change));
    }
}

/// 启动跟踪任务：消费 telemetry.processed 作为心跳，按间隔扫描离线。
pub fn spawn(tracker: Arc<DeviceTracker>, bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let subscription = bus.subscribe(Topic::TelemetryProcessed);
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(tracker.config().sweep_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(BusEvent::Record(record)) => {
                        tracker.observe(&record.device_id, record.ts_ms);
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = ticker.tick() => tracker.sweep(now_epoch_ms()),
            }
        }
    })
}
