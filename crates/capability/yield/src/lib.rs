//! 良率计算。
//!
//! 携带良率参数的记录参与统计：滚动窗口内的通过率即当前良率。
//! 变化超过阈值或发布间隔到期时向 yield.updated 发布一次采样，
//! 两者先到先触发，避免高频记录刷爆下游。

use domain::{CanonicalRecord, YieldSample, now_epoch_ms};
use fab_bus::{BusEvent, EventBus, Topic};
use fab_telemetry::record_yield_update;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::info;

/// 良率计算参数。
#[derive(Debug, Clone)]
pub struct YieldConfig {
    /// 参与统计的参数键
    pub parameter: String,
    /// 取值不低于该阈值记为通过
    pub pass_threshold: f64,
    /// 滚动窗口内保留的判定结果数
    pub window_records: usize,
    /// 变化超过该值立即发布
    pub epsilon: f64,
    pub publish_interval_ms: u64,
}

impl Default for YieldConfig {
    fn default() -> Self {
        Self {
            parameter: "yield".to_string(),
            pass_threshold: 90.0,
            window_records: 1000,
            epsilon: 0.5,
            publish_interval_ms: 5000,
        }
    }
}

struct YieldState {
    outcomes: VecDeque<bool>,
    passes: usize,
    last_published_value: Option<f64>,
    last_published_at_ms: i64,
}

/// 滚动良率计算器。
pub struct YieldCalculator {
    config: YieldConfig,
    bus: EventBus,
    state: Mutex<YieldState>,
}

impl YieldCalculator {
    pub fn new(config: YieldConfig, bus: EventBus) -> Self {
        let window_records = config.window_records.max(1);
        Self {
            config: YieldConfig {
                window_records,
                ..config
            },
            bus,
            state: Mutex::new(YieldState {
                outcomes: VecDeque::with_capacity(window_records),
                passes: 0,
                last_published_value: None,
                last_published_at_ms: 0,
            }),
        }
    }

    /// 处理一条记录；发生发布时返回采样。
    pub fn observe(&self, record: &CanonicalRecord, now_ms: i64) -> Option<YieldSample> {
        let value = *record.parameters.get(&self.config.parameter)?;
        let pass = value >= self.config.pass_threshold;

        let sample = {
            let mut state = self.state.lock().ok()?;
            if state.outcomes.len() >= self.config.window_records {
                if state.outcomes.pop_front() == Some(true) {
                    state.passes -= 1;
                }
            }
            state.outcomes.push_back(pass);
            if pass {
                state.passes += 1;
            }
            let current =
                (100.0 * state.passes as f64 / state.outcomes.len() as f64).clamp(0.0, 100.0);

            let should_publish = match state.last_published_value {
                None => true,
                Some(previous) => {
                    (current - previous).abs() > self.config.epsilon
                        || now_ms.saturating_sub(state.last_published_at_ms)
                            >= self.config.publish_interval_ms as i64
                }
            };
            if !should_publish {
                return None;
            }
            state.last_published_value = Some(current);
            state.last_published_at_ms = now_ms;
            YieldSample {
                ts_ms: now_ms,
                value: current,
            }
        };

        record_yield_update();
        info!(
            target: "fab.yield",
            value = sample.value,
            ts_ms = sample.ts_ms,
            "yield_updated"
        );
        self.bus.publish(Topic::YieldUpdated, BusEvent::Yield(sample));
        Some(sample)
    }

    /// 当前良率（窗口为空时为 `None`）。
    pub fn value(&self) -> Option<f64> {
        self.state.lock().ok().and_then(|state| {
            if state.outcomes.is_empty() {
                None
            } else {
                Some((100.0 * state.passes as f64 / state.outcomes.len() as f64).clamp(0.0, 100.0))
            }
        })
    }
}

/// 启动良率任务：消费 telemetry.processed。
pub fn spawn(calculator: Arc<YieldCalculator>, bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let subscription = bus.subscribe(Topic::TelemetryProcessed);
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if let BusEvent::Record(record) = event {
                calculator.observe(&record, now_epoch_ms());
            }
        }
    })
}
