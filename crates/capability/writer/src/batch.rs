//! 批次组装与提交循环。

use crate::pool::{PoolError, SinkPool};
use crate::sink::PersistError;
use domain::{CanonicalRecord, PipelineFault, now_epoch_ms};
use fab_bus::{BusEvent, EventBus, Topic};
use fab_telemetry::{
    record_batch_commit_failure, record_batch_commit_success, record_batch_retry,
    record_records_persisted,
};
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{error, info, warn};
use uuid::Uuid;

/// 写入参数。
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// 条数触发阈值
    pub batch_max_size: usize,
    /// 年龄触发阈值（首条记录入批起算）
    pub batch_max_age_ms: u64,
    /// 单批最大提交尝试次数
    pub retry_max_attempts: u32,
    pub retry_base_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    /// 连续池耗尽达到该值时告警
    pub pool_exhausted_warn_after: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_max_size: 500,
            batch_max_age_ms: 1000,
            retry_max_attempts: 5,
            retry_base_backoff_ms: 200,
            retry_max_backoff_ms: 5000,
            pool_exhausted_warn_after: 3,
        }
    }
}

/// 一个待提交批次。`attempt` 记录已消耗的提交尝试数。
#[derive(Debug)]
pub struct BatchEnvelope {
    pub batch_id: Uuid,
    pub records: Vec<CanonicalRecord>,
    pub attempt: u32,
    pub created_at_ms: i64,
}

/// 批量写入器。
pub struct BatchWriter {
    config: WriterConfig,
    pool: SinkPool,
    bus: EventBus,
}

impl BatchWriter {
    pub fn new(config: WriterConfig, pool: SinkPool, bus: EventBus) -> Self {
        Self { config, pool, bus }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// 主循环：攒批、双触发冲刷、响应停机。
    ///
    /// 停机或总线关闭时未冲刷的批次按硬失败上报，丢失必须可见。
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let subscription = self.bus.subscribe(Topic::TelemetryProcessed);
        let mut pending: Vec<CanonicalRecord> = Vec::new();
        let mut deadline: Option<Instant> = None;
        let mut consecutive_exhausted = 0u32;

        loop {
            let flush_at =
                deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(BusEvent::Record(record)) => {
                        if pending.is_empty() {
                            deadline = Some(
                                Instant::now()
                                    + Duration::from_millis(self.config.batch_max_age_ms),
                            );
                        }
                        pending.push((*record).clone());
                        if pending.len() >= self.config.batch_max_size {
                            let envelope = seal(&mut pending, &mut deadline);
                            self.commit_with_retry(
                                envelope,
                                &mut shutdown,
                                &mut consecutive_exhausted,
                            )
                            .await;
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                _ = sleep_until(flush_at), if deadline.is_some() => {
                    let envelope = seal(&mut pending, &mut deadline);
                    self.commit_with_retry(envelope, &mut shutdown, &mut consecutive_exhausted)
                        .await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow_and_update() {
                        break;
                    }
                }
            }
        }

        if !pending.is_empty() {
            let envelope = seal(&mut pending, &mut deadline);
            self.fail(envelope, "shutdown before flush".to_string());
        }
    }

    /// 提交一个批次，瞬态失败按指数退避重试。
    async fn commit_with_retry(
        &self,
        mut envelope: BatchEnvelope,
        shutdown: &mut watch::Receiver<bool>,
        consecutive_exhausted: &mut u32,
    ) {
        loop {
            envelope.attempt += 1;
            let outcome = match self.pool.acquire().await {
                Ok(sink) => {
                    *consecutive_exhausted = 0;
                    sink.commit(&envelope.records).await
                }
                Err(PoolError::Exhausted) => {
                    *consecutive_exhausted += 1;
                    if *consecutive_exhausted >= self.config.pool_exhausted_warn_after {
                        warn!(
                            target: "fab.writer",
                            consecutive = *consecutive_exhausted,
                            "sink_pool_exhausted_repeatedly"
                        );
                    }
                    Err(PersistError::Transient("sink pool exhausted".to_string()))
                }
            };

            match outcome {
                Ok(()) => {
                    record_batch_commit_success();
                    record_records_persisted(envelope.records.len() as u64);
                    info!(
                        target: "fab.writer",
                        batch_id = %envelope.batch_id,
                        records = envelope.records.len(),
                        attempt = envelope.attempt,
                        "batch_committed"
                    );
                    return;
                }
                Err(PersistError::Permanent(message)) => {
                    self.fail(envelope, message);
                    return;
                }
                Err(PersistError::Transient(message)) => {
                    if envelope.attempt >= self.config.retry_max_attempts {
                        self.fail(envelope, message);
                        return;
                    }
                    record_batch_retry();
                    let delay = self.backoff_delay(envelope.attempt);
                    warn!(
                        target: "fab.writer",
                        batch_id = %envelope.batch_id,
                        attempt = envelope.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "batch_commit_retry"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow_and_update() {
                                self.fail(envelope, "shutdown during retry".to_string());
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// 硬失败：计数、记日志、上报 pipeline.error，然后丢弃批次。
    fn fail(&self, envelope: BatchEnvelope, message: String) {
        record_batch_commit_failure();
        error!(
            target: "fab.writer",
            batch_id = %envelope.batch_id,
            records = envelope.records.len(),
            attempt = envelope.attempt,
            error = %message,
            "batch_commit_failed"
        );
        self.bus.publish(
            Topic::PipelineError,
            BusEvent::Fault(PipelineFault {
                source: "writer".to_string(),
                message,
                ts_ms: now_epoch_ms(),
            }),
        );
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(10);
        let exponential = self
            .config
            .retry_base_backoff_ms
            .saturating_mul(1u64 << shift);
        let capped = exponential.min(self.config.retry_max_backoff_ms);
        let jitter_ms = rand::rng().random_range(0..=100);
        Duration::from_millis(capped + jitter_ms)
    }
}

fn seal(pending: &mut Vec<CanonicalRecord>, deadline: &mut Option<Instant>) -> BatchEnvelope {
    *deadline = None;
    BatchEnvelope {
        batch_id: Uuid::new_v4(),
        records: std::mem::take(pending),
        attempt: 0,
        created_at_ms: now_epoch_ms(),
    }
}
