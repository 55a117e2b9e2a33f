//! sink 连接池。
//!
//! 固定数量的许可证约束并发提交；获取超时返回 `Exhausted`，
//! 由写入端作为瞬态失败处理。

use crate::sink::{PersistError, PersistenceSink};
use domain::CanonicalRecord;
use fab_telemetry::record_pool_exhausted;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 连接池错误。
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("sink pool exhausted")]
    Exhausted,
}

/// 固定容量的 sink 连接池。
pub struct SinkPool {
    sink: Arc<dyn PersistenceSink>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

impl SinkPool {
    /// `size` 为最大并发提交数；`acquire_timeout` 为许可证获取上限。
    pub fn new(sink: Arc<dyn PersistenceSink>, size: usize, acquire_timeout: Duration) -> Self {
        Self {
            sink,
            permits: Arc::new(Semaphore::new(size.max(1))),
            acquire_timeout,
        }
    }

    /// 获取一个池化 sink；超时视为池耗尽。
    pub async fn acquire(&self) -> Result<PooledSink, PoolError> {
        let permit =
            tokio::time::timeout(self.acquire_timeout, self.permits.clone().acquire_owned())
                .await
                .map_err(|_| {
                    record_pool_exhausted();
                    PoolError::Exhausted
                })?
                .map_err(|_| PoolError::Exhausted)?;
        Ok(PooledSink {
            sink: self.sink.clone(),
            _permit: permit,
        })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// 池化 sink 句柄。丢弃即归还许可证。
pub struct PooledSink {
    sink: Arc<dyn PersistenceSink>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSink {
    pub async fn commit(&self, records: &[CanonicalRecord]) -> Result<(), PersistError> {
        self.sink.commit(records).await
    }
}
