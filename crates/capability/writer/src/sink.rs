//! 持久化接口与内存实现。
//!
//! 内存实现仅用于本地测试和占位。

use async_trait::async_trait;
use domain::CanonicalRecord;
use std::sync::RwLock;

/// 持久化错误。瞬态错误可重试，永久错误立即硬失败。
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("transient persistence error: {0}")]
    Transient(String),
    #[error("permanent persistence error: {0}")]
    Permanent(String),
}

impl PersistError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistError::Transient(_))
    }
}

/// 持久化 sink。一次 `commit` 写入整个批次，全有或全无。
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn commit(&self, records: &[CanonicalRecord]) -> Result<(), PersistError>;
}

/// 内存 sink。
pub struct InMemorySink {
    records: RwLock<Vec<CanonicalRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// 当前累计的记录条数（用于测试）。
    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.records
            .read()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceSink for InMemorySink {
    async fn commit(&self, records: &[CanonicalRecord]) -> Result<(), PersistError> {
        let mut stored = self
            .records
            .write()
            .map_err(|_| PersistError::Permanent("lock failed".to_string()))?;
        stored.extend_from_slice(records);
        Ok(())
    }
}
