//! Postgres 时序写入实现。

use crate::sink::{PersistError, PersistenceSink};
use async_trait::async_trait;
use domain::CanonicalRecord;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Postgres sink。整批在单个事务内写入，每个参数一行。
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PersistError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(classify)?;
        Ok(Self { pool })
    }
}

/// 连接层面的错误可重试，其余（约束冲突、SQL 错误等）视为永久。
fn classify(err: sqlx::Error) -> PersistError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => PersistError::Transient(err.to_string()),
        other => PersistError::Permanent(other.to_string()),
    }
}

#[async_trait]
impl PersistenceSink for PgSink {
    async fn commit(&self, records: &[CanonicalRecord]) -> Result<(), PersistError> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(classify)?;
        for record in records {
            for (parameter, value) in &record.parameters {
                sqlx::query(
                    "insert into measurement (device_id, parameter, ts, value, process_stage) \
                     values ($1, $2, to_timestamp($3 / 1000.0), $4, $5)",
                )
                .bind(&record.device_id)
                .bind(parameter)
                .bind(record.ts_ms as f64)
                .bind(value)
                .bind(record.process_stage.as_deref())
                .execute(&mut *tx)
                .await
                .map_err(classify)?;
            }
        }
        tx.commit().await.map_err(classify)?;
        Ok(())
    }
}
