//! 批量持久化写入。
//!
//! 订阅 telemetry.processed，按条数或年龄双触发打包成批次，
//! 经连接池化的 sink 事务性落库；瞬态失败指数退避重试，
//! 硬失败显式上报 pipeline.error，绝不静默丢数据。

mod batch;
mod pool;
mod postgres;
mod sink;

pub use batch::{BatchEnvelope, BatchWriter, WriterConfig};
pub use pool::{PoolError, PooledSink, SinkPool};
pub use postgres::PgSink;
pub use sink::{InMemorySink, PersistError, PersistenceSink};
