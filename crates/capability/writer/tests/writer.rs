use domain::{CanonicalRecord, PipelineFault};
use fab_bus::{BusEvent, EventBus, Subscription, Topic};
use fab_writer::{BatchWriter, PersistError, PersistenceSink, SinkPool, WriterConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// 可编程测试 sink：先失败指定次数，再记录提交的批次。
struct TestSink {
    attempts: AtomicU32,
    transient_failures: AtomicU32,
    permanent: bool,
    batches: Mutex<Vec<Vec<CanonicalRecord>>>,
}

impl TestSink {
    fn new() -> Arc<Self> {
        Self::failing(0, false)
    }

    fn failing(transient_failures: u32, permanent: bool) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicU32::new(0),
            transient_failures: AtomicU32::new(transient_failures),
            permanent,
            batches: Mutex::new(Vec::new()),
        })
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .expect("lock")
            .iter()
            .map(Vec::len)
            .collect()
    }
}

#[async_trait::async_trait]
impl PersistenceSink for TestSink {
    async fn commit(&self, records: &[CanonicalRecord]) -> Result<(), PersistError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.permanent {
            return Err(PersistError::Permanent("schema mismatch".to_string()));
        }
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PersistError::Transient("connection reset".to_string()));
        }
        self.batches.lock().expect("lock").push(records.to_vec());
        Ok(())
    }
}

fn record(device_id: &str, ts_ms: i64) -> Arc<CanonicalRecord> {
    let mut parameters = BTreeMap::new();
    parameters.insert("temperature".to_string(), 21.5);
    Arc::new(CanonicalRecord {
        device_id: device_id.to_string(),
        ts_ms,
        parameters,
        process_stage: None,
    })
}

fn config() -> WriterConfig {
    WriterConfig {
        batch_max_size: 4,
        batch_max_age_ms: 60_000,
        retry_max_attempts: 5,
        retry_base_backoff_ms: 1,
        retry_max_backoff_ms: 5,
        pool_exhausted_warn_after: 3,
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn next_fault(sub: &Subscription) -> PipelineFault {
    let event = tokio::time::timeout(Duration::from_secs(3), sub.recv())
        .await
        .expect("fault within deadline")
        .expect("bus open");
    match event {
        BusEvent::Fault(fault) => fault,
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn flushes_on_size_trigger_and_fails_leftovers_on_shutdown() {
    let bus = EventBus::new(64);
    let faults = bus.subscribe(Topic::PipelineError);
    let sink = TestSink::new();
    let pool = SinkPool::new(sink.clone(), 2, Duration::from_millis(100));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = BatchWriter::new(config(), pool, bus.clone()).spawn(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    for ts in 0..10 {
        bus.publish(Topic::TelemetryProcessed, BusEvent::Record(record("etch-01", ts)));
    }

    assert!(wait_until(|| sink.batch_sizes() == vec![4, 4]).await);

    // 停机时剩余 2 条未达任一触发条件，按硬失败上报
    shutdown_tx.send(true).expect("send shutdown");
    let fault = next_fault(&faults).await;
    assert_eq!(fault.source, "writer");
    handle.await.expect("writer task");
    assert_eq!(sink.batch_sizes(), vec![4, 4]);
}

#[tokio::test]
async fn full_load_commits_in_arrival_order() {
    let bus = EventBus::new(2048);
    let sink = TestSink::new();
    let pool = SinkPool::new(sink.clone(), 4, Duration::from_millis(100));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let writer_config = WriterConfig {
        batch_max_size: 500,
        ..config()
    };
    let _handle = BatchWriter::new(writer_config, pool, bus.clone()).spawn(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    for ts in 0..1500 {
        bus.publish(Topic::TelemetryProcessed, BusEvent::Record(record("etch-01", ts)));
    }

    assert!(wait_until(|| sink.batch_sizes() == vec![500, 500, 500]).await);
    let batches = sink.batches.lock().expect("lock");
    let mut expected = 0;
    for batch in batches.iter() {
        for committed in batch {
            assert_eq!(committed.ts_ms, expected);
            expected += 1;
        }
    }
}

#[tokio::test]
async fn flushes_on_age_trigger() {
    let bus = EventBus::new(64);
    let sink = TestSink::new();
    let pool = SinkPool::new(sink.clone(), 2, Duration::from_millis(100));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let writer_config = WriterConfig {
        batch_max_age_ms: 50,
        ..config()
    };
    let _handle = BatchWriter::new(writer_config, pool, bus.clone()).spawn(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    for ts in 0..3 {
        bus.publish(Topic::TelemetryProcessed, BusEvent::Record(record("etch-01", ts)));
    }

    assert!(wait_until(|| sink.batch_sizes() == vec![3]).await);
}

#[tokio::test]
async fn transient_failure_retries_until_success() {
    let bus = EventBus::new(64);
    let faults = bus.subscribe(Topic::PipelineError);
    let sink = TestSink::failing(2, false);
    let pool = SinkPool::new(sink.clone(), 2, Duration::from_millis(100));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let writer_config = WriterConfig {
        batch_max_age_ms: 20,
        ..config()
    };
    let _handle = BatchWriter::new(writer_config, pool, bus.clone()).spawn(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    bus.publish(Topic::TelemetryProcessed, BusEvent::Record(record("etch-01", 1)));

    assert!(wait_until(|| sink.batch_sizes() == vec![1]).await);
    assert_eq!(sink.attempts(), 3);
    assert!(faults.try_recv().is_none());
}

#[tokio::test]
async fn permanent_failure_skips_retries() {
    let bus = EventBus::new(64);
    let faults = bus.subscribe(Topic::PipelineError);
    let sink = TestSink::failing(0, true);
    let pool = SinkPool::new(sink.clone(), 2, Duration::from_millis(100));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let writer_config = WriterConfig {
        batch_max_age_ms: 20,
        ..config()
    };
    let _handle = BatchWriter::new(writer_config, pool, bus.clone()).spawn(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    bus.publish(Topic::TelemetryProcessed, BusEvent::Record(record("etch-01", 1)));

    let fault = next_fault(&faults).await;
    assert_eq!(fault.source, "writer");
    assert_eq!(sink.attempts(), 1);
    assert!(sink.batch_sizes().is_empty());
}

#[tokio::test]
async fn exhausted_retries_report_exactly_one_fault() {
    let bus = EventBus::new(64);
    let faults = bus.subscribe(Topic::PipelineError);
    let sink = TestSink::failing(u32::MAX, false);
    let pool = SinkPool::new(sink.clone(), 2, Duration::from_millis(100));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let writer_config = WriterConfig {
        batch_max_age_ms: 20,
        retry_max_attempts: 3,
        ..config()
    };
    let _handle = BatchWriter::new(writer_config, pool, bus.clone()).spawn(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    bus.publish(Topic::TelemetryProcessed, BusEvent::Record(record("etch-01", 1)));

    let fault = next_fault(&faults).await;
    assert_eq!(fault.source, "writer");
    assert_eq!(sink.attempts(), 3);
    assert!(sink.batch_sizes().is_empty());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(faults.try_recv().is_none());
}

#[tokio::test]
async fn pool_exhaustion_counts_as_transient() {
    let bus = EventBus::new(64);
    let faults = bus.subscribe(Topic::PipelineError);
    let sink = TestSink::new();
    let pool = SinkPool::new(sink.clone(), 1, Duration::from_millis(5));
    // 占住唯一许可证，写入端的每次获取都超时
    let held = pool.acquire().await.expect("acquire");
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let writer_config = WriterConfig {
        batch_max_age_ms: 20,
        retry_max_attempts: 2,
        ..config()
    };
    let _handle = BatchWriter::new(writer_config, pool, bus.clone()).spawn(shutdown_rx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    bus.publish(Topic::TelemetryProcessed, BusEvent::Record(record("etch-01", 1)));

    let fault = next_fault(&faults).await;
    assert!(fault.message.contains("pool exhausted"));
    assert_eq!(sink.attempts(), 0);
    drop(held);
}
