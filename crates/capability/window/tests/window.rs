use domain::CanonicalRecord;
use fab_bus::{BusEvent, EventBus, Topic};
use fab_window::{WindowCache, spawn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn record(device_id: &str, ts_ms: i64, params: &[(&str, f64)]) -> CanonicalRecord {
    CanonicalRecord {
        device_id: device_id.to_string(),
        ts_ms,
        parameters: params
            .iter()
            .map(|(key, value)| (key.to_string(), *value))
            .collect::<BTreeMap<String, f64>>(),
        process_stage: None,
    }
}

#[test]
fn series_created_lazily_per_device_and_parameter() {
    let cache = WindowCache::new(100);
    assert!(cache.devices().is_empty());

    cache.ingest(&record("etch-01", 1_000, &[("temperature", 21.5), ("pressure", 0.93)]));
    cache.ingest(&record("cvd-02", 1_000, &[("rf_power", 1500.0)]));

    assert_eq!(cache.devices(), vec!["cvd-02", "etch-01"]);
    assert_eq!(cache.parameters("etch-01"), vec!["pressure", "temperature"]);
    assert_eq!(cache.parameters("cvd-02"), vec!["rf_power"]);
    assert!(cache.history("etch-01", "rf_power").is_empty());
}

#[test]
fn history_evicts_oldest_beyond_capacity() {
    let cache = WindowCache::new(100);
    for ts in 0..130 {
        cache.ingest(&record("etch-01", ts, &[("temperature", ts as f64)]));
    }

    let history = cache.history("etch-01", "temperature");
    assert_eq!(history.len(), 100);
    assert_eq!(history.first().map(|s| s.ts_ms), Some(30));
    assert_eq!(history.last().map(|s| s.ts_ms), Some(129));
    for window in history.windows(2) {
        assert!(window[0].ts_ms < window[1].ts_ms);
    }
}

#[test]
fn one_record_feeds_every_parameter_series() {
    let cache = WindowCache::new(10);
    cache.ingest(&record("etch-01", 5_000, &[("temperature", 21.5), ("endpoint", 0.42)]));

    assert_eq!(cache.history("etch-01", "temperature").len(), 1);
    assert_eq!(cache.history("etch-01", "endpoint").len(), 1);
    assert_eq!(cache.history("etch-01", "endpoint")[0].value, 0.42);
}

#[tokio::test]
async fn consumer_task_fills_cache_from_bus() {
    let bus = EventBus::new(64);
    let cache = Arc::new(WindowCache::new(10));
    let handle = spawn(cache.clone(), &bus);

    for ts in 0..3 {
        bus.publish(
            Topic::TelemetryProcessed,
            BusEvent::Record(Arc::new(record("etch-01", ts, &[("temperature", 20.0 + ts as f64)]))),
        );
    }

    // 等待消费任务排空队列
    for _ in 0..50 {
        if cache.history("etch-01", "temperature").len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(cache.history("etch-01", "temperature").len(), 3);

    bus.close();
    handle.await.expect("consumer task");
}
