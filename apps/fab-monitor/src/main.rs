//! 遥测流水线守护进程。
//!
//! 显式构造总线与各组件并注入依赖，随后启动 HTTP 观测面。
//! ctrl-c 触发停机：写入端先把在途批次收尾，再关闭总线。

mod handlers;
mod pipeline;
mod routes;

use fab_bus::{BusEvent, EventBus, Topic};
use fab_config::AppConfig;
use fab_ingest::{MqttSource, MqttSourceConfig, RawMessageHandler, Source};
use fab_telemetry::init_tracing;
use fab_tracker::{DeviceTracker, TrackerConfig};
use fab_window::WindowCache;
use fab_writer::{BatchWriter, InMemorySink, PersistenceSink, PgSink, SinkPool, WriterConfig};
use fab_yield::{YieldCalculator, YieldConfig};
use pipeline::PipelineHandler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Clone)]
struct AppState {
    bus: EventBus,
    tracker: Arc<DeviceTracker>,
    window: Arc<WindowCache>,
    yield_calc: Arc<YieldCalculator>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    let bus = EventBus::new(config.bus_queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 设备状态跟踪
    let tracker = Arc::new(DeviceTracker::new(
        TrackerConfig {
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            heartbeat_miss_multiplier: config.heartbeat_miss_multiplier,
            offline_miss_threshold: config.offline_miss_threshold,
            sweep_interval_ms: config.sweep_interval_ms,
        },
        bus.clone(),
    ));
    fab_tracker::spawn(tracker.clone(), &bus);

    // 滚动窗口缓存
    let window = Arc::new(WindowCache::new(config.window_capacity));
    fab_window::spawn(window.clone(), &bus);

    // 良率计算
    let yield_calc = Arc::new(YieldCalculator::new(
        YieldConfig {
            parameter: config.yield_parameter.clone(),
            pass_threshold: config.yield_pass_threshold,
            window_records: config.yield_window_records,
            epsilon: config.yield_epsilon,
            publish_interval_ms: config.yield_publish_interval_ms,
        },
        bus.clone(),
    ));
    fab_yield::spawn(yield_calc.clone(), &bus);

    // 批量持久化：无数据库连接串时落内存 sink（仅演示/测试）
    let sink: Arc<dyn PersistenceSink> = match &config.database_url {
        Some(url) => Arc::new(PgSink::connect(url, config.connection_pool_size as u32).await?),
        None => {
            warn!(target: "fab.app", "in_memory_sink_selected");
            Arc::new(InMemorySink::new())
        }
    };
    let pool = SinkPool::new(
        sink,
        config.connection_pool_size,
        Duration::from_millis(config.acquire_timeout_ms),
    );
    BatchWriter::new(
        WriterConfig {
            batch_max_size: config.batch_max_size,
            batch_max_age_ms: config.batch_max_age_ms,
            retry_max_attempts: config.retry_max_attempts,
            retry_base_backoff_ms: config.retry_base_backoff_ms,
            ..WriterConfig::default()
        },
        pool,
        bus.clone(),
    )
    .spawn(shutdown_rx.clone());

    spawn_fault_logger(&bus);

    // MQTT 接入
    if config.ingest_enabled {
        let source = MqttSource::new(MqttSourceConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            topic_prefix: config.mqtt_topic_prefix.clone(),
        });
        let handler: Arc<dyn RawMessageHandler> = Arc::new(PipelineHandler::new(bus.clone()));
        tokio::spawn(async move {
            if let Err(err) = source.run(handler).await {
                error!(target: "fab.app", error = %err, "ingest_source_exited");
            }
        });
    } else {
        info!(target: "fab.app", "ingest_disabled");
    }

    // ctrl-c：先通知写入端收尾，再关总线让消费任务退出
    let bus_for_shutdown = bus.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(target: "fab.app", "shutdown_signal_received");
            let _ = shutdown_tx.send(true);
            bus_for_shutdown.close();
        }
    });

    let state = AppState {
        bus,
        tracker,
        window,
        yield_calc,
    };
    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(target: "fab.app", addr = %config.http_addr, "http_listening");
    let mut http_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = http_shutdown.changed().await;
        })
        .await?;
    Ok(())
}

/// 把 pipeline.error 上的故障落到日志，保证丢失永远可见。
fn spawn_fault_logger(bus: &EventBus) {
    let subscription = bus.subscribe(Topic::PipelineError);
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            if let BusEvent::Fault(fault) = event {
                error!(
                    target: "fab.app",
                    source = %fault.source,
                    message = %fault.message,
                    ts_ms = fault.ts_ms,
                    "pipeline_fault"
                );
            }
        }
    });
}
