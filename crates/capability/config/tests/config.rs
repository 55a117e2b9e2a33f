use fab_config::AppConfig;

// 两段校验放在同一个测试内，避免并行测试串改进程级环境变量。
#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("FAB_HTTP_ADDR", "127.0.0.1:8081");
        std::env::set_var("FAB_BATCH_MAX_SIZE", "200");
        std::env::set_var("FAB_OFFLINE_MISS_THRESHOLD", "4");
        std::env::set_var("FAB_YIELD_PASS_THRESHOLD", "85.5");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.http_addr, "127.0.0.1:8081");
    assert_eq!(config.batch_max_size, 200);
    assert_eq!(config.offline_miss_threshold, 4);
    assert_eq!(config.yield_pass_threshold, 85.5);
    // 未显式设置的键取默认值
    assert_eq!(config.heartbeat_interval_ms, 5000);
    assert_eq!(config.retry_max_attempts, 5);
    assert_eq!(config.window_capacity, 100);
    assert_eq!(config.bus_queue_capacity, 1024);
    assert!(config.database_url.is_none());

    // 非法数值被拒绝
    unsafe {
        std::env::set_var("FAB_CONNECTION_POOL_SIZE", "many");
    }
    let err = AppConfig::from_env().expect_err("invalid pool size");
    assert!(err.to_string().contains("FAB_CONNECTION_POOL_SIZE"));
    unsafe {
        std::env::remove_var("FAB_CONNECTION_POOL_SIZE");
    }
}
