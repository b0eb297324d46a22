use mgw_config::AppConfig;

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("MGW_MODBUS_HOST", "192.168.1.100");
        std::env::set_var("MGW_POINTS_FILE", "/etc/mgw/points.json");
        std::env::set_var("MGW_MODBUS_PORT", "1502");
        std::env::set_var("MGW_POLL_INTERVAL_MS", "8000");
        std::env::set_var("MGW_ABS_TOLERANCE", "0.01");
        std::env::set_var("MGW_AUTO_RECONNECT", "off");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.modbus_host, "192.168.1.100");
    assert_eq!(config.points_file, "/etc/mgw/points.json");
    assert_eq!(config.modbus_port, 1502);
    assert_eq!(config.poll_interval_ms, 8000);
    assert_eq!(config.abs_tolerance, 0.01);
    assert!(!config.auto_reconnect);

    // 未设置的项回落默认值
    assert_eq!(config.modbus_unit_id, 1);
    assert_eq!(config.poll_batch_size, 8);
    assert_eq!(config.poll_batch_delay_ms, 200);
    assert_eq!(config.failure_threshold, 5);
    assert_eq!(config.force_insert_interval_ms, 3_600_000);
    assert!(config.database_url.is_none());
}
