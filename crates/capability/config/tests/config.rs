use gateway_config::{AppConfig, ConfigError};
use std::path::Path;

// 环境变量为进程级共享状态，所有断言放在同一个测试中顺序执行。
#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::remove_var("GATEWAY_CONNECTOR_CONFIG");
    }
    assert!(matches!(AppConfig::from_env(), Err(ConfigError::Missing(_))));

    unsafe {
        std::env::set_var("GATEWAY_CONNECTOR_CONFIG", "config/modbus.json");
        std::env::set_var("GATEWAY_SCHEDULER", "off");
        std::env::set_var("GATEWAY_HOUSEKEEPING_INTERVAL_MS", "25");
    }
    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.connector_config, Path::new("config/modbus.json"));
    assert_eq!(config.connector_type, "modbus");
    assert!(!config.scheduler_enabled);
    assert_eq!(config.housekeeping_interval_ms, 25);
    assert_eq!(config.shutdown_timeout_ms, 5000);

    unsafe {
        std::env::set_var("GATEWAY_SHUTDOWN_TIMEOUT_MS", "soon");
    }
    assert!(matches!(
        AppConfig::from_env(),
        Err(ConfigError::Invalid(key, _)) if key == "GATEWAY_SHUTDOWN_TIMEOUT_MS"
    ));
}
