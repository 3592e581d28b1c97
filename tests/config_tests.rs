// Config loading and validation tests

use std::time::Duration;

use metricsd::config::AppConfig;
use metricsd::reaggregator::RollupSchedule;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"
request_timeout = "30s"

[auth]
user = "admin"
password = "secret"

[database]
path = "data/metrics.db"
max_pool_size = 10

[query]
forgiveness = 0.2

[staging]
cleanup_interval = "1m"
flush_timeout = "5s"

[rollup]
schedule = "0 5 0 * * *"

[[rollup.buckets]]
target = "30m"
age = "1day"
source = "1m"

[[rollup.buckets]]
target = "1h"
age = "7days"
source = "30m"
"#;

const MINIMAL_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[auth]
user = "admin"
password = "secret"

[database]
path = "data/metrics.db"
max_pool_size = 4
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.request_timeout, Duration::from_secs(30));
    assert_eq!(config.auth.user, "admin");
    assert_eq!(config.database.path, "data/metrics.db");
    assert_eq!(config.query.forgiveness, 0.2);
    assert_eq!(config.staging.flush_timeout, Duration::from_secs(5));
    assert_eq!(config.rollup.buckets.len(), 2);
    assert_eq!(config.rollup.buckets[1].target, Duration::from_secs(3600));
    assert_eq!(config.rollup.buckets[1].age, Duration::from_secs(7 * 24 * 3600));
    assert_eq!(config.rollup.buckets[1].source, Duration::from_secs(30 * 60));
    assert!(matches!(config.rollup.schedule(), RollupSchedule::Cron(ref s) if s == "0 5 0 * * *"));
}

#[test]
fn test_config_defaults() {
    let config = AppConfig::load_from_str(MINIMAL_CONFIG).expect("load_from_str");
    assert_eq!(config.server.request_timeout, Duration::from_secs(60));
    assert_eq!(config.database.busy_timeout, Duration::from_secs(5));
    assert_eq!(config.query.forgiveness, 0.25);
    assert_eq!(config.staging.cleanup_interval, Duration::from_secs(60));
    assert_eq!(config.staging.flush_timeout, Duration::from_secs(10));
    assert!(config.rollup.enabled);
    assert_eq!(config.rollup.buckets.len(), 1);
    assert_eq!(config.rollup.buckets[0].target, Duration::from_secs(30 * 60));
    assert!(matches!(
        config.rollup.schedule(),
        RollupSchedule::Every(d) if d == Duration::from_secs(24 * 3600)
    ));
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_password() {
    let bad = VALID_CONFIG.replace("password = \"secret\"", "password = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("auth.password"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = VALID_CONFIG.replace("path = \"data/metrics.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validation_rejects_max_pool_size_zero() {
    let bad = VALID_CONFIG.replace("max_pool_size = 10", "max_pool_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_pool_size"));
}

#[test]
fn test_config_validation_rejects_forgiveness_out_of_range() {
    let bad = VALID_CONFIG.replace("forgiveness = 0.2", "forgiveness = 1.5");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("query.forgiveness"));
}

#[test]
fn test_config_validation_rejects_zero_flush_timeout() {
    let bad = VALID_CONFIG.replace("flush_timeout = \"5s\"", "flush_timeout = \"0s\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("staging.flush_timeout"));
}

#[test]
fn test_config_validation_rejects_bad_cron() {
    let bad = VALID_CONFIG.replace("0 5 0 * * *", "every night");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("rollup.schedule"));
}

#[test]
fn test_config_validation_rejects_bucket_not_coarser_than_source() {
    let bad = VALID_CONFIG.replace("target = \"1h\"", "target = \"15m\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("rollup.buckets[1]"));
}

#[test]
fn test_config_rejects_unparseable_duration() {
    let bad = VALID_CONFIG.replace("request_timeout = \"30s\"", "request_timeout = \"soon\"");
    assert!(AppConfig::load_from_str(&bad).is_err());
}
