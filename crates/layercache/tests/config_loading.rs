use std::{env, fs};

use layercache::{CacheError, load_settings};

#[test]
fn settings_file_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("layercache.toml");

    let toml_content = r#"
prefix = "user:"

[local]
capacity = 2
ttl_secs = 1

[redis]
enabled = true
url = "redis://cache.internal:6379"
pool_size = 4
operation_timeout_ms = 250

[retry]
singleflight = true
attempts = 5

[backfill]
queue_capacity = 16
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) File values and field defaults
    let settings = load_settings(path.to_str()).expect("should parse settings");
    assert_eq!(settings.prefix, "user:");
    assert_eq!(settings.local.capacity, 2);
    assert_eq!(settings.local.ttl_secs, 1);
    assert!(settings.redis.enabled);
    assert_eq!(settings.redis.pool_size, 4);
    assert_eq!(settings.redis.timeout_ms, 5000);
    assert_eq!(settings.redis.operation_timeout_ms, 250);
    assert!(settings.retry.enabled);
    assert!(settings.retry.singleflight);
    assert_eq!(settings.retry.policy().attempts(), 5);
    assert_eq!(settings.backfill.queue_capacity, 16);

    // 2) Env override wins over file
    unsafe {
        env::set_var("LAYERCACHE__LOCAL__CAPACITY", "7");
    }
    let overridden = load_settings(path.to_str()).expect("should parse with env overrides");
    assert_eq!(overridden.local.capacity, 7);
    unsafe {
        env::remove_var("LAYERCACHE__LOCAL__CAPACITY");
    }

    // 3) Invalid values are rejected
    fs::write(
        &path,
        r#"
[local]
capacity = 0
"#,
    )
    .expect("rewrite toml");
    let err = load_settings(path.to_str()).expect_err("zero capacity must fail");
    assert!(matches!(err, CacheError::Config(_)));

    // 4) Missing explicit file is an error
    let missing = dir.path().join("missing.toml");
    assert!(load_settings(missing.to_str()).is_err());
}
