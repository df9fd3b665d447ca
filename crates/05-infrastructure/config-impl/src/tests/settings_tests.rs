//! 注册表设置加载测试

use crate::settings::load_settings;
use di_abstractions::RegistrySettings;
use infrastructure_common::ConfigError;
use std::io::Write;
use std::time::Duration;

/// 测试不指定文件时使用默认值
#[test]
fn test_defaults_without_file() {
    let settings = load_settings(None).unwrap();
    assert_eq!(settings, RegistrySettings::default());
    assert_eq!(settings.lookup_timeout(), Duration::from_millis(5000));
}

/// 测试 TOML 文件覆盖部分字段
#[test]
fn test_toml_file_overrides_fields() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "actor_thread_name = \"engine-actor\"").unwrap();
    writeln!(file, "max_activation_depth = 8").unwrap();

    let settings = load_settings(Some(file.path())).unwrap();
    assert_eq!(settings.actor_thread_name, "engine-actor");
    assert_eq!(settings.max_activation_depth, 8);
    assert_eq!(settings.global_thread_name, "global-deactivation");
}

/// 测试 JSON 文件
#[test]
fn test_json_file_is_supported() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(file, r#"{{ "lookup_timeout_ms": 250 }}"#).unwrap();

    let settings = load_settings(Some(file.path())).unwrap();
    assert_eq!(settings.lookup_timeout(), Duration::from_millis(250));
}

/// 测试显式指定的文件不存在
#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("registry.toml");

    let result = load_settings(Some(&missing));
    assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
}

/// 测试非法的激活深度
#[test]
fn test_zero_depth_is_rejected() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "max_activation_depth = 0").unwrap();

    let result = load_settings(Some(file.path()));
    assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
}
