//! 注册表设置加载
//!
//! 依次叠加可选的配置文件（按扩展名识别 TOML/JSON/YAML）与
//! `COMPONENT_REGISTRY__` 前缀的环境变量，例如
//! `COMPONENT_REGISTRY__MAX_ACTIVATION_DEPTH=32`。

use di_abstractions::RegistrySettings;
use infrastructure_common::ConfigError;
use std::path::Path;
use tracing::{debug, error};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "COMPONENT_REGISTRY";

/// 加载注册表设置
///
/// 显式指定的文件不存在时返回 [`ConfigError::FileNotFound`]
pub fn load_settings(path: Option<&Path>) -> Result<RegistrySettings, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        debug!("加载注册表设置文件: {}", path.display());
        builder = builder.add_source(config::File::from(path));
    }

    let settings = builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()
        .map_err(|e| {
            error!("注册表设置构建失败: {}", e);
            ConfigError::ParseError {
                source: Box::new(e),
            }
        })?;

    let settings: RegistrySettings = settings.try_deserialize().map_err(|e| {
        error!("注册表设置绑定失败: {}", e);
        ConfigError::ParseError {
            source: Box::new(e),
        }
    })?;

    if settings.max_activation_depth == 0 {
        return Err(ConfigError::ValidationError {
            message: "max_activation_depth 必须大于 0".to_string(),
        });
    }

    Ok(settings)
}
