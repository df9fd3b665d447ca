//! 组件配置快照

use crate::errors::ConfigError;
use crate::metadata::ServiceProperties;
use serde::{Deserialize, Serialize};

/// 某个 pid 在某一时刻的配置快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
    /// 配置 pid
    pub pid: String,
    /// 配置属性
    pub properties: ServiceProperties,
    /// 修订号，每次更新递增
    pub revision: u64,
}

impl ConfigurationSnapshot {
    /// 创建新的配置快照
    pub fn new(pid: impl Into<String>, properties: ServiceProperties, revision: u64) -> Self {
        Self {
            pid: pid.into(),
            properties,
            revision,
        }
    }

    /// 获取配置项
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    /// 绑定到具体类型
    pub fn bind<T>(&self) -> Result<T, ConfigError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = serde_json::to_value(&self.properties)?;
        serde_json::from_value(value).map_err(|e| ConfigError::SerializationError { source: e })
    }
}
