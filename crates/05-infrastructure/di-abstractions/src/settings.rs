//! 组件注册表运行参数

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 组件注册表设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// 组件执行器线程名称
    pub actor_thread_name: String,
    /// 全局停用线程名称
    pub global_thread_name: String,
    /// 单个线程上激活链的最大深度
    pub max_activation_depth: usize,
    /// 未指定超时的查找使用的等待时间（毫秒）
    pub lookup_timeout_ms: u64,
}

impl RegistrySettings {
    /// 默认查找超时
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    /// 设置执行器线程名称
    pub fn with_actor_thread_name(mut self, name: impl Into<String>) -> Self {
        self.actor_thread_name = name.into();
        self
    }

    /// 设置最大激活深度
    pub fn with_max_activation_depth(mut self, depth: usize) -> Self {
        self.max_activation_depth = depth;
        self
    }

    /// 设置默认查找超时
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            actor_thread_name: "component-actor".to_string(),
            global_thread_name: "global-deactivation".to_string(),
            max_activation_depth: 64,
            lookup_timeout_ms: 5000,
        }
    }
}
