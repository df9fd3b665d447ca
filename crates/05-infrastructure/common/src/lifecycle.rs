//! 组件生命周期定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 服务实例共享策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceScope {
    /// 单例模式 - 整个注册表内只创建一个实例
    #[default]
    Singleton,
    /// 按消费者模块 - 每个消费者模块一个实例
    PerConsumer,
    /// 按请求 - 每次查找都创建新实例
    PerRequest,
}

impl fmt::Display for ServiceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Singleton => "singleton",
            Self::PerConsumer => "per-consumer",
            Self::PerRequest => "per-request",
        };
        f.write_str(name)
    }
}

/// 生命周期管理器状态
///
/// `Disabled → Satisfying → Activating → Active → Deactivating → (Satisfying | Disabled)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LifecycleState {
    /// 未启用
    #[default]
    Disabled,
    /// 等待依赖满足
    Satisfying,
    /// 依赖已满足，正在激活
    Activating,
    /// 已激活
    Active,
    /// 正在停用
    Deactivating,
}

impl LifecycleState {
    /// 是否处于过渡状态
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Activating | Self::Deactivating)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "DISABLED",
            Self::Satisfying => "SATISFYING",
            Self::Activating => "ACTIVATING",
            Self::Active => "ACTIVE",
            Self::Deactivating => "DEACTIVATING",
        };
        f.write_str(name)
    }
}

/// 消费者身份
///
/// 由调用方（知道当前模块的外部协作者）显式传入，
/// 按消费者作用域使用它来区分实例
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsumerId(Arc<str>);

impl ConsumerId {
    /// 创建消费者身份
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// 获取字符串表示
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConsumerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConsumerId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}
