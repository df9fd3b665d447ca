//! 元数据定义
//!
//! 提供服务属性集合和注册表约定使用的属性键

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 服务注册 ID
pub const SERVICE_ID: &str = "service.id";
/// 服务排名，数值越高优先级越高
pub const SERVICE_RANKING: &str = "service.ranking";
/// 服务提供的契约列表
pub const OBJECT_CLASS: &str = "objectClass";
/// 发布服务的组件名称
pub const COMPONENT_NAME: &str = "component.name";
/// 组件配置 pid
pub const SERVICE_PID: &str = "service.pid";
/// 仅在进程内可见的服务标记
pub const COMPONENT_INTERNAL: &str = "component.internal";

/// 服务属性集合
///
/// 键有序，值使用 JSON 表示，便于过滤器匹配和配置合并
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceProperties(BTreeMap<String, Value>);

impl ServiceProperties {
    /// 创建空属性集合
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// 添加属性（构建器风格）
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// 插入属性
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// 获取属性
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// 获取字符串属性
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// 移除属性
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// 是否包含属性
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// 属性数量
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 遍历属性
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// 用另一组属性覆盖当前属性，返回合并结果
    pub fn merged(&self, overlay: &ServiceProperties) -> ServiceProperties {
        let mut merged = self.clone();
        for (key, value) in overlay.iter() {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }

    /// 服务排名，缺省为 0；非整数值按 0 处理
    pub fn ranking(&self) -> i64 {
        self.0
            .get(SERVICE_RANKING)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// 服务注册 ID
    pub fn service_id(&self) -> Option<u64> {
        self.0.get(SERVICE_ID).and_then(Value::as_u64)
    }

    /// 是否为进程内服务
    pub fn is_internal(&self) -> bool {
        self.0
            .get(COMPONENT_INTERNAL)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl FromIterator<(String, Value)> for ServiceProperties {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for ServiceProperties {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Self(map)
    }
}

/// 监听器订阅 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription#{}", self.0)
    }
}
