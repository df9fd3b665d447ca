//! 激活上下文
//!
//! 每次激活调用创建一个 [`ActivationContext`]，携带已定位的引用目标和配置快照，
//! 调用返回后即丢弃。

use crate::proxy::{ServiceProxy, ServiceProxyList};
use crate::registry::{Instance, ServiceHandle};
use chrono::{DateTime, Utc};
use infrastructure_common::{ConfigurationSnapshot, ConsumerId, ServiceProperties};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// 已解析的服务
#[derive(Clone)]
pub struct BoundService {
    /// 服务句柄
    pub handle: ServiceHandle,
    /// 服务实例
    pub instance: Instance,
}

impl BoundService {
    /// 创建绑定服务
    pub fn new(handle: ServiceHandle, instance: Instance) -> Self {
        Self { handle, instance }
    }
}

impl fmt::Debug for BoundService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundService")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// 引用的绑定结果
#[derive(Debug, Clone)]
pub enum BoundReference {
    /// 静态引用，激活期间不变
    Static(Vec<BoundService>),
    /// 单值动态引用
    Dynamic(ServiceProxy),
    /// 多值动态引用
    DynamicMultiple(ServiceProxyList),
}

impl BoundReference {
    /// 当前绑定的实例
    pub fn instances(&self) -> Vec<Instance> {
        match self {
            Self::Static(services) => services.iter().map(|s| s.instance.clone()).collect(),
            Self::Dynamic(proxy) => proxy.get().into_iter().collect(),
            Self::DynamicMultiple(list) => list.instances(),
        }
    }

    /// 当前绑定的句柄
    pub fn handles(&self) -> Vec<ServiceHandle> {
        match self {
            Self::Static(services) => services.iter().map(|s| s.handle.clone()).collect(),
            Self::Dynamic(proxy) => proxy.target().into_iter().collect(),
            Self::DynamicMultiple(list) => list.handles(),
        }
    }
}

/// 激活上下文
#[derive(Debug, Clone)]
pub struct ActivationContext {
    /// 上下文 ID
    pub id: Uuid,
    /// 组件名称
    pub component: String,
    /// 请求实例的消费者
    pub consumer: ConsumerId,
    /// 有效属性（组件属性叠加配置）
    pub properties: ServiceProperties,
    /// 配置快照
    pub configuration: Option<ConfigurationSnapshot>,
    /// 引用绑定
    pub references: HashMap<String, BoundReference>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
}

impl ActivationContext {
    /// 创建激活上下文
    pub fn new(
        component: impl Into<String>,
        consumer: ConsumerId,
        properties: ServiceProperties,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            component: component.into(),
            consumer,
            properties,
            configuration: None,
            references: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// 设置配置快照
    pub fn with_configuration(mut self, configuration: Option<ConfigurationSnapshot>) -> Self {
        self.configuration = configuration;
        self
    }

    /// 添加引用绑定
    pub fn with_reference(mut self, name: impl Into<String>, bound: BoundReference) -> Self {
        self.references.insert(name.into(), bound);
        self
    }

    /// 引用的第一个实例；可选引用未绑定时返回 None
    pub fn service(&self, reference: &str) -> Option<Instance> {
        self.services(reference).into_iter().next()
    }

    /// 引用的全部实例
    pub fn services(&self, reference: &str) -> Vec<Instance> {
        self.references
            .get(reference)
            .map(BoundReference::instances)
            .unwrap_or_default()
    }

    /// 引用的第一个实例并转换为具体类型
    pub fn service_as<T: Any + Send + Sync>(&self, reference: &str) -> Option<Arc<T>> {
        self.service(reference)?.downcast::<T>().ok()
    }

    /// 单值动态引用的代理
    pub fn proxy(&self, reference: &str) -> Option<&ServiceProxy> {
        match self.references.get(reference)? {
            BoundReference::Dynamic(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// 多值动态引用的代理列表
    pub fn proxies(&self, reference: &str) -> Option<&ServiceProxyList> {
        match self.references.get(reference)? {
            BoundReference::DynamicMultiple(list) => Some(list),
            _ => None,
        }
    }

    /// 有效属性
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}
