//! 服务注册表门面接口
//!
//! 组件引擎只消费注册表的发布、查找、订阅通知，不关心其实现方式。
//! 进程内实现见 `di-impl` 的 `LocalServiceRegistry`。

use crate::factory::ServiceFactory;
use infrastructure_common::{
    ConsumerId, DependencyError, Filter, ReferenceDescriptor, RegistryError, ServiceProperties,
    SubscriptionId, COMPONENT_INTERNAL,
};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 服务实例
pub type Instance = Arc<dyn Any + Send + Sync>;

/// 服务句柄
///
/// 注册 ID、契约列表和属性快照。属性变化后注册表会产生同 ID 的新句柄，
/// 相等性只比较注册 ID。
#[derive(Clone)]
pub struct ServiceHandle(Arc<HandleInner>);

struct HandleInner {
    id: u64,
    contracts: Vec<String>,
    properties: ServiceProperties,
}

impl ServiceHandle {
    /// 创建服务句柄
    pub fn new(id: u64, contracts: Vec<String>, properties: ServiceProperties) -> Self {
        Self(Arc::new(HandleInner {
            id,
            contracts,
            properties,
        }))
    }

    /// 注册 ID
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// 契约列表
    pub fn contracts(&self) -> &[String] {
        &self.0.contracts
    }

    /// 属性快照
    pub fn properties(&self) -> &ServiceProperties {
        &self.0.properties
    }

    /// 服务排名
    pub fn ranking(&self) -> i64 {
        self.0.properties.ranking()
    }

    /// 是否提供指定契约
    pub fn provides(&self, contract: &str) -> bool {
        self.0.contracts.iter().any(|c| c == contract)
    }

    /// 是否为进程内服务
    pub fn is_internal(&self) -> bool {
        self.0.properties.is_internal()
    }

    /// 排名比较
    ///
    /// 按排名升序；排名相同时注册 ID 越大越靠后（同排名下最早注册者胜出）。
    /// 返回 `Greater` 表示 `self` 优于 `other`。
    pub fn compare_ranking(&self, other: &ServiceHandle) -> Ordering {
        self.ranking()
            .cmp(&other.ranking())
            .then_with(|| other.id().cmp(&self.id()))
    }

    /// 是否严格优于另一个句柄
    pub fn outranks(&self, other: &ServiceHandle) -> bool {
        self.compare_ranking(other) == Ordering::Greater
    }

    /// 按排名从高到低排序
    pub fn sort_best_first(handles: &mut [ServiceHandle]) {
        handles.sort_by(|a, b| b.compare_ranking(a));
    }
}

impl PartialEq for ServiceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ServiceHandle {}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.0.id)
            .field("contracts", &self.0.contracts)
            .field("ranking", &self.ranking())
            .finish()
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.contracts.join(","), self.0.id)
    }
}

/// 服务查询条件：契约 + 可选属性过滤器
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceQuery {
    /// 目标契约
    pub contract: String,
    /// 属性过滤器
    pub filter: Option<Filter>,
    /// 只在进程内服务中查找
    pub internal: bool,
}

impl ServiceQuery {
    /// 按契约查询
    pub fn new(contract: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            filter: None,
            internal: false,
        }
    }

    /// 引用对应的查询条件
    pub fn for_reference(reference: &ReferenceDescriptor) -> Self {
        Self {
            contract: reference.contract.clone(),
            filter: reference.filter.clone(),
            internal: reference.internal,
        }
    }

    /// 设置过滤器
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// 只匹配进程内服务
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// 句柄是否满足查询
    pub fn matches(&self, handle: &ServiceHandle) -> bool {
        handle.provides(&self.contract)
            && self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(handle.properties()))
    }
}

impl fmt::Display for ServiceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.contract)?;
        if let Some(filter) = &self.filter {
            write!(f, "{filter}")?;
        }
        if self.internal {
            write!(f, " [{COMPONENT_INTERNAL}]")?;
        }
        Ok(())
    }
}

/// 服务事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceEventKind {
    /// 新服务匹配
    Added,
    /// 属性变化后仍然匹配
    Modified,
    /// 属性变化后不再匹配
    ModifiedEndMatch,
    /// 服务撤销
    Removed,
}

impl ServiceEventKind {
    /// 事件之后句柄是否仍是候选者
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Added | Self::Modified)
    }
}

/// 服务事件监听器
///
/// 注册表可能在多个线程上并发投递，同一契约内保持先后顺序
pub trait ServiceListener: Send + Sync {
    /// 处理服务事件
    fn service_changed(&self, kind: ServiceEventKind, handle: &ServiceHandle);
}

/// 发布的服务对象
#[derive(Clone)]
pub enum ServiceObject {
    /// 直接发布的实例
    Instance(Instance),
    /// 按消费者创建实例的工厂
    Factory(Arc<dyn ServiceFactory>),
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("ServiceObject::Instance"),
            Self::Factory(_) => f.write_str("ServiceObject::Factory"),
        }
    }
}

/// 服务注册凭据
pub trait ServiceRegistration: Send + Sync {
    /// 当前句柄
    fn handle(&self) -> ServiceHandle;

    /// 替换服务属性（注册 ID 与契约保持不变）
    fn set_properties(&self, properties: ServiceProperties) -> Result<(), RegistryError>;

    /// 撤销服务，重复调用无效果
    fn unpublish(&self);
}

/// 服务注册表门面
pub trait ServiceRegistry: Send + Sync {
    /// 发布服务
    fn publish(
        &self,
        contracts: Vec<String>,
        service: ServiceObject,
        properties: ServiceProperties,
    ) -> Result<Arc<dyn ServiceRegistration>, RegistryError>;

    /// 查找匹配的服务，按排名从高到低返回
    fn lookup(&self, query: &ServiceQuery) -> Vec<ServiceHandle>;

    /// 为消费者获取服务实例
    fn resolve(
        &self,
        handle: &ServiceHandle,
        consumer: &ConsumerId,
    ) -> Result<Instance, DependencyError>;

    /// 归还服务实例
    fn release(&self, handle: &ServiceHandle, consumer: &ConsumerId, instance: &Instance);

    /// 订阅匹配查询的服务事件
    fn subscribe(&self, query: ServiceQuery, listener: Arc<dyn ServiceListener>) -> SubscriptionId;

    /// 取消订阅
    fn unsubscribe(&self, subscription: SubscriptionId);

    /// 等待匹配的服务出现，超时返回 `LookupTimeout`
    fn wait_for(
        &self,
        query: &ServiceQuery,
        timeout: Duration,
    ) -> Result<ServiceHandle, DependencyError> {
        let waiter = Arc::new(ServiceWaiter::default());
        let subscription = self.subscribe(query.clone(), waiter.clone());

        if let Some(handle) = self.lookup(query).into_iter().next() {
            self.unsubscribe(subscription);
            return Ok(handle);
        }

        let deadline = Instant::now() + timeout;
        let found = {
            let mut found = waiter.found.lock();
            while found.is_none() {
                if waiter.arrived.wait_until(&mut found, deadline).timed_out() {
                    break;
                }
            }
            found.take()
        };
        self.unsubscribe(subscription);

        found.ok_or_else(|| DependencyError::LookupTimeout {
            contract: query.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }
}

#[derive(Default)]
struct ServiceWaiter {
    found: Mutex<Option<ServiceHandle>>,
    arrived: Condvar,
}

impl ServiceListener for ServiceWaiter {
    fn service_changed(&self, kind: ServiceEventKind, handle: &ServiceHandle) {
        if kind.is_present() {
            let mut found = self.found.lock();
            if found.is_none() {
                *found = Some(handle.clone());
                self.arrived.notify_all();
            }
        }
    }
}
