//! 引用绑定状态
//!
//! 每个引用一个 [`BindingState`]，由自己的锁保护；同一组件的不同引用可以在
//! 不同线程上同时更新。
//!
//! 绑定在组件第一次创建实例时捕获：
//!
//! - 静态引用捕获目标句柄，之后只有当前目标离开（或贪婪引用遇到排名更高的候选者）
//!   才要求重新激活；
//! - 动态引用创建代理，之后在代理内原地换绑。
//!
//! 未捕获时的事件只影响满足性。

use di_abstractions::{
    BoundReference, BoundService, ServiceEventKind, ServiceHandle, ServiceListener, ServiceProxy,
    ServiceProxyList, ServiceQuery, ServiceRegistry, ServiceResolver,
};
use infrastructure_common::{DependencyError, ReferenceDescriptor, SubscriptionId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 一次候选者变化对所属组件的影响
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingChange {
    /// 无影响
    Unchanged,
    /// 引用刚刚满足最小基数
    Satisfied,
    /// 引用低于最小基数
    Unsatisfied,
    /// 动态引用已原地换绑
    Rebound,
    /// 静态绑定失效，组件需要停用后重新激活
    Reactivate,
}

/// 事件处理结果；`released` 中的实例由调用方在锁外归还
#[derive(Debug)]
pub struct BindingUpdate {
    /// 影响
    pub change: BindingChange,
    /// 需要归还的实例
    pub released: Vec<BoundService>,
}

/// 一次激活捕获的绑定
#[derive(Debug)]
pub struct CapturedBinding {
    /// 交给 bean 容器的绑定
    pub bound: BoundReference,
    /// 本次解析的静态依赖，随实例销毁归还
    pub dependencies: Vec<BoundService>,
    /// 是否由本次调用首次捕获
    pub fresh: bool,
}

#[derive(Clone)]
enum DynamicTarget {
    Single(ServiceProxy),
    Multiple(ServiceProxyList),
}

#[derive(Default)]
struct BindingInner {
    /// 最近一次看到的候选者
    candidates: BTreeMap<u64, ServiceHandle>,
    /// 已捕获的静态目标
    bound: Option<Vec<ServiceHandle>>,
    /// 已捕获的动态代理
    dynamic: Option<DynamicTarget>,
    late_bind_pending: bool,
    subscription: Option<SubscriptionId>,
}

impl BindingInner {
    fn ranked(&self) -> Vec<ServiceHandle> {
        let mut handles: Vec<ServiceHandle> = self.candidates.values().cloned().collect();
        ServiceHandle::sort_best_first(&mut handles);
        handles
    }

    fn is_captured(&self) -> bool {
        self.bound.is_some() || self.dynamic.is_some()
    }
}

/// 单个引用的绑定状态
pub struct BindingState {
    component: Arc<str>,
    reference: ReferenceDescriptor,
    resolver: ServiceResolver,
    timeout: Duration,
    inner: Mutex<BindingInner>,
}

impl BindingState {
    /// 创建绑定状态
    pub fn new(
        component: Arc<str>,
        reference: ReferenceDescriptor,
        resolver: ServiceResolver,
        default_timeout: Duration,
    ) -> Self {
        let timeout = reference.timeout.unwrap_or(default_timeout);
        Self {
            component,
            reference,
            resolver,
            timeout,
            inner: Mutex::new(BindingInner::default()),
        }
    }

    /// 引用名称
    pub fn name(&self) -> &str {
        &self.reference.name
    }

    /// 引用描述符
    pub fn reference(&self) -> &ReferenceDescriptor {
        &self.reference
    }

    /// 解析器
    pub fn resolver(&self) -> &ServiceResolver {
        &self.resolver
    }

    /// 开始追踪候选者：先订阅再查找，避免漏掉中间发布的服务
    pub fn track(&self, registry: &dyn ServiceRegistry, listener: Arc<dyn ServiceListener>) {
        let query = ServiceQuery::for_reference(&self.reference);
        let subscription = registry.subscribe(query.clone(), listener);
        let initial = registry.lookup(&query);

        let mut inner = self.inner.lock();
        if let Some(previous) = inner.subscription.replace(subscription) {
            warn!("引用 {}.{} 重复追踪", self.component, self.reference.name);
            registry.unsubscribe(previous);
        }
        for handle in initial {
            inner.candidates.entry(handle.id()).or_insert(handle);
        }
        debug!(
            "追踪引用 {}.{}: {} 个候选者",
            self.component,
            self.reference.name,
            inner.candidates.len()
        );
    }

    /// 停止追踪
    pub fn untrack(&self, registry: &dyn ServiceRegistry) {
        let subscription = {
            let mut inner = self.inner.lock();
            inner.candidates.clear();
            inner.subscription.take()
        };
        if let Some(subscription) = subscription {
            registry.unsubscribe(subscription);
        }
    }

    /// 是否满足最小基数
    pub fn is_satisfied(&self) -> bool {
        self.inner.lock().candidates.len() >= self.reference.cardinality.min()
    }

    /// 按排名从高到低的候选者
    pub fn ranked_candidates(&self) -> Vec<ServiceHandle> {
        self.inner.lock().ranked()
    }

    /// 当前绑定的目标
    pub fn bound_targets(&self) -> Vec<ServiceHandle> {
        let inner = self.inner.lock();
        if let Some(bound) = &inner.bound {
            return bound.clone();
        }
        match &inner.dynamic {
            Some(DynamicTarget::Single(proxy)) => proxy.target().into_iter().collect(),
            Some(DynamicTarget::Multiple(list)) => list.handles(),
            None => Vec::new(),
        }
    }

    /// 是否已捕获绑定
    pub fn is_captured(&self) -> bool {
        self.inner.lock().is_captured()
    }

    /// 标记延迟绑定任务，已有待执行任务时返回 false
    pub fn mark_late_bind(&self) -> bool {
        let mut inner = self.inner.lock();
        !std::mem::replace(&mut inner.late_bind_pending, true)
    }

    /// 清除延迟绑定标记
    pub fn clear_late_bind(&self) {
        self.inner.lock().late_bind_pending = false;
    }

    /// 为实例创建捕获绑定
    ///
    /// 静态目标在锁外解析；解析可能递归创建其他组件。
    pub fn capture(&self) -> Result<CapturedBinding, DependencyError> {
        if self.reference.is_static() {
            self.capture_static()
        } else {
            Ok(self.capture_dynamic())
        }
    }

    fn capture_static(&self) -> Result<CapturedBinding, DependencyError> {
        let (targets, fresh) = {
            let mut inner = self.inner.lock();
            match &inner.bound {
                Some(bound) => (bound.clone(), false),
                None => {
                    let mut ranked = inner.ranked();
                    if !self.reference.cardinality.is_multiple() {
                        ranked.truncate(1);
                    }
                    inner.bound = Some(ranked.clone());
                    (ranked, true)
                }
            }
        };

        let mut dependencies = Vec::with_capacity(targets.len());
        for handle in &targets {
            match self.resolver.bind(handle) {
                Ok(service) => dependencies.push(service),
                Err(e) if e.is_circular() || !self.reference.cardinality.is_optional() => {
                    self.resolver.release_all(dependencies);
                    if fresh {
                        self.inner.lock().bound = None;
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "可选引用 {}.{} 解析 {} 失败，按未绑定处理: {}",
                        self.component, self.reference.name, handle, e
                    );
                }
            }
        }

        if dependencies.len() < self.reference.cardinality.min() {
            self.resolver.release_all(dependencies);
            if fresh {
                self.inner.lock().bound = None;
            }
            return Err(DependencyError::DependencyResolutionFailed {
                type_name: self.component.to_string(),
                message: format!("引用 {} 没有可用的目标", self.reference.name),
            });
        }

        if fresh {
            debug!(
                "静态引用 {}.{} 捕获 {} 个目标",
                self.component,
                self.reference.name,
                targets.len()
            );
        }
        Ok(CapturedBinding {
            bound: BoundReference::Static(dependencies.clone()),
            dependencies,
            fresh,
        })
    }

    fn capture_dynamic(&self) -> CapturedBinding {
        let mut inner = self.inner.lock();
        let fresh = inner.dynamic.is_none();
        if fresh {
            let ranked = inner.ranked();
            let target = if self.reference.cardinality.is_multiple() {
                let list = ServiceProxyList::new(
                    self.reference.name.clone(),
                    self.reference.contract.clone(),
                    self.resolver.clone(),
                    self.timeout,
                );
                list.retarget(ranked);
                DynamicTarget::Multiple(list)
            } else {
                let proxy = ServiceProxy::new(
                    self.reference.name.clone(),
                    self.reference.contract.clone(),
                    self.resolver.clone(),
                    self.timeout,
                );
                proxy.retarget(ranked.into_iter().next());
                DynamicTarget::Single(proxy)
            };
            inner.dynamic = Some(target);
        }

        let bound = match &inner.dynamic {
            Some(DynamicTarget::Multiple(list)) => BoundReference::DynamicMultiple(list.clone()),
            Some(DynamicTarget::Single(proxy)) => BoundReference::Dynamic(proxy.clone()),
            None => BoundReference::Static(Vec::new()),
        };
        CapturedBinding {
            bound,
            dependencies: Vec::new(),
            fresh,
        }
    }

    /// 撤销捕获，返回动态代理持有的实例
    pub fn unbind(&self) -> Vec<BoundService> {
        let mut inner = self.inner.lock();
        inner.bound = None;
        match inner.dynamic.take() {
            Some(DynamicTarget::Single(proxy)) => proxy.clear().into_iter().collect(),
            Some(DynamicTarget::Multiple(list)) => list.clear(),
            None => Vec::new(),
        }
    }

    /// 处理候选者变化
    pub fn on_event(&self, kind: ServiceEventKind, handle: &ServiceHandle) -> BindingUpdate {
        let mut inner = self.inner.lock();
        let min = self.reference.cardinality.min();
        let was_satisfied = inner.candidates.len() >= min;

        if kind.is_present() {
            inner.candidates.insert(handle.id(), handle.clone());
        } else {
            inner.candidates.remove(&handle.id());
        }
        let now_satisfied = inner.candidates.len() >= min;

        let mut released = Vec::new();
        let mut rebound = false;
        let mut reactivate = false;

        if let Some(bound) = inner.bound.as_mut() {
            let position = bound.iter().position(|b| b == handle);
            match (kind.is_present(), position) {
                (false, Some(_)) => {
                    info!(
                        "静态引用 {}.{} 的目标 {} 已离开",
                        self.component, self.reference.name, handle
                    );
                    reactivate = true;
                }
                (true, Some(index)) => bound[index] = handle.clone(),
                (true, None) if self.reference.is_greedy() => {
                    let preempts = bound.first().map_or(true, |current| handle.outranks(current));
                    if preempts {
                        info!(
                            "贪婪静态引用 {}.{} 遇到更高排名的目标 {}",
                            self.component, self.reference.name, handle
                        );
                        reactivate = true;
                    }
                }
                _ => {}
            }
        } else if let Some(dynamic) = inner.dynamic.clone() {
            let ranked = inner.ranked();
            match dynamic {
                DynamicTarget::Single(proxy) => {
                    let current = proxy.target();
                    let keep = current
                        .as_ref()
                        .filter(|_| !self.reference.is_greedy())
                        .and_then(|current| inner.candidates.get(&current.id()).cloned());
                    let next = keep.or_else(|| ranked.into_iter().next());
                    rebound = current.as_ref().map(ServiceHandle::id)
                        != next.as_ref().map(ServiceHandle::id);
                    released.extend(proxy.retarget(next));
                }
                DynamicTarget::Multiple(list) => {
                    let before: Vec<u64> = list.handles().iter().map(ServiceHandle::id).collect();
                    released.extend(list.retarget(ranked));
                    let after: Vec<u64> = list.handles().iter().map(ServiceHandle::id).collect();
                    rebound = before != after;
                }
            }
            if rebound {
                info!("动态引用 {}.{} 已换绑", self.component, self.reference.name);
            }
        }

        let change = if reactivate {
            BindingChange::Reactivate
        } else if was_satisfied && !now_satisfied {
            BindingChange::Unsatisfied
        } else if !was_satisfied && now_satisfied {
            BindingChange::Satisfied
        } else if rebound {
            BindingChange::Rebound
        } else {
            BindingChange::Unchanged
        };
        debug!(
            "引用 {}.{} 收到 {:?} {}: {:?}",
            self.component, self.reference.name, kind, handle, change
        );
        BindingUpdate { change, released }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_registry::LocalServiceRegistry;
    use di_abstractions::{Instance, ServiceRegistration};
    use infrastructure_common::{Cardinality, ConsumerId, ServiceProperties, SERVICE_RANKING};

    struct Fixture {
        registry: LocalServiceRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: LocalServiceRegistry::default(),
            }
        }

        fn binding(&self, reference: ReferenceDescriptor) -> BindingState {
            let resolver = ServiceResolver::new(
                Arc::new(self.registry.clone()),
                ConsumerId::new("consumer"),
            );
            BindingState::new(Arc::from("consumer"), reference, resolver, Duration::from_millis(50))
        }

        fn publish(&self, label: &str, ranking: i64) -> Arc<dyn ServiceRegistration> {
            let instance: Instance = Arc::new(label.to_string());
            self.registry
                .publish_instance(
                    "Storage",
                    instance,
                    ServiceProperties::new().with(SERVICE_RANKING, ranking),
                )
                .unwrap()
        }
    }

    fn single() -> ReferenceDescriptor {
        ReferenceDescriptor::builder("storage", "Storage").build().unwrap()
    }

    fn label(service: &BoundService) -> String {
        service.instance.downcast_ref::<String>().cloned().unwrap()
    }

    #[test]
    fn test_satisfaction_follows_minimum() {
        let fixture = Fixture::new();
        let binding = fixture.binding(single());
        assert!(!binding.is_satisfied());

        let a = fixture.publish("a", 0);
        let update = binding.on_event(ServiceEventKind::Added, &a.handle());
        assert_eq!(update.change, BindingChange::Satisfied);

        let update = binding.on_event(ServiceEventKind::Removed, &a.handle());
        assert_eq!(update.change, BindingChange::Unsatisfied);
    }

    #[test]
    fn test_static_reluctant_keeps_first_target() {
        let fixture = Fixture::new();
        let binding = fixture.binding(single());
        let a = fixture.publish("a", 0);
        binding.on_event(ServiceEventKind::Added, &a.handle());

        let captured = binding.capture().unwrap();
        assert!(captured.fresh);
        assert_eq!(label(&captured.dependencies[0]), "a");

        let b = fixture.publish("b", 1);
        let update = binding.on_event(ServiceEventKind::Added, &b.handle());
        assert_eq!(update.change, BindingChange::Unchanged);
        assert_eq!(binding.bound_targets(), vec![a.handle()]);

        let update = binding.on_event(ServiceEventKind::Removed, &a.handle());
        assert_eq!(update.change, BindingChange::Reactivate);
    }

    #[test]
    fn test_static_greedy_preempts_on_higher_ranking() {
        let fixture = Fixture::new();
        let binding = fixture.binding(
            ReferenceDescriptor::builder("storage", "Storage")
                .greedy()
                .build()
                .unwrap(),
        );
        let a = fixture.publish("a", 5);
        binding.on_event(ServiceEventKind::Added, &a.handle());
        binding.capture().unwrap();

        let lower = fixture.publish("lower", 1);
        assert_eq!(
            binding.on_event(ServiceEventKind::Added, &lower.handle()).change,
            BindingChange::Unchanged
        );

        let tie = fixture.publish("tie", 5);
        assert_eq!(
            binding.on_event(ServiceEventKind::Added, &tie.handle()).change,
            BindingChange::Unchanged
        );

        let higher = fixture.publish("higher", 9);
        assert_eq!(
            binding.on_event(ServiceEventKind::Added, &higher.handle()).change,
            BindingChange::Reactivate
        );
    }

    #[test]
    fn test_events_before_capture_only_affect_satisfaction() {
        let fixture = Fixture::new();
        let binding = fixture.binding(
            ReferenceDescriptor::builder("storage", "Storage")
                .greedy()
                .build()
                .unwrap(),
        );
        let a = fixture.publish("a", 0);
        binding.on_event(ServiceEventKind::Added, &a.handle());
        let b = fixture.publish("b", 1);
        assert_eq!(
            binding.on_event(ServiceEventKind::Added, &b.handle()).change,
            BindingChange::Unchanged
        );

        let captured = binding.capture().unwrap();
        assert_eq!(label(&captured.dependencies[0]), "b");
    }

    #[test]
    fn test_dynamic_reluctant_and_greedy() {
        let fixture = Fixture::new();
        let reluctant = fixture.binding(
            ReferenceDescriptor::builder("storage", "Storage")
                .dynamic()
                .build()
                .unwrap(),
        );
        let greedy = fixture.binding(
            ReferenceDescriptor::builder("storage", "Storage")
                .dynamic()
                .greedy()
                .build()
                .unwrap(),
        );
        let a = fixture.publish("a", 0);
        for binding in [&reluctant, &greedy] {
            binding.on_event(ServiceEventKind::Added, &a.handle());
            binding.capture().unwrap();
        }

        let b = fixture.publish("b", 3);
        assert_eq!(
            reluctant.on_event(ServiceEventKind::Added, &b.handle()).change,
            BindingChange::Unchanged
        );
        let update = greedy.on_event(ServiceEventKind::Added, &b.handle());
        assert_eq!(update.change, BindingChange::Rebound);
        assert_eq!(greedy.bound_targets(), vec![b.handle()]);

        let update = reluctant.on_event(ServiceEventKind::Removed, &a.handle());
        assert_eq!(update.change, BindingChange::Rebound);
        assert_eq!(reluctant.bound_targets(), vec![b.handle()]);
    }

    #[test]
    fn test_dynamic_proxy_releases_previous_instance() {
        let fixture = Fixture::new();
        let binding = fixture.binding(
            ReferenceDescriptor::builder("storage", "Storage")
                .dynamic()
                .greedy()
                .build()
                .unwrap(),
        );
        let a = fixture.publish("a", 0);
        binding.on_event(ServiceEventKind::Added, &a.handle());
        let captured = binding.capture().unwrap();
        let BoundReference::Dynamic(proxy) = captured.bound else {
            panic!("应为单值动态绑定");
        };
        assert!(proxy.get().is_some());

        let b = fixture.publish("b", 1);
        let update = binding.on_event(ServiceEventKind::Added, &b.handle());
        assert_eq!(update.released.len(), 1);
        assert_eq!(label(&update.released[0]), "a");
        let current = proxy.get().unwrap();
        assert_eq!(current.downcast_ref::<String>().unwrap(), "b");
    }

    #[test]
    fn test_dynamic_multiple_tracks_all_candidates() {
        let fixture = Fixture::new();
        let binding = fixture.binding(
            ReferenceDescriptor::builder("stores", "Storage")
                .cardinality(Cardinality::AtLeastOne)
                .dynamic()
                .build()
                .unwrap(),
        );
        let a = fixture.publish("a", 0);
        binding.on_event(ServiceEventKind::Added, &a.handle());
        let captured = binding.capture().unwrap();
        let BoundReference::DynamicMultiple(list) = captured.bound else {
            panic!("应为多值动态绑定");
        };
        let snapshot = list.snapshot();

        let b = fixture.publish("b", 2);
        assert_eq!(
            binding.on_event(ServiceEventKind::Added, &b.handle()).change,
            BindingChange::Rebound
        );
        assert_eq!(list.handles(), vec![b.handle(), a.handle()]);
        assert_eq!(snapshot.len(), 1);

        binding.on_event(ServiceEventKind::Removed, &b.handle());
        binding.on_event(ServiceEventKind::Removed, &a.handle());
        assert!(list.is_empty());
        assert!(!binding.is_satisfied());
    }

    #[test]
    fn test_mandatory_capture_without_targets_fails() {
        let fixture = Fixture::new();
        let binding = fixture.binding(single());
        assert!(binding.capture().is_err());
        assert!(!binding.is_captured());
    }

    #[test]
    fn test_late_bind_flag_is_deduplicated() {
        let fixture = Fixture::new();
        let binding = fixture.binding(single());
        assert!(binding.mark_late_bind());
        assert!(!binding.mark_late_bind());
        binding.clear_late_bind();
        assert!(binding.mark_late_bind());
    }
}
