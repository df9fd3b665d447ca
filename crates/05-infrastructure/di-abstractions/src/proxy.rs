//! 动态引用代理
//!
//! 单值动态引用以 [`ServiceProxy`] 呈现给组件实例，目标句柄在代理自己的锁内替换，
//! 实例在锁外延迟解析。多值动态引用以 [`ServiceProxyList`] 呈现，
//! 换绑时替换整个快照，正在遍历的旧快照不受影响。

use crate::registry::{Instance, ServiceHandle, ServiceRegistry};
use crate::resolver::BoundService;
use infrastructure_common::{ConsumerId, DependencyError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// 以某个消费者身份解析服务
#[derive(Clone)]
pub struct ServiceResolver {
    registry: Arc<dyn ServiceRegistry>,
    consumer: ConsumerId,
}

impl ServiceResolver {
    /// 创建解析器
    pub fn new(registry: Arc<dyn ServiceRegistry>, consumer: ConsumerId) -> Self {
        Self { registry, consumer }
    }

    /// 消费者身份
    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }

    /// 解析服务实例
    pub fn resolve(&self, handle: &ServiceHandle) -> Result<Instance, DependencyError> {
        self.registry.resolve(handle, &self.consumer)
    }

    /// 解析并打包为绑定服务
    pub fn bind(&self, handle: &ServiceHandle) -> Result<BoundService, DependencyError> {
        let instance = self.resolve(handle)?;
        Ok(BoundService::new(handle.clone(), instance))
    }

    /// 归还服务实例
    pub fn release(&self, bound: &BoundService) {
        self.registry
            .release(&bound.handle, &self.consumer, &bound.instance);
    }

    /// 批量归还
    pub fn release_all(&self, bound: impl IntoIterator<Item = BoundService>) {
        for service in bound {
            self.release(&service);
        }
    }
}

impl fmt::Debug for ServiceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceResolver")
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

struct ProxyState {
    target: Option<ServiceHandle>,
    instance: Option<Instance>,
    generation: u64,
}

struct ProxyInner {
    reference: String,
    contract: String,
    resolver: ServiceResolver,
    timeout: Duration,
    state: Mutex<ProxyState>,
    changed: Condvar,
}

/// 单值动态引用代理
#[derive(Clone)]
pub struct ServiceProxy(Arc<ProxyInner>);

impl ServiceProxy {
    /// 创建未绑定目标的代理
    pub fn new(
        reference: impl Into<String>,
        contract: impl Into<String>,
        resolver: ServiceResolver,
        timeout: Duration,
    ) -> Self {
        Self(Arc::new(ProxyInner {
            reference: reference.into(),
            contract: contract.into(),
            resolver,
            timeout,
            state: Mutex::new(ProxyState {
                target: None,
                instance: None,
                generation: 0,
            }),
            changed: Condvar::new(),
        }))
    }

    /// 引用名称
    pub fn reference(&self) -> &str {
        &self.0.reference
    }

    /// 当前目标
    pub fn target(&self) -> Option<ServiceHandle> {
        self.0.state.lock().target.clone()
    }

    /// 是否绑定了目标
    pub fn is_bound(&self) -> bool {
        self.0.state.lock().target.is_some()
    }

    /// 当前目标的实例，没有目标时返回 None
    pub fn get(&self) -> Option<Instance> {
        self.current().0
    }

    /// 等待目标出现，超过引用超时返回 `LookupTimeout`
    pub fn acquire(&self) -> Result<Instance, DependencyError> {
        let deadline = Instant::now() + self.0.timeout;
        loop {
            let (instance, generation) = self.current();
            if let Some(instance) = instance {
                return Ok(instance);
            }
            let mut state = self.0.state.lock();
            while state.generation == generation {
                if self.0.changed.wait_until(&mut state, deadline).timed_out() {
                    return Err(DependencyError::LookupTimeout {
                        contract: self.0.contract.clone(),
                        timeout_ms: u64::try_from(self.0.timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            }
        }
    }

    /// 替换目标，返回需要归还的旧实例
    ///
    /// 同一注册 ID 只更新句柄（属性快照），不会丢弃已解析的实例
    pub fn retarget(&self, target: Option<ServiceHandle>) -> Option<BoundService> {
        let mut state = self.0.state.lock();
        let unchanged = match (&state.target, &target) {
            (Some(current), Some(next)) => current == next,
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            if target.is_some() {
                state.target = target;
            }
            return None;
        }
        let previous = state.target.take();
        let released = previous.zip(state.instance.take());
        debug!(
            "动态引用 {} 换绑: {:?} -> {:?}",
            self.0.reference,
            released.as_ref().map(|(handle, _)| handle.id()),
            target.as_ref().map(ServiceHandle::id)
        );
        state.target = target;
        state.generation += 1;
        self.0.changed.notify_all();
        released.map(|(handle, instance)| BoundService::new(handle, instance))
    }

    /// 清除目标
    pub fn clear(&self) -> Option<BoundService> {
        self.retarget(None)
    }

    fn current(&self) -> (Option<Instance>, u64) {
        loop {
            let (handle, generation) = {
                let state = self.0.state.lock();
                if let Some(instance) = &state.instance {
                    return (Some(instance.clone()), state.generation);
                }
                match &state.target {
                    Some(handle) => (handle.clone(), state.generation),
                    None => return (None, state.generation),
                }
            };

            let resolved = match self.0.resolver.resolve(&handle) {
                Ok(instance) => instance,
                Err(e) => {
                    debug!("动态引用 {} 解析目标 {} 失败: {}", self.0.reference, handle, e);
                    return (None, generation);
                }
            };

            let mut state = self.0.state.lock();
            if state.generation == generation && state.instance.is_none() {
                state.instance = Some(resolved.clone());
                return (Some(resolved), generation);
            }
            drop(state);
            self.0
                .resolver
                .release(&BoundService::new(handle, resolved));
        }
    }
}

impl fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("reference", &self.0.reference)
            .field("target", &self.target())
            .finish()
    }
}

struct ProxyListInner {
    reference: String,
    contract: String,
    resolver: ServiceResolver,
    timeout: Duration,
    snapshot: RwLock<Arc<Vec<ServiceProxy>>>,
}

/// 多值动态引用代理
#[derive(Clone)]
pub struct ServiceProxyList(Arc<ProxyListInner>);

impl ServiceProxyList {
    /// 创建空列表
    pub fn new(
        reference: impl Into<String>,
        contract: impl Into<String>,
        resolver: ServiceResolver,
        timeout: Duration,
    ) -> Self {
        Self(Arc::new(ProxyListInner {
            reference: reference.into(),
            contract: contract.into(),
            resolver,
            timeout,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }))
    }

    /// 当前快照
    pub fn snapshot(&self) -> Arc<Vec<ServiceProxy>> {
        self.0.snapshot.read().clone()
    }

    /// 当前快照中各目标的实例
    pub fn instances(&self) -> Vec<Instance> {
        self.snapshot().iter().filter_map(ServiceProxy::get).collect()
    }

    /// 当前绑定的句柄
    pub fn handles(&self) -> Vec<ServiceHandle> {
        self.snapshot()
            .iter()
            .filter_map(ServiceProxy::target)
            .collect()
    }

    /// 绑定数量
    pub fn len(&self) -> usize {
        self.0.snapshot.read().len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 以新的目标集合替换快照，返回需要归还的实例
    ///
    /// 仍在集合中的目标沿用原代理，已解析的实例不会重新解析
    pub fn retarget(&self, targets: Vec<ServiceHandle>) -> Vec<BoundService> {
        let mut snapshot = self.0.snapshot.write();
        let mut released = Vec::new();
        let mut proxies = Vec::with_capacity(targets.len());
        for target in targets {
            let existing = snapshot
                .iter()
                .find(|proxy| proxy.target().as_ref() == Some(&target))
                .cloned();
            let proxy = existing.unwrap_or_else(|| {
                ServiceProxy::new(
                    self.0.reference.clone(),
                    self.0.contract.clone(),
                    self.0.resolver.clone(),
                    self.0.timeout,
                )
            });
            released.extend(proxy.retarget(Some(target)));
            proxies.push(proxy);
        }
        for old in snapshot.iter() {
            let kept = proxies
                .iter()
                .any(|proxy| Arc::ptr_eq(&proxy.0, &old.0));
            if !kept {
                released.extend(old.clear());
            }
        }
        *snapshot = Arc::new(proxies);
        released
    }

    /// 清空
    pub fn clear(&self) -> Vec<BoundService> {
        self.retarget(Vec::new())
    }
}

impl fmt::Debug for ServiceProxyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProxyList")
            .field("reference", &self.0.reference)
            .field("len", &self.len())
            .finish()
    }
}
