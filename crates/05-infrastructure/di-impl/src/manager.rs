//! 组件生命周期管理器
//!
//! 每个组件描述符对应一个 [`LifecycleManager`]，状态机为
//! `Disabled → Satisfying → Activating → Active → Deactivating → (Satisfying | Disabled)`。
//!
//! 状态转换分两步：在状态锁内认领一个动作，在锁外执行。锁的顺序为
//! 状态锁 → 引用绑定锁 → 代理锁；调用 bean 容器与发布服务时不持有任何锁。

use crate::actor::ComponentActor;
use crate::binding::{BindingChange, BindingState};
use crate::circular::CircularActivationGuard;
use crate::scope::{scope_context_for, CreationTicket, InstanceCreator, ScopeContext};
use config_abstractions::{ConfigurationEvent, ConfigurationListener, ConfigurationStore};
use di_abstractions::{
    ActivationContext, BeanContainer, BoundService, Instance, RegistrySettings, ServiceEventKind,
    ServiceFactory, ServiceHandle, ServiceListener, ServiceObject, ServiceRegistration,
    ServiceRegistry, ServiceResolver,
};
use infrastructure_common::{
    ComponentDescriptor, ConfigurationPolicy, ConfigurationReaction, ConfigurationSnapshot,
    ConsumerId, DependencyError, LifecycleState, ServiceProperties, SubscriptionId,
    COMPONENT_INTERNAL, COMPONENT_NAME, SERVICE_PID,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// 同一注册表内所有管理器共享的协作者
pub(crate) struct RegistryContext {
    pub services: Arc<dyn ServiceRegistry>,
    pub container: Arc<dyn BeanContainer>,
    pub configurations: Option<Arc<dyn ConfigurationStore>>,
    pub actor: ComponentActor,
    pub guard: CircularActivationGuard,
    pub settings: RegistrySettings,
}

struct ManagerState {
    lifecycle: LifecycleState,
    enabled: bool,
    reactivate: bool,
    registration: Option<Arc<dyn ServiceRegistration>>,
    config_subscription: Option<SubscriptionId>,
    configuration: Option<ConfigurationSnapshot>,
    last_error: Option<String>,
    cycle: Option<String>,
}

enum Action {
    Activate,
    Deactivate(Option<Arc<dyn ServiceRegistration>>),
    Untrack,
}

enum ConfigurationStep {
    Ignore,
    Reconcile,
    Apply,
}

/// 组件生命周期管理器
pub struct LifecycleManager {
    self_ref: Weak<LifecycleManager>,
    descriptor: Arc<ComponentDescriptor>,
    name: Arc<str>,
    context: Arc<RegistryContext>,
    resolver: ServiceResolver,
    bindings: Vec<Arc<BindingState>>,
    scope: Box<dyn ScopeContext>,
    state: Mutex<ManagerState>,
    activations: AtomicUsize,
}

impl LifecycleManager {
    pub(crate) fn new(descriptor: Arc<ComponentDescriptor>, context: Arc<RegistryContext>) -> Arc<Self> {
        let name: Arc<str> = Arc::from(descriptor.name.as_str());
        let resolver = ServiceResolver::new(context.services.clone(), descriptor.module.clone());
        let timeout = context.settings.lookup_timeout();
        let bindings = descriptor
            .local_references()
            .map(|reference| {
                Arc::new(BindingState::new(
                    name.clone(),
                    reference.clone(),
                    resolver.clone(),
                    timeout,
                ))
            })
            .collect();
        let scope = scope_context_for(descriptor.scope);

        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            name,
            resolver,
            bindings,
            scope,
            state: Mutex::new(ManagerState {
                lifecycle: LifecycleState::Disabled,
                enabled: false,
                reactivate: false,
                registration: None,
                config_subscription: None,
                configuration: None,
                last_error: None,
                cycle: None,
            }),
            activations: AtomicUsize::new(0),
            descriptor,
            context,
        })
    }

    /// 组件名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 组件描述符
    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    /// 当前状态
    pub fn state(&self) -> LifecycleState {
        self.state.lock().lifecycle
    }

    /// 是否已启用
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// 累计激活次数
    pub fn activation_count(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// 最近一次激活失败的原因
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// 存活实例数量
    pub fn instance_count(&self) -> usize {
        self.scope.instance_count()
    }

    /// 引用当前绑定的目标
    pub fn bound_targets(&self, reference: &str) -> Vec<ServiceHandle> {
        self.bindings
            .iter()
            .find(|binding| binding.name() == reference)
            .map(|binding| binding.bound_targets())
            .unwrap_or_default()
    }

    /// 已发布服务的句柄
    pub fn service_handle(&self) -> Option<ServiceHandle> {
        self.state
            .lock()
            .registration
            .as_ref()
            .map(|registration| registration.handle())
    }

    /// 当前配置快照
    pub fn configuration(&self) -> Option<ConfigurationSnapshot> {
        self.state.lock().configuration.clone()
    }

    /// 引用与配置依赖是否全部满足
    pub fn is_satisfied(&self) -> bool {
        let state = self.state.lock();
        self.is_satisfied_locked(&state)
    }

    fn is_satisfied_locked(&self, state: &ManagerState) -> bool {
        let configured = self.descriptor.configuration.policy != ConfigurationPolicy::Require
            || state.configuration.is_some();
        configured && self.bindings.iter().all(|binding| binding.is_satisfied())
    }

    fn effective_properties(&self, state: &ManagerState) -> ServiceProperties {
        let mut properties = match (&state.configuration, self.descriptor.configuration.policy) {
            (Some(configuration), ConfigurationPolicy::Optional | ConfigurationPolicy::Require) => {
                self.descriptor.properties.merged(&configuration.properties)
            }
            _ => self.descriptor.properties.clone(),
        };
        properties.insert(COMPONENT_NAME, self.descriptor.name.clone());
        if let Some(pid) = self.descriptor.pid() {
            properties.insert(SERVICE_PID, pid);
        }
        if self.descriptor.internal {
            properties.insert(COMPONENT_INTERNAL, true);
        }
        properties
    }

    /// 必选引用循环的依赖链
    pub fn dependency_cycle(&self) -> Option<String> {
        self.state.lock().cycle.clone()
    }

    pub(crate) fn mark_cycle(&self, dependency_chain: String) {
        let mut state = self.state.lock();
        state.last_error = Some(circular(&dependency_chain).to_string());
        state.cycle = Some(dependency_chain);
    }

    /// 组件因必选引用循环无法激活时返回循环依赖错误
    pub fn blocking_cycle(&self) -> Option<DependencyError> {
        let state = self.state.lock();
        match (&state.cycle, state.lifecycle) {
            (Some(chain), LifecycleState::Satisfying) => Some(circular(chain)),
            _ => None,
        }
    }

    /// 启用组件并开始追踪依赖
    pub fn enable(&self) {
        {
            let mut state = self.state.lock();
            state.enabled = true;
            state.last_error = state.cycle.as_deref().map(|chain| circular(chain).to_string());
            if state.lifecycle != LifecycleState::Disabled {
                return;
            }
            state.lifecycle = LifecycleState::Satisfying;
        }
        info!("启用组件: {}", self.name);
        self.track();
        self.reconcile();
    }

    pub(crate) fn shutdown(&self) {
        self.state.lock().enabled = false;
        self.reconcile();
    }

    fn track(&self) {
        for (index, binding) in self.bindings.iter().enumerate() {
            let listener = Arc::new(BindingListener {
                manager: self.self_ref.clone(),
                index,
            });
            binding.track(self.context.services.as_ref(), listener);
        }

        let (Some(store), Some(pid)) = (&self.context.configurations, self.descriptor.pid()) else {
            return;
        };
        let listener = Arc::new(ConfigListener {
            manager: self.self_ref.clone(),
        });
        let subscription = store.subscribe(pid, listener);
        let snapshot = store.get(pid);

        let previous = {
            let mut state = self.state.lock();
            if let Some(snapshot) = snapshot {
                store_snapshot(&mut state, snapshot);
            }
            state.config_subscription.replace(subscription)
        };
        if let Some(previous) = previous {
            store.unsubscribe(previous);
        }
    }

    fn untrack(&self) {
        for binding in &self.bindings {
            binding.untrack(self.context.services.as_ref());
        }
        let subscription = {
            let mut state = self.state.lock();
            state.configuration = None;
            state.config_subscription.take()
        };
        if let (Some(store), Some(subscription)) = (&self.context.configurations, subscription) {
            store.unsubscribe(subscription);
        }
        debug!("组件 {} 停止追踪依赖", self.name);
    }

    /// 推进状态机直到没有可执行的动作
    pub(crate) fn reconcile(&self) {
        loop {
            let action = {
                let mut state = self.state.lock();
                match state.lifecycle {
                    LifecycleState::Satisfying if !state.enabled => {
                        state.lifecycle = LifecycleState::Disabled;
                        Action::Untrack
                    }
                    LifecycleState::Satisfying if self.is_satisfied_locked(&state) => {
                        state.lifecycle = LifecycleState::Activating;
                        Action::Activate
                    }
                    LifecycleState::Active
                        if !state.enabled
                            || state.reactivate
                            || !self.is_satisfied_locked(&state) =>
                    {
                        state.reactivate = false;
                        state.lifecycle = LifecycleState::Deactivating;
                        Action::Deactivate(state.registration.take())
                    }
                    _ => return,
                }
            };

            match action {
                Action::Activate => {
                    if !self.activate_component() {
                        return;
                    }
                }
                Action::Deactivate(registration) => self.deactivate_component(registration),
                Action::Untrack => {
                    info!("组件已禁用: {}", self.name);
                    self.untrack();
                }
            }
        }
    }

    fn activate_component(&self) -> bool {
        info!("激活组件: {}", self.name);
        if self.descriptor.immediate {
            if let Err(e) = self.obtain_instance(&self.descriptor.module) {
                return self.activation_failed(e);
            }
        }

        let registration = if self.descriptor.provides_service() {
            let properties = self.effective_properties(&self.state.lock());
            let factory = Arc::new(ComponentServiceFactory {
                manager: self.self_ref.clone(),
            });
            match self.context.services.publish(
                self.descriptor.contracts.clone(),
                ServiceObject::Factory(factory),
                properties,
            ) {
                Ok(registration) => Some(registration),
                Err(e) => {
                    return self.activation_failed(DependencyError::LifecycleError {
                        message: format!("发布服务失败: {e}"),
                    })
                }
            }
        } else {
            None
        };

        {
            let mut state = self.state.lock();
            state.lifecycle = LifecycleState::Active;
            state.registration = registration;
            state.last_error = None;
        }
        let count = self.activations.fetch_add(1, Ordering::SeqCst) + 1;
        info!("组件已激活: {} (第 {} 次)", self.name, count);
        true
    }

    fn activation_failed(&self, error: DependencyError) -> bool {
        self.teardown();
        let disable = error.is_creation_failure();
        {
            let mut state = self.state.lock();
            state.reactivate = false;
            state.last_error = Some(error.to_string());
            if disable {
                state.enabled = false;
                state.lifecycle = LifecycleState::Disabled;
            } else {
                state.lifecycle = LifecycleState::Satisfying;
            }
        }
        if disable {
            error!("组件 {} 创建失败，已禁用: {}", self.name, error);
            self.untrack();
        } else {
            warn!("组件 {} 激活失败: {}", self.name, error);
        }
        false
    }

    fn deactivate_component(&self, registration: Option<Arc<dyn ServiceRegistration>>) {
        info!("停用组件: {}", self.name);
        if let Some(registration) = registration {
            registration.unpublish();
        }
        self.teardown();

        let disabled = {
            let mut state = self.state.lock();
            state.lifecycle = if state.enabled {
                LifecycleState::Satisfying
            } else {
                LifecycleState::Disabled
            };
            state.lifecycle == LifecycleState::Disabled
        };
        if disabled {
            info!("组件已禁用: {}", self.name);
            self.untrack();
        }
    }

    fn teardown(&self) {
        let destroyed = self.scope.destroy_all(self);
        if destroyed > 0 {
            debug!("组件 {} 销毁 {} 个实例", self.name, destroyed);
        }
        for binding in &self.bindings {
            self.resolver.release_all(binding.unbind());
        }
    }

    fn obtain_instance(&self, consumer: &ConsumerId) -> Result<Instance, DependencyError> {
        let _guard = self.context.guard.enter_create(&self.name)?;
        let result = self.scope.get(consumer, self);
        if let Err(e) = &result {
            if e.is_creation_failure() {
                let mut state = self.state.lock();
                state.enabled = false;
                state.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// 为消费者获取实例，组件未激活时返回 `ServiceUnavailable`
    pub fn get_instance(&self, consumer: &ConsumerId) -> Result<Instance, DependencyError> {
        let lifecycle = self.state();
        if !matches!(lifecycle, LifecycleState::Active | LifecycleState::Activating) {
            if let Some(error) = self.blocking_cycle() {
                return Err(error);
            }
            return Err(DependencyError::ServiceUnavailable {
                contract: self.descriptor.contracts.join(","),
            });
        }
        let result = self.obtain_instance(consumer);
        if matches!(&result, Err(e) if e.is_creation_failure()) {
            self.schedule_reconcile();
        }
        result
    }

    /// 消费者归还实例
    pub fn release_instance(&self, consumer: &ConsumerId, instance: &Instance) {
        if self.scope.release(consumer, instance, self) {
            debug!("组件 {} 的实例随消费者 {} 释放", self.name, consumer);
        }
    }

    /// 以调用方给出的上下文直接创建实例
    ///
    /// 实例不进入作用域上下文，由调用方通过 [`deactivate`](Self::deactivate) 销毁
    pub fn activate(&self, context: &ActivationContext) -> Result<Instance, DependencyError> {
        let _guard = self.context.guard.enter_create(&self.name)?;
        self.context
            .container
            .create_instance(&self.descriptor, context)
            .map_err(|source| DependencyError::ComponentCreationFailed {
                type_name: self.name.to_string(),
                source,
            })
    }

    /// 销毁由 [`activate`](Self::activate) 创建的实例
    pub fn deactivate(
        &self,
        context: &ActivationContext,
        instance: &Instance,
    ) -> Result<(), DependencyError> {
        debug!("停用激活上下文 {} ({})", context.id, self.name);
        self.context
            .container
            .destroy_instance(&self.descriptor, instance)
            .map_err(|e| DependencyError::LifecycleError {
                message: format!("销毁组件 {} 失败: {e}", self.name),
            })
    }

    /// 在执行器上推进状态机
    fn schedule_reconcile(&self) {
        let manager = self.self_ref.clone();
        let accepted = self.context.actor.schedule(move || {
            if let Some(manager) = manager.upgrade() {
                manager.reconcile();
            }
        });
        if !accepted {
            self.reconcile();
        }
    }

    fn schedule_late_bind(&self, binding: &Arc<BindingState>) {
        if !binding.mark_late_bind() {
            return;
        }
        debug!("引用 {}.{} 已满足，提交延迟绑定", self.name, binding.name());
        let manager = self.self_ref.clone();
        let pending = binding.clone();
        let accepted = self.context.actor.schedule(move || {
            pending.clear_late_bind();
            if let Some(manager) = manager.upgrade() {
                manager.reconcile();
            }
        });
        if !accepted {
            binding.clear_late_bind();
            self.reconcile();
        }
    }

    fn on_reference_event(&self, index: usize, kind: ServiceEventKind, handle: &ServiceHandle) {
        let Some(binding) = self.bindings.get(index) else {
            return;
        };
        let update = binding.on_event(kind, handle);
        self.resolver.release_all(update.released);

        match update.change {
            BindingChange::Reactivate => {
                {
                    let mut state = self.state.lock();
                    if matches!(
                        state.lifecycle,
                        LifecycleState::Active | LifecycleState::Activating
                    ) {
                        state.reactivate = true;
                    }
                }
                self.reconcile();
            }
            BindingChange::Unsatisfied => self.reconcile(),
            BindingChange::Satisfied => self.schedule_late_bind(binding),
            BindingChange::Rebound => {
                debug!("组件 {} 的引用 {} 已原地换绑", self.name, binding.name());
            }
            BindingChange::Unchanged => {}
        }
    }

    fn on_configuration(&self, event: &ConfigurationEvent) {
        let policy = self.descriptor.configuration.policy;
        let step = {
            let mut state = self.state.lock();
            if state.lifecycle == LifecycleState::Disabled {
                ConfigurationStep::Ignore
            } else if let Some(snapshot) = event.snapshot.clone() {
                if store_snapshot(&mut state, snapshot) {
                    if state.lifecycle == LifecycleState::Active {
                        ConfigurationStep::Apply
                    } else {
                        ConfigurationStep::Reconcile
                    }
                } else {
                    ConfigurationStep::Ignore
                }
            } else if state.configuration.take().is_none() {
                ConfigurationStep::Ignore
            } else if policy == ConfigurationPolicy::Require {
                ConfigurationStep::Reconcile
            } else if state.lifecycle == LifecycleState::Active {
                ConfigurationStep::Apply
            } else {
                ConfigurationStep::Ignore
            }
        };

        match step {
            ConfigurationStep::Ignore => {}
            ConfigurationStep::Reconcile => {
                info!("组件 {} 的配置 {} 已变化", self.name, event.pid);
                self.reconcile();
            }
            ConfigurationStep::Apply => self.apply_configuration(),
        }
    }

    fn apply_configuration(&self) {
        match self.descriptor.configuration.reaction {
            ConfigurationReaction::Reactivate => {
                info!("组件 {} 的配置已变化，重新激活", self.name);
                {
                    let mut state = self.state.lock();
                    if state.lifecycle == LifecycleState::Active {
                        state.reactivate = true;
                    }
                }
                self.reconcile();
            }
            ConfigurationReaction::Refresh => {
                let (properties, registration) = {
                    let state = self.state.lock();
                    (self.effective_properties(&state), state.registration.clone())
                };
                if let Some(registration) = registration {
                    if let Err(e) = registration.set_properties(properties.clone()) {
                        warn!("组件 {} 更新服务属性失败: {}", self.name, e);
                    }
                }
                for instance in self.scope.instances() {
                    self.context
                        .container
                        .update_properties(&self.descriptor, &instance, &properties);
                }
                info!("组件 {} 的属性已刷新", self.name);
            }
        }
    }
}

fn circular(dependency_chain: &str) -> DependencyError {
    DependencyError::CircularDependency {
        dependency_chain: dependency_chain.to_string(),
    }
}

/// 保存更新的配置快照，旧修订号返回 false
fn store_snapshot(state: &mut ManagerState, snapshot: ConfigurationSnapshot) -> bool {
    let stale = state
        .configuration
        .as_ref()
        .is_some_and(|current| current.revision >= snapshot.revision);
    if !stale {
        state.configuration = Some(snapshot);
    }
    !stale
}

impl InstanceCreator for LifecycleManager {
    fn create(&self, consumer: &ConsumerId) -> Result<(Instance, CreationTicket), DependencyError> {
        let (properties, configuration) = {
            let state = self.state.lock();
            (self.effective_properties(&state), state.configuration.clone())
        };
        let mut context = ActivationContext::new(self.descriptor.name.clone(), consumer.clone(), properties)
            .with_configuration(configuration);

        let mut dependencies: Vec<BoundService> = Vec::new();
        let mut fresh: Vec<&Arc<BindingState>> = Vec::new();
        for binding in &self.bindings {
            match binding.capture() {
                Ok(captured) => {
                    if captured.fresh {
                        fresh.push(binding);
                    }
                    dependencies.extend(captured.dependencies);
                    context = context.with_reference(binding.name(), captured.bound);
                }
                Err(e) => {
                    self.rollback(dependencies, &fresh);
                    if e.is_circular() {
                        return Err(e);
                    }
                    return Err(DependencyError::DependencyResolutionFailed {
                        type_name: self.name.to_string(),
                        message: format!("引用 {} 绑定失败: {e}", binding.name()),
                    });
                }
            }
        }

        match self.context.container.create_instance(&self.descriptor, &context) {
            Ok(instance) => Ok((instance, CreationTicket::new(consumer.clone(), dependencies))),
            Err(source) => {
                self.rollback(dependencies, &fresh);
                Err(DependencyError::ComponentCreationFailed {
                    type_name: self.name.to_string(),
                    source,
                })
            }
        }
    }

    fn destroy(&self, instance: &Instance, ticket: CreationTicket) {
        if let Err(e) = self.context.container.destroy_instance(&self.descriptor, instance) {
            warn!("销毁组件 {} 的实例失败: {}", self.name, e);
        }
        self.resolver.release_all(ticket.dependencies);
    }
}

impl LifecycleManager {
    fn rollback(&self, dependencies: Vec<BoundService>, fresh: &[&Arc<BindingState>]) {
        self.resolver.release_all(dependencies);
        for binding in fresh {
            self.resolver.release_all(binding.unbind());
        }
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("activations", &self.activation_count())
            .finish_non_exhaustive()
    }
}

struct BindingListener {
    manager: Weak<LifecycleManager>,
    index: usize,
}

impl ServiceListener for BindingListener {
    fn service_changed(&self, kind: ServiceEventKind, handle: &ServiceHandle) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_reference_event(self.index, kind, handle);
        }
    }
}

struct ConfigListener {
    manager: Weak<LifecycleManager>,
}

impl ConfigurationListener for ConfigListener {
    fn configuration_changed(&self, event: &ConfigurationEvent) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_configuration(event);
        }
    }
}

/// 组件以工厂形式发布，每个消费者的实例由作用域上下文决定
struct ComponentServiceFactory {
    manager: Weak<LifecycleManager>,
}

impl ServiceFactory for ComponentServiceFactory {
    fn get_service(
        &self,
        consumer: &ConsumerId,
        handle: &ServiceHandle,
    ) -> Result<Instance, DependencyError> {
        let manager = self
            .manager
            .upgrade()
            .ok_or_else(|| DependencyError::ServiceUnavailable {
                contract: handle.to_string(),
            })?;
        manager.get_instance(consumer)
    }

    fn unget_service(&self, consumer: &ConsumerId, _handle: &ServiceHandle, instance: &Instance) {
        if let Some(manager) = self.manager.upgrade() {
            manager.release_instance(consumer, instance);
        }
    }
}
