//! 组件注册表
//!
//! 持有描述符到生命周期管理器的映射，负责注册校验、启动顺序、
//! 全局描述符以及延迟绑定执行器。

use crate::actor::ComponentActor;
use crate::circular::{mandatory_cycles, CircularActivationGuard};
use crate::global::GlobalDescriptor;
use crate::manager::{LifecycleManager, RegistryContext};
use crate::private_registry::PrivateServiceRegistry;
use config_abstractions::ConfigurationStore;
use di_abstractions::{
    BeanContainer, BoundService, RegistrySettings, ServiceQuery, ServiceRegistry, SharedContainer,
};
use infrastructure_common::{
    ComponentDescriptor, ConsumerId, DependencyError, DependencyResult, InfrastructureError,
    ReferenceDescriptor, ValidationError,
};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 组件注册表构建器
pub struct ComponentRegistryBuilder {
    services: Arc<dyn ServiceRegistry>,
    container: Arc<dyn BeanContainer>,
    configurations: Option<Arc<dyn ConfigurationStore>>,
    shared: Option<Arc<dyn SharedContainer>>,
    settings: RegistrySettings,
}

impl ComponentRegistryBuilder {
    /// 设置配置存储
    pub fn with_configuration_store(mut self, store: Arc<dyn ConfigurationStore>) -> Self {
        self.configurations = Some(store);
        self
    }

    /// 设置由全局引用控制的共享容器
    pub fn with_shared_container(mut self, container: Arc<dyn SharedContainer>) -> Self {
        self.shared = Some(container);
        self
    }

    /// 设置运行参数
    pub fn with_settings(mut self, settings: RegistrySettings) -> Self {
        self.settings = settings;
        self
    }

    /// 构建注册表并启动组件执行器
    pub fn build(self) -> Result<ComponentRegistry, InfrastructureError> {
        let private = Arc::new(PrivateServiceRegistry::new(self.services));
        let actor = ComponentActor::spawn(self.settings.actor_thread_name.clone())?;
        let guard = CircularActivationGuard::new(self.settings.max_activation_depth);
        let context = Arc::new(RegistryContext {
            services: private.clone(),
            container: self.container,
            configurations: self.configurations,
            actor,
            guard,
            settings: self.settings,
        });
        info!("组件注册表已创建");
        Ok(ComponentRegistry {
            context,
            private,
            shared: self.shared,
            table: RwLock::new(ComponentTable::default()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            global: OnceCell::new(),
        })
    }
}

#[derive(Default)]
struct ComponentTable {
    descriptors: Vec<Arc<ComponentDescriptor>>,
    managers: Vec<Arc<LifecycleManager>>,
    by_name: HashMap<String, Arc<LifecycleManager>>,
    by_pid: HashMap<String, Vec<Arc<LifecycleManager>>>,
}

/// 组件注册表
pub struct ComponentRegistry {
    context: Arc<RegistryContext>,
    private: Arc<PrivateServiceRegistry>,
    shared: Option<Arc<dyn SharedContainer>>,
    table: RwLock<ComponentTable>,
    started: AtomicBool,
    stopped: AtomicBool,
    global: OnceCell<Arc<GlobalDescriptor>>,
}

impl ComponentRegistry {
    /// 创建构建器
    pub fn builder(
        services: Arc<dyn ServiceRegistry>,
        container: Arc<dyn BeanContainer>,
    ) -> ComponentRegistryBuilder {
        ComponentRegistryBuilder {
            services,
            container,
            configurations: None,
            shared: None,
            settings: RegistrySettings::default(),
        }
    }

    /// 注册组件描述符
    ///
    /// 校验失败的描述符不会进入注册表；启动之后不再接受注册
    pub fn register(&self, descriptor: ComponentDescriptor) -> Result<(), ValidationError> {
        let mut table = self.table.write();
        if self.started.load(Ordering::SeqCst) {
            return Err(ValidationError::RegistrationClosed {
                component: descriptor.name,
            });
        }

        descriptor.validate()?;

        if table.descriptors.iter().any(|d| d.name == descriptor.name) {
            return Err(ValidationError::DuplicateComponentName {
                name: descriptor.name,
            });
        }

        if let Some(pid) = descriptor.pid() {
            let collision = table.descriptors.iter().find(|d| {
                d.pid() == Some(pid) && d.configuration.policy != descriptor.configuration.policy
            });
            if let Some(existing) = collision {
                return Err(ValidationError::PidCollision {
                    pid: pid.to_string(),
                    component: descriptor.name.clone(),
                    existing: existing.name.clone(),
                });
            }
            if self.context.configurations.is_none() {
                return Err(ValidationError::MissingConfigurationStore {
                    component: descriptor.name.clone(),
                });
            }
        }

        if self.shared.is_none() {
            if let Some(reference) = descriptor.global_references().next() {
                return Err(ValidationError::MissingSharedContainer {
                    component: descriptor.name.clone(),
                    reference: reference.name.clone(),
                });
            }
        }

        info!(
            "注册组件: {} (作用域 {}, {} 个引用)",
            descriptor.name,
            descriptor.scope,
            descriptor.references.len()
        );
        table.descriptors.push(Arc::new(descriptor));
        Ok(())
    }

    /// 启动注册表
    ///
    /// 为每个描述符创建生命周期管理器，并按注册顺序启用。重复调用返回 `Ok(false)`
    pub fn start(&self) -> Result<bool, InfrastructureError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("组件注册表已启动");
            return Ok(false);
        }

        let descriptors = self.table.read().descriptors.clone();
        info!("启动组件注册表: {} 个组件", descriptors.len());

        let globals: Vec<ReferenceDescriptor> = descriptors
            .iter()
            .flat_map(|d| d.global_references().cloned())
            .collect();
        if !globals.is_empty() {
            let global = GlobalDescriptor::new(
                globals,
                self.context.services.clone(),
                self.shared.clone(),
                self.context.settings.global_thread_name.clone(),
            );
            self.global
                .set(global.clone())
                .map_err(|_| InfrastructureError::BootstrapFailed {
                    message: "全局描述符已存在".to_string(),
                })?;
            global.open();
        }

        let managers: Vec<Arc<LifecycleManager>> = descriptors
            .iter()
            .map(|d| LifecycleManager::new(d.clone(), self.context.clone()))
            .collect();
        {
            let mut table = self.table.write();
            for manager in &managers {
                table
                    .by_name
                    .insert(manager.name().to_string(), manager.clone());
                if let Some(pid) = manager.descriptor().pid() {
                    table
                        .by_pid
                        .entry(pid.to_string())
                        .or_default()
                        .push(manager.clone());
                }
            }
            table.managers = managers.clone();
        }

        let cycles = mandatory_cycles(&descriptors);
        for manager in &managers {
            if let Some(chain) = cycles.get(manager.name()) {
                manager.mark_cycle(chain.clone());
            }
        }

        for manager in managers.iter().filter(|m| m.descriptor().enabled) {
            manager.enable();
        }
        info!("组件注册表已启动");
        Ok(true)
    }

    /// 注册表是否已启动
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// 启用组件
    pub fn enable_component(&self, name: &str) -> Result<(), DependencyError> {
        if !self.is_started() {
            return Err(DependencyError::LifecycleError {
                message: format!("注册表尚未启动，无法启用组件 {name}"),
            });
        }
        let manager = self.get_component_holder(name).ok_or_else(|| {
            DependencyError::ComponentNotRegistered {
                type_name: name.to_string(),
            }
        })?;
        manager.enable();
        Ok(())
    }

    /// 禁用组件（不支持）
    pub fn disable_component(&self, name: &str) -> Result<(), DependencyError> {
        warn!("不支持禁用组件: {}", name);
        Err(DependencyError::UnsupportedOperation {
            operation: "disable_component".to_string(),
            component: name.to_string(),
        })
    }

    /// 按名称获取生命周期管理器
    pub fn get_component_holder(&self, name: &str) -> Option<Arc<LifecycleManager>> {
        self.table.read().by_name.get(name).cloned()
    }

    /// 按配置 pid 获取生命周期管理器
    pub fn get_component_holders_by_pid(&self, pid: &str) -> Vec<Arc<LifecycleManager>> {
        self.table
            .read()
            .by_pid
            .get(pid)
            .cloned()
            .unwrap_or_default()
    }

    /// 已注册的组件名称，按注册顺序
    pub fn component_names(&self) -> Vec<String> {
        self.table
            .read()
            .descriptors
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    /// 以消费者身份查找服务，等待不超过 `timeout`（默认取运行参数）
    pub fn lookup_service(
        &self,
        consumer: &ConsumerId,
        query: &ServiceQuery,
        timeout: Option<Duration>,
    ) -> DependencyResult<BoundService> {
        let timeout = timeout.unwrap_or_else(|| self.context.settings.lookup_timeout());
        if self.context.services.lookup(query).is_empty() {
            if let Some(error) = self.blocking_cycle(query) {
                warn!("查找 {} 失败: {}", query.contract, error);
                return Err(error);
            }
        }
        let handle = self.context.services.wait_for(query, timeout)?;
        let instance = self.context.services.resolve(&handle, consumer)?;
        Ok(BoundService::new(handle, instance))
    }

    fn blocking_cycle(&self, query: &ServiceQuery) -> Option<DependencyError> {
        let table = self.table.read();
        table
            .managers
            .iter()
            .filter(|m| {
                let descriptor = m.descriptor();
                descriptor.internal == query.internal
                    && descriptor.contracts.iter().any(|c| *c == query.contract)
            })
            .find_map(|m| m.blocking_cycle())
    }

    /// 归还 [`lookup_service`](Self::lookup_service) 取得的服务
    pub fn release_service(&self, consumer: &ConsumerId, service: &BoundService) {
        self.context
            .services
            .release(&service.handle, consumer, &service.instance);
    }

    /// 等待已提交的延迟绑定任务执行完毕
    pub fn await_pending_bindings(&self) {
        self.context.actor.flush();
    }

    /// 注册表使用的服务注册表（含进程内服务表）
    pub fn services(&self) -> &PrivateServiceRegistry {
        &self.private
    }

    /// 全局描述符，没有全局引用时为 None
    pub fn global(&self) -> Option<&Arc<GlobalDescriptor>> {
        self.global.get()
    }

    /// 运行参数
    pub fn settings(&self) -> &RegistrySettings {
        &self.context.settings
    }

    /// 停止全部组件，按注册的逆序停用
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("关闭组件注册表");
        self.context.actor.flush();
        let managers = self.table.read().managers.clone();
        for manager in managers.iter().rev() {
            manager.shutdown();
        }
        if let Some(global) = self.global.get() {
            global.close();
        }
        self.context.actor.shutdown();
    }
}

impl Drop for ComponentRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.component_names())
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}
