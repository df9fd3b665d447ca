//! # 组件生命周期与引用绑定引擎
//!
//! 把声明式组件接入动态服务注册表：组件的引用随服务的发布、撤销和替换而绑定、
//! 换绑或触发重新激活。
//!
//! ## 主要组件
//!
//! - [`ComponentRegistry`] - 组件注册表，负责校验、启动与延迟绑定执行器
//! - [`LifecycleManager`] - 单个组件的生命周期状态机
//! - [`BindingState`] - 单个引用的绑定策略评估
//! - [`ScopeContext`] - 单例、按消费者、按请求三种实例作用域
//! - [`GlobalDescriptor`] - 控制共享容器的全局依赖
//! - [`PrivateServiceRegistry`] - 进程内服务的私有注册表包装
//! - [`LocalServiceRegistry`] - 进程内服务注册表实现
//! - [`SimpleBeanContainer`] - 基于闭包的 bean 容器
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use di_impl::{ComponentRegistry, LocalServiceRegistry, SimpleBeanContainer};
//! use infrastructure_common::ComponentDescriptor;
//! use std::sync::Arc;
//!
//! let container = Arc::new(SimpleBeanContainer::new());
//! container.register("Greeter", |_| Ok(Arc::new("hello".to_string()) as di_abstractions::Instance));
//!
//! let registry = ComponentRegistry::builder(Arc::new(LocalServiceRegistry::default()), container)
//!     .build()?;
//! registry.register(ComponentDescriptor::builder("Greeter").provides("Greeter").build()?)?;
//! registry.start()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod actor;
pub mod binding;
pub mod circular;
pub mod container;
pub mod global;
pub mod local_registry;
pub mod manager;
pub mod private_registry;
pub mod registry;
pub mod scope;

pub use actor::ComponentActor;
pub use binding::{BindingChange, BindingState, BindingUpdate, CapturedBinding};
pub use circular::{CircularActivationGuard, CreateGuard};
pub use container::SimpleBeanContainer;
pub use global::{GlobalDescriptor, GLOBAL_TARGETS};
pub use local_registry::LocalServiceRegistry;
pub use manager::LifecycleManager;
pub use private_registry::PrivateServiceRegistry;
pub use registry::{ComponentRegistry, ComponentRegistryBuilder};
pub use scope::{
    scope_context_for, CreationTicket, InstanceCreator, PerConsumerScopeContext,
    PerRequestScopeContext, ScopeContext, SingletonScopeContext,
};
