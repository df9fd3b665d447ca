//! # Dependency Injection Abstractions
//!
//! 组件引擎与外部协作者之间的接口。
//!
//! ## 核心接口
//!
//! - [`ServiceRegistry`] - 服务注册表门面（发布、查找、订阅）
//! - [`ServiceFactory`] - 按消费者发放实例的服务工厂
//! - [`BeanContainer`] - 创建与销毁组件实例的 bean 容器
//! - [`SharedContainer`] - 由全局依赖控制的共享容器
//! - [`ActivationContext`] - 单次激活调用的上下文
//! - [`ServiceProxy`] / [`ServiceProxyList`] - 动态引用代理

pub mod container;
pub mod factory;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod settings;

pub use container::*;
pub use factory::*;
pub use proxy::*;
pub use registry::*;
pub use resolver::*;
pub use settings::*;
