//! Bean 容器与共享容器接口
//!
//! Bean 容器负责创建和销毁组件实例，共享容器对应全局依赖控制的跨模块容器

use crate::registry::Instance;
use crate::resolver::ActivationContext;
use infrastructure_common::{ComponentDescriptor, ServiceProperties};

/// 容器回调返回的错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Bean 容器 trait
///
/// 创建与销毁可能阻塞，引擎不会在持有内部锁时调用
pub trait BeanContainer: Send + Sync {
    /// 创建组件实例
    fn create_instance(
        &self,
        component: &ComponentDescriptor,
        context: &ActivationContext,
    ) -> Result<Instance, BoxError>;

    /// 销毁组件实例
    fn destroy_instance(
        &self,
        component: &ComponentDescriptor,
        instance: &Instance,
    ) -> Result<(), BoxError>;

    /// 配置刷新后推送新的有效属性
    fn update_properties(
        &self,
        _component: &ComponentDescriptor,
        _instance: &Instance,
        _properties: &ServiceProperties,
    ) {
    }
}

/// 共享容器 trait
pub trait SharedContainer: Send + Sync {
    /// 暂停服务，保留已注入的机制
    fn pause(&self) -> Result<(), BoxError>;

    /// 恢复服务
    fn resume(&self) -> Result<(), BoxError>;

    /// 停止容器
    fn stop(&self) -> Result<(), BoxError>;

    /// 启动容器
    fn start(&self) -> Result<(), BoxError>;
}
