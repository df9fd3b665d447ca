//! 服务工厂接口
//!
//! 按消费者发放实例的服务以工厂形式发布，注册表在解析与归还时回调工厂

use crate::registry::{Instance, ServiceHandle};
use infrastructure_common::{ConsumerId, DependencyError};

/// 服务工厂 trait
pub trait ServiceFactory: Send + Sync {
    /// 为消费者创建或获取服务实例
    fn get_service(
        &self,
        consumer: &ConsumerId,
        handle: &ServiceHandle,
    ) -> Result<Instance, DependencyError>;

    /// 消费者归还服务实例
    fn unget_service(&self, consumer: &ConsumerId, handle: &ServiceHandle, instance: &Instance);
}
