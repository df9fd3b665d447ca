//! 基于闭包的 bean 容器
//!
//! 按组件名称登记创建与销毁闭包，并统计各组件的创建与销毁次数。

use dashmap::DashMap;
use di_abstractions::{ActivationContext, BeanContainer, BoxError, Instance};
use infrastructure_common::{ComponentDescriptor, ServiceProperties};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

type CreateFn = dyn Fn(&ActivationContext) -> Result<Instance, BoxError> + Send + Sync;
type DestroyFn = dyn Fn(&Instance) -> Result<(), BoxError> + Send + Sync;

struct BeanFactory {
    create: Box<CreateFn>,
    destroy: Option<Box<DestroyFn>>,
}

#[derive(Default)]
struct BeanCounters {
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

/// 简单 bean 容器
#[derive(Default)]
pub struct SimpleBeanContainer {
    factories: DashMap<String, Arc<BeanFactory>>,
    counters: DashMap<String, Arc<BeanCounters>>,
    last_properties: DashMap<String, ServiceProperties>,
}

impl SimpleBeanContainer {
    /// 创建空容器
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记组件的创建闭包
    pub fn register<F>(&self, component: impl Into<String>, create: F)
    where
        F: Fn(&ActivationContext) -> Result<Instance, BoxError> + Send + Sync + 'static,
    {
        self.insert(component.into(), Box::new(create), None);
    }

    /// 登记组件的创建与销毁闭包
    pub fn register_with_destroy<F, D>(&self, component: impl Into<String>, create: F, destroy: D)
    where
        F: Fn(&ActivationContext) -> Result<Instance, BoxError> + Send + Sync + 'static,
        D: Fn(&Instance) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.insert(component.into(), Box::new(create), Some(Box::new(destroy)));
    }

    fn insert(&self, component: String, create: Box<CreateFn>, destroy: Option<Box<DestroyFn>>) {
        info!("登记组件工厂: {}", component);
        self.factories
            .insert(component, Arc::new(BeanFactory { create, destroy }));
    }

    fn counters(&self, component: &str) -> Arc<BeanCounters> {
        self.counters
            .entry(component.to_string())
            .or_default()
            .clone()
    }

    /// 组件累计创建次数
    pub fn created_count(&self, component: &str) -> usize {
        self.counters
            .get(component)
            .map_or(0, |c| c.created.load(Ordering::SeqCst))
    }

    /// 组件累计销毁次数
    pub fn destroyed_count(&self, component: &str) -> usize {
        self.counters
            .get(component)
            .map_or(0, |c| c.destroyed.load(Ordering::SeqCst))
    }

    /// 组件存活实例数量
    pub fn live_count(&self, component: &str) -> usize {
        self.created_count(component)
            .saturating_sub(self.destroyed_count(component))
    }

    /// 最近一次推送给组件的有效属性
    pub fn last_properties(&self, component: &str) -> Option<ServiceProperties> {
        self.last_properties.get(component).map(|p| p.clone())
    }
}

impl BeanContainer for SimpleBeanContainer {
    fn create_instance(
        &self,
        component: &ComponentDescriptor,
        context: &ActivationContext,
    ) -> Result<Instance, BoxError> {
        let factory = self
            .factories
            .get(&component.name)
            .map(|f| f.clone())
            .ok_or_else(|| format!("未注册组件工厂: {}", component.name))?;

        let instance = (factory.create)(context)?;
        self.counters(&component.name)
            .created
            .fetch_add(1, Ordering::SeqCst);
        self.last_properties
            .insert(component.name.clone(), context.properties.clone());
        debug!("创建组件实例: {} (消费者 {})", component.name, context.consumer);
        Ok(instance)
    }

    fn destroy_instance(
        &self,
        component: &ComponentDescriptor,
        instance: &Instance,
    ) -> Result<(), BoxError> {
        self.counters(&component.name)
            .destroyed
            .fetch_add(1, Ordering::SeqCst);
        debug!("销毁组件实例: {}", component.name);
        let factory = self.factories.get(&component.name).map(|f| f.clone());
        match factory.as_ref().and_then(|f| f.destroy.as_ref()) {
            Some(destroy) => destroy(instance),
            None => Ok(()),
        }
    }

    fn update_properties(
        &self,
        component: &ComponentDescriptor,
        _instance: &Instance,
        properties: &ServiceProperties,
    ) {
        debug!("组件 {} 属性已刷新", component.name);
        self.last_properties
            .insert(component.name.clone(), properties.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrastructure_common::ConsumerId;

    fn context(component: &str) -> ActivationContext {
        ActivationContext::new(
            component,
            ConsumerId::new("test"),
            ServiceProperties::new().with("level", 3),
        )
    }

    #[test]
    fn test_counts_creations_and_destructions() {
        let container = SimpleBeanContainer::new();
        container.register("Printer", |_| Ok(Arc::new(42_u32) as Instance));
        let descriptor = ComponentDescriptor::builder("Printer").build().unwrap();

        let instance = container
            .create_instance(&descriptor, &context("Printer"))
            .unwrap();
        assert_eq!(*instance.downcast_ref::<u32>().unwrap(), 42);
        assert_eq!(container.live_count("Printer"), 1);
        assert_eq!(
            container
                .last_properties("Printer")
                .and_then(|p| p.get("level").cloned()),
            Some(serde_json::json!(3))
        );

        container.destroy_instance(&descriptor, &instance).unwrap();
        assert_eq!(container.created_count("Printer"), 1);
        assert_eq!(container.destroyed_count("Printer"), 1);
        assert_eq!(container.live_count("Printer"), 0);
    }

    #[test]
    fn test_missing_factory_is_an_error() {
        let container = SimpleBeanContainer::new();
        let descriptor = ComponentDescriptor::builder("Unknown").build().unwrap();
        let error = container
            .create_instance(&descriptor, &context("Unknown"))
            .unwrap_err();
        assert!(error.to_string().contains("Unknown"));
        assert_eq!(container.created_count("Unknown"), 0);
    }
}
