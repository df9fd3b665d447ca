//! 私有注册表包装
//!
//! 标记为进程内的服务发布到内部表，进程内引用只在内部表中匹配；
//! 其他调用原样委托给共享注册表。内部服务对共享注册表不可见。

use crate::local_registry::LocalServiceRegistry;
use di_abstractions::{
    Instance, ServiceHandle, ServiceListener, ServiceObject, ServiceQuery, ServiceRegistration,
    ServiceRegistry,
};
use infrastructure_common::{
    ConsumerId, DependencyError, RegistryError, ServiceProperties, SubscriptionId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Shared,
    Private,
}

/// 私有注册表包装
pub struct PrivateServiceRegistry {
    shared: Arc<dyn ServiceRegistry>,
    private: LocalServiceRegistry,
    subscriptions: Mutex<HashMap<SubscriptionId, (Route, SubscriptionId)>>,
    next_subscription: AtomicU64,
}

impl PrivateServiceRegistry {
    /// 包装共享注册表
    pub fn new(shared: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            shared,
            private: LocalServiceRegistry::new("private"),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// 被包装的共享注册表
    pub fn shared(&self) -> &Arc<dyn ServiceRegistry> {
        &self.shared
    }

    /// 进程内服务表
    pub fn private(&self) -> &LocalServiceRegistry {
        &self.private
    }

    fn route(&self, route: Route) -> &dyn ServiceRegistry {
        match route {
            Route::Shared => self.shared.as_ref(),
            Route::Private => &self.private,
        }
    }
}

fn route_for(internal: bool) -> Route {
    if internal {
        Route::Private
    } else {
        Route::Shared
    }
}

impl ServiceRegistry for PrivateServiceRegistry {
    fn publish(
        &self,
        contracts: Vec<String>,
        service: ServiceObject,
        properties: ServiceProperties,
    ) -> Result<Arc<dyn ServiceRegistration>, RegistryError> {
        let route = route_for(properties.is_internal());
        if route == Route::Private {
            debug!("发布进程内服务: {}", contracts.join(","));
        }
        self.route(route).publish(contracts, service, properties)
    }

    fn lookup(&self, query: &ServiceQuery) -> Vec<ServiceHandle> {
        self.route(route_for(query.internal)).lookup(query)
    }

    fn resolve(
        &self,
        handle: &ServiceHandle,
        consumer: &ConsumerId,
    ) -> Result<Instance, DependencyError> {
        self.route(route_for(handle.is_internal()))
            .resolve(handle, consumer)
    }

    fn release(&self, handle: &ServiceHandle, consumer: &ConsumerId, instance: &Instance) {
        self.route(route_for(handle.is_internal()))
            .release(handle, consumer, instance);
    }

    fn subscribe(&self, query: ServiceQuery, listener: Arc<dyn ServiceListener>) -> SubscriptionId {
        let route = route_for(query.internal);
        let inner = self.route(route).subscribe(query, listener);
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.lock().insert(id, (route, inner));
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        let entry = self.subscriptions.lock().remove(&subscription);
        if let Some((route, inner)) = entry {
            self.route(route).unsubscribe(inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrastructure_common::COMPONENT_INTERNAL;

    fn instance(value: &str) -> Instance {
        Arc::new(value.to_string())
    }

    #[test]
    fn test_internal_services_stay_private() {
        let shared = LocalServiceRegistry::new("shared");
        let registry = PrivateServiceRegistry::new(Arc::new(shared.clone()));

        registry
            .publish(
                vec!["Cache".to_string()],
                ServiceObject::Instance(instance("internal")),
                ServiceProperties::new().with(COMPONENT_INTERNAL, true),
            )
            .unwrap();
        registry
            .publish(
                vec!["Cache".to_string()],
                ServiceObject::Instance(instance("public")),
                ServiceProperties::new(),
            )
            .unwrap();

        assert_eq!(shared.service_count(), 1);
        assert_eq!(registry.private().service_count(), 1);

        let internal = registry.lookup(&ServiceQuery::new("Cache").internal());
        assert_eq!(internal.len(), 1);
        assert!(internal[0].is_internal());

        let consumer = ConsumerId::new("test");
        let resolved = registry.resolve(&internal[0], &consumer).unwrap();
        assert_eq!(resolved.downcast_ref::<String>().unwrap(), "internal");

        let public = registry.lookup(&ServiceQuery::new("Cache"));
        assert_eq!(public.len(), 1);
        assert!(!public[0].is_internal());
    }

    #[test]
    fn test_unsubscribe_routes_to_inner_registry() {
        struct Ignore;
        impl ServiceListener for Ignore {
            fn service_changed(&self, _kind: di_abstractions::ServiceEventKind, _handle: &ServiceHandle) {}
        }

        let shared = LocalServiceRegistry::new("shared");
        let registry = PrivateServiceRegistry::new(Arc::new(shared.clone()));
        let public = registry.subscribe(ServiceQuery::new("Cache"), Arc::new(Ignore));
        let private = registry.subscribe(ServiceQuery::new("Cache").internal(), Arc::new(Ignore));
        assert_eq!(shared.subscription_count(), 1);
        assert_eq!(registry.private().subscription_count(), 1);

        registry.unsubscribe(private);
        assert_eq!(registry.private().subscription_count(), 0);
        registry.unsubscribe(public);
        assert_eq!(shared.subscription_count(), 0);
    }
}
