//! 配置依赖的集中集成测试

use config_impl::MemoryConfigurationStore;
use di_abstractions::{Instance, ServiceQuery, ServiceRegistry};
use di_impl::{ComponentRegistry, LocalServiceRegistry, SimpleBeanContainer};
use infrastructure_common::{
    ComponentDescriptor, ConfigurationPolicy, ConfigurationReaction, ConsumerId, LifecycleState,
    ServiceProperties, SERVICE_PID,
};
use serde_json::json;
use std::sync::Arc;

struct Harness {
    services: LocalServiceRegistry,
    container: Arc<SimpleBeanContainer>,
    store: Arc<MemoryConfigurationStore>,
    registry: ComponentRegistry,
}

impl Harness {
    fn new(store: MemoryConfigurationStore, descriptor: ComponentDescriptor) -> Self {
        let services = LocalServiceRegistry::new("shared");
        let container = Arc::new(SimpleBeanContainer::new());
        let store = Arc::new(store);
        container.register(descriptor.name.clone(), |context| {
            Ok(Arc::new(context.property("size").cloned()) as Instance)
        });
        let registry = ComponentRegistry::builder(Arc::new(services.clone()), container.clone())
            .with_configuration_store(store.clone())
            .build()
            .unwrap();
        registry.register(descriptor).unwrap();
        registry.start().unwrap();
        Self {
            services,
            container,
            store,
            registry,
        }
    }

    fn published_size(&self, contract: &str) -> Option<serde_json::Value> {
        self.services
            .lookup(&ServiceQuery::new(contract))
            .first()
            .and_then(|handle| handle.properties().get("size").cloned())
    }
}

fn sized(size: i64) -> ServiceProperties {
    ServiceProperties::new().with("size", size)
}

#[test]
fn test_refresh_pushes_new_properties_without_reactivation() {
    let harness = Harness::new(
        MemoryConfigurationStore::new().with_configuration("pool", sized(4)),
        ComponentDescriptor::builder("Pool")
            .provides("Pool")
            .property("size", 1)
            .configuration(ConfigurationPolicy::Optional, ConfigurationReaction::Refresh)
            .pid("pool")
            .build()
            .unwrap(),
    );
    assert_eq!(harness.published_size("Pool"), Some(json!(4)));
    let handle = harness.services.lookup(&ServiceQuery::new("Pool"))[0].clone();
    assert_eq!(handle.properties().get_str(SERVICE_PID), Some("pool"));

    let found = harness
        .registry
        .lookup_service(&ConsumerId::new("app"), &ServiceQuery::new("Pool"), None)
        .unwrap();
    let size = found.instance.downcast_ref::<Option<serde_json::Value>>().unwrap();
    assert_eq!(size, &Some(json!(4)));

    harness.store.update("pool", sized(8));
    assert_eq!(harness.published_size("Pool"), Some(json!(8)));
    assert_eq!(
        harness
            .container
            .last_properties("Pool")
            .and_then(|p| p.get("size").cloned()),
        Some(json!(8))
    );
    let manager = harness.registry.get_component_holder("Pool").unwrap();
    assert_eq!(manager.activation_count(), 1);
    assert_eq!(harness.container.created_count("Pool"), 1);

    harness.store.delete("pool");
    assert_eq!(harness.published_size("Pool"), Some(json!(1)));
    assert_eq!(manager.state(), LifecycleState::Active);
}

#[test]
fn test_reactivate_rebuilds_component_on_update() {
    let harness = Harness::new(
        MemoryConfigurationStore::new(),
        ComponentDescriptor::builder("Worker")
            .configuration(ConfigurationPolicy::Optional, ConfigurationReaction::Reactivate)
            .build()
            .unwrap(),
    );
    let manager = harness.registry.get_component_holder("Worker").unwrap();
    assert_eq!(manager.activation_count(), 1);
    assert_eq!(harness.registry.get_component_holders_by_pid("Worker").len(), 1);

    harness.store.update("Worker", sized(2));
    assert_eq!(manager.activation_count(), 2);
    assert_eq!(harness.container.created_count("Worker"), 2);
    assert_eq!(harness.container.destroyed_count("Worker"), 1);
    assert_eq!(
        harness
            .container
            .last_properties("Worker")
            .and_then(|p| p.get("size").cloned()),
        Some(json!(2))
    );
}

#[test]
fn test_required_configuration_gates_activation() {
    let harness = Harness::new(
        MemoryConfigurationStore::new(),
        ComponentDescriptor::builder("Gate")
            .provides("Gate")
            .configuration(ConfigurationPolicy::Require, ConfigurationReaction::Refresh)
            .pid("gate")
            .build()
            .unwrap(),
    );
    let manager = harness.registry.get_component_holder("Gate").unwrap();
    assert_eq!(manager.state(), LifecycleState::Satisfying);
    assert!(harness.services.lookup(&ServiceQuery::new("Gate")).is_empty());

    harness.store.update("gate", sized(3));
    assert_eq!(manager.state(), LifecycleState::Active);
    assert_eq!(harness.published_size("Gate"), Some(json!(3)));

    harness.store.delete("gate");
    assert_eq!(manager.state(), LifecycleState::Satisfying);
    assert!(harness.services.lookup(&ServiceQuery::new("Gate")).is_empty());
    assert!(manager.configuration().is_none());
}

#[test]
fn test_ignored_configuration_is_not_tracked() {
    let harness = Harness::new(
        MemoryConfigurationStore::new().with_configuration("Plain", sized(9)),
        ComponentDescriptor::builder("Plain")
            .provides("Plain")
            .property("size", 1)
            .build()
            .unwrap(),
    );
    assert_eq!(harness.published_size("Plain"), Some(json!(1)));
    assert_eq!(harness.store.listener_count(), 0);
}
