//! 组件注册表的集中集成测试：注册校验、进程内服务、查找超时与创建失败

use di_abstractions::{BoxError, Instance, RegistrySettings, ServiceQuery, ServiceRegistry, SharedContainer};
use di_impl::{ComponentRegistry, LocalServiceRegistry, SimpleBeanContainer};
use infrastructure_common::{
    Cardinality, ComponentDescriptor, ConfigurationPolicy, ConfigurationReaction, ConsumerId,
    DependencyError, LifecycleState, ReferenceDescriptor, ServiceScope, ValidationError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (LocalServiceRegistry, Arc<SimpleBeanContainer>, ComponentRegistry) {
    let services = LocalServiceRegistry::new("shared");
    let container = Arc::new(SimpleBeanContainer::new());
    let registry = ComponentRegistry::builder(Arc::new(services.clone()), container.clone())
        .with_settings(RegistrySettings::default().with_lookup_timeout(Duration::from_millis(50)))
        .build()
        .unwrap();
    (services, container, registry)
}

fn unit(_: &di_abstractions::ActivationContext) -> Result<Instance, BoxError> {
    Ok(Arc::new(()))
}

#[test]
fn test_duplicate_component_name_is_rejected() {
    let (_, _, registry) = setup();
    let descriptor = ComponentDescriptor::builder("Printer").build().unwrap();
    registry.register(descriptor.clone()).unwrap();
    assert_eq!(
        registry.register(descriptor),
        Err(ValidationError::DuplicateComponentName {
            name: "Printer".to_string()
        })
    );
    assert_eq!(registry.component_names(), vec!["Printer"]);
}

#[test]
fn test_invalid_reference_policy_is_rejected() {
    let result = ReferenceDescriptor::builder("sinks", "Sink")
        .cardinality(Cardinality::Multiple)
        .greedy()
        .build();
    assert!(matches!(result, Err(ValidationError::InvalidPolicy { .. })));
}

#[test]
fn test_pid_collision_and_missing_collaborators() {
    let (_, _, registry) = setup();
    let error = registry
        .register(
            ComponentDescriptor::builder("Pool")
                .configuration(ConfigurationPolicy::Optional, ConfigurationReaction::Refresh)
                .build()
                .unwrap(),
        )
        .unwrap_err();
    assert_eq!(
        error,
        ValidationError::MissingConfigurationStore {
            component: "Pool".to_string()
        }
    );

    let error = registry
        .register(
            ComponentDescriptor::builder("Web")
                .reference(
                    ReferenceDescriptor::builder("db", "Database")
                        .global()
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        )
        .unwrap_err();
    assert!(matches!(error, ValidationError::MissingSharedContainer { .. }));

    let services = LocalServiceRegistry::default();
    let store = Arc::new(config_impl::MemoryConfigurationStore::new());
    let registry = ComponentRegistry::builder(
        Arc::new(services),
        Arc::new(SimpleBeanContainer::new()),
    )
    .with_configuration_store(store)
    .build()
    .unwrap();
    registry
        .register(
            ComponentDescriptor::builder("Primary")
                .configuration(ConfigurationPolicy::Optional, ConfigurationReaction::Refresh)
                .pid("pool")
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ComponentDescriptor::builder("Replica")
                .configuration(ConfigurationPolicy::Optional, ConfigurationReaction::Reactivate)
                .pid("pool")
                .build()
                .unwrap(),
        )
        .unwrap();
    let error = registry
        .register(
            ComponentDescriptor::builder("Strict")
                .configuration(ConfigurationPolicy::Require, ConfigurationReaction::Refresh)
                .pid("pool")
                .build()
                .unwrap(),
        )
        .unwrap_err();
    assert!(matches!(error, ValidationError::PidCollision { ref pid, .. } if pid == "pool"));

    registry.start().unwrap();
    assert_eq!(registry.get_component_holders_by_pid("pool").len(), 2);
}

#[test]
fn test_registration_closes_after_start() {
    let (_, container, registry) = setup();
    container.register("Printer", unit);
    registry
        .register(ComponentDescriptor::builder("Printer").build().unwrap())
        .unwrap();
    assert!(registry.start().unwrap());
    assert!(!registry.start().unwrap());

    let error = registry
        .register(ComponentDescriptor::builder("Late").build().unwrap())
        .unwrap_err();
    assert!(matches!(error, ValidationError::RegistrationClosed { .. }));
    assert_eq!(container.created_count("Printer"), 1);
}

#[test]
fn test_enable_and_disable_component() {
    let (_, container, registry) = setup();
    container.register("Printer", unit);
    registry
        .register(
            ComponentDescriptor::builder("Printer")
                .enabled(false)
                .build()
                .unwrap(),
        )
        .unwrap();
    assert!(matches!(
        registry.enable_component("Printer"),
        Err(DependencyError::LifecycleError { .. })
    ));

    registry.start().unwrap();
    let manager = registry.get_component_holder("Printer").unwrap();
    assert_eq!(manager.state(), LifecycleState::Disabled);

    registry.enable_component("Printer").unwrap();
    assert_eq!(manager.state(), LifecycleState::Active);
    assert!(matches!(
        registry.enable_component("Unknown"),
        Err(DependencyError::ComponentNotRegistered { .. })
    ));

    let error = registry.disable_component("Printer").unwrap_err();
    assert!(matches!(
        error,
        DependencyError::UnsupportedOperation { ref operation, .. } if operation == "disable_component"
    ));
    assert_eq!(manager.state(), LifecycleState::Active);
}

#[test]
fn test_internal_services_are_wired_privately() {
    let (services, container, registry) = setup();
    container.register("Cache", |_| Ok(Arc::new("cache".to_string()) as Instance));
    let bound = Arc::new(AtomicBool::new(false));
    let flag = bound.clone();
    container.register("User", move |context| {
        flag.store(context.service_as::<String>("cache").is_some(), Ordering::SeqCst);
        Ok(Arc::new(()) as Instance)
    });

    registry
        .register(
            ComponentDescriptor::builder("Cache")
                .provides("Cache")
                .internal()
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ComponentDescriptor::builder("User")
                .reference(
                    ReferenceDescriptor::builder("cache", "Cache")
                        .internal()
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        )
        .unwrap();
    registry.start().unwrap();
    registry.await_pending_bindings();

    assert!(bound.load(Ordering::SeqCst));
    assert!(services.lookup(&ServiceQuery::new("Cache")).is_empty());
    assert_eq!(registry.services().private().service_count(), 1);
    let user = registry.get_component_holder("User").unwrap();
    assert_eq!(user.state(), LifecycleState::Active);
}

#[test]
fn test_lookup_times_out() {
    let (_, _, registry) = setup();
    registry.start().unwrap();
    let error = registry
        .lookup_service(&ConsumerId::new("app"), &ServiceQuery::new("Missing"), None)
        .unwrap_err();
    assert!(matches!(
        error,
        DependencyError::LookupTimeout { timeout_ms: 50, .. }
    ));
}

#[test]
fn test_lookup_waits_for_late_publication() {
    let (services, _, registry) = setup();
    registry.start().unwrap();
    let publisher = {
        let services = services.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            services
                .publish_instance(
                    "Clock",
                    Arc::new("clock".to_string()),
                    Default::default(),
                )
                .unwrap()
        })
    };
    let found = registry
        .lookup_service(
            &ConsumerId::new("app"),
            &ServiceQuery::new("Clock"),
            Some(Duration::from_secs(2)),
        )
        .unwrap();
    assert_eq!(found.instance.downcast_ref::<String>().unwrap(), "clock");
    publisher.join().unwrap();
}

#[test]
fn test_creation_failure_disables_component_until_reenabled() {
    let (services, container, registry) = setup();
    let healthy = Arc::new(AtomicBool::new(false));
    let flag = healthy.clone();
    container.register("Flaky", move |_| {
        if flag.load(Ordering::SeqCst) {
            Ok(Arc::new("flaky".to_string()) as Instance)
        } else {
            Err("连接失败".into())
        }
    });
    registry
        .register(
            ComponentDescriptor::builder("Flaky")
                .provides("Flaky")
                .scope(ServiceScope::PerConsumer)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry.start().unwrap();

    let consumer = ConsumerId::new("app");
    let query = ServiceQuery::new("Flaky");
    let error = registry.lookup_service(&consumer, &query, None).unwrap_err();
    assert!(error.is_creation_failure());

    registry.await_pending_bindings();
    let manager = registry.get_component_holder("Flaky").unwrap();
    assert_eq!(manager.state(), LifecycleState::Disabled);
    assert!(manager.last_error().unwrap().contains("连接失败"));
    assert_eq!(manager.instance_count(), 0);
    assert!(services.lookup(&query).is_empty());

    healthy.store(true, Ordering::SeqCst);
    registry.enable_component("Flaky").unwrap();
    assert_eq!(manager.state(), LifecycleState::Active);
    assert!(manager.last_error().is_none());
    let found = registry.lookup_service(&consumer, &query, None).unwrap();
    assert_eq!(found.instance.downcast_ref::<String>().unwrap(), "flaky");
}

#[test]
fn test_immediate_creation_failure_does_not_affect_siblings() {
    let (_, container, registry) = setup();
    container.register("Broken", |_| Err("初始化失败".into()));
    container.register("Healthy", unit);
    for name in ["Broken", "Healthy"] {
        registry
            .register(ComponentDescriptor::builder(name).build().unwrap())
            .unwrap();
    }
    registry.start().unwrap();

    let broken = registry.get_component_holder("Broken").unwrap();
    assert_eq!(broken.state(), LifecycleState::Disabled);
    assert!(broken.last_error().is_some());
    let healthy = registry.get_component_holder("Healthy").unwrap();
    assert_eq!(healthy.state(), LifecycleState::Active);
}

#[derive(Default)]
struct IdleContainer;

impl SharedContainer for IdleContainer {
    fn pause(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn resume(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn start(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

#[test]
fn test_global_references_do_not_gate_component() {
    let services = LocalServiceRegistry::default();
    let container = Arc::new(SimpleBeanContainer::new());
    container.register("Web", unit);
    let registry = ComponentRegistry::builder(Arc::new(services), container.clone())
        .with_shared_container(Arc::new(IdleContainer))
        .build()
        .unwrap();
    let db = ReferenceDescriptor::builder("db", "Database")
        .global()
        .build()
        .unwrap();
    registry
        .register(
            ComponentDescriptor::builder("Web")
                .reference(db.clone())
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ComponentDescriptor::builder("Api")
                .reference(db)
                .build()
                .unwrap(),
        )
        .unwrap();
    container.register("Api", unit);
    registry.start().unwrap();

    let global = registry.global().unwrap();
    assert_eq!(global.references().len(), 1);
    assert!(!global.is_satisfied());
    assert_eq!(
        registry.get_component_holder("Web").unwrap().state(),
        LifecycleState::Active
    );
}

#[test]
fn test_shutdown_deactivates_components() {
    let (services, container, registry) = setup();
    container.register("Printer", unit);
    registry
        .register(
            ComponentDescriptor::builder("Printer")
                .provides("Printer")
                .immediate(true)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry.start().unwrap();
    assert_eq!(services.service_count(), 1);

    registry.shutdown();
    registry.shutdown();
    let manager = registry.get_component_holder("Printer").unwrap();
    assert_eq!(manager.state(), LifecycleState::Disabled);
    assert_eq!(services.service_count(), 0);
    assert_eq!(container.destroyed_count("Printer"), 1);
}
