//! 进程内服务注册表
//!
//! 服务表与订阅表在同一把锁内维护；事件在发布线程上投递，投递时不持有表锁，
//! 监听器可以在回调中再次访问注册表。
//!
//! 同一服务的事件按发生顺序投递：发布、属性更新与撤销在该服务自己的投递锁内
//! 计算并投递事件，撤销之后不会再投递更新事件。

use di_abstractions::{
    Instance, ServiceEventKind, ServiceHandle, ServiceListener, ServiceObject, ServiceQuery,
    ServiceRegistration, ServiceRegistry,
};
use infrastructure_common::{
    ConsumerId, DependencyError, RegistryError, ServiceProperties, SubscriptionId, OBJECT_CLASS,
    SERVICE_ID,
};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

struct ServiceEntry {
    handle: ServiceHandle,
    service: ServiceObject,
    ordering: Arc<ReentrantMutex<()>>,
}

struct Subscriber {
    query: ServiceQuery,
    listener: Arc<dyn ServiceListener>,
}

#[derive(Default)]
struct ServiceTable {
    services: BTreeMap<u64, ServiceEntry>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

type Delivery = Vec<(Arc<dyn ServiceListener>, ServiceEventKind, ServiceHandle)>;

struct LocalInner {
    name: String,
    table: Mutex<ServiceTable>,
    next_service: AtomicU64,
    next_subscription: AtomicU64,
}

impl LocalInner {
    fn deliver(&self, delivery: Delivery) {
        for (listener, kind, handle) in delivery {
            listener.service_changed(kind, &handle);
        }
    }

    fn ordering(&self, id: u64) -> Option<Arc<ReentrantMutex<()>>> {
        self.table
            .lock()
            .services
            .get(&id)
            .map(|entry| entry.ordering.clone())
    }

    fn set_properties(&self, id: u64, properties: ServiceProperties) -> Result<(), RegistryError> {
        let ordering = self
            .ordering(id)
            .ok_or(RegistryError::RegistrationRemoved { service_id: id })?;
        let _ordered = ordering.lock();
        let delivery = {
            let mut table = self.table.lock();
            let ServiceTable {
                services,
                subscribers,
            } = &mut *table;
            let entry = services
                .get_mut(&id)
                .ok_or(RegistryError::RegistrationRemoved { service_id: id })?;

            let previous = entry.handle.clone();
            let contracts = previous.contracts().to_vec();
            let properties = decorate(id, &contracts, properties);
            let current = ServiceHandle::new(id, contracts, properties);
            entry.handle = current.clone();

            subscribers
                .values()
                .filter_map(|subscriber| {
                    let was = subscriber.query.matches(&previous);
                    let now = subscriber.query.matches(&current);
                    let kind = match (was, now) {
                        (_, true) => ServiceEventKind::Modified,
                        (true, false) => ServiceEventKind::ModifiedEndMatch,
                        (false, false) => return None,
                    };
                    Some((subscriber.listener.clone(), kind, current.clone()))
                })
                .collect::<Delivery>()
        };
        debug!("{}: 服务属性更新 #{}", self.name, id);
        self.deliver(delivery);
        Ok(())
    }

    fn unpublish(&self, id: u64) {
        let Some(ordering) = self.ordering(id) else {
            return;
        };
        let _ordered = ordering.lock();
        let delivery = {
            let mut table = self.table.lock();
            let Some(entry) = table.services.remove(&id) else {
                return;
            };
            table
                .subscribers
                .values()
                .filter(|subscriber| subscriber.query.matches(&entry.handle))
                .map(|subscriber| {
                    (
                        subscriber.listener.clone(),
                        ServiceEventKind::Removed,
                        entry.handle.clone(),
                    )
                })
                .collect::<Delivery>()
        };
        info!("{}: 撤销服务 #{}", self.name, id);
        self.deliver(delivery);
    }
}

fn decorate(id: u64, contracts: &[String], properties: ServiceProperties) -> ServiceProperties {
    properties
        .with(SERVICE_ID, id)
        .with(OBJECT_CLASS, contracts.to_vec())
}

/// 进程内服务注册表
#[derive(Clone)]
pub struct LocalServiceRegistry(Arc<LocalInner>);

impl LocalServiceRegistry {
    /// 创建注册表
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::new(LocalInner {
            name: name.into(),
            table: Mutex::new(ServiceTable::default()),
            next_service: AtomicU64::new(1),
            next_subscription: AtomicU64::new(1),
        }))
    }

    /// 注册表名称
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// 已发布的服务数量
    pub fn service_count(&self) -> usize {
        self.0.table.lock().services.len()
    }

    /// 订阅数量
    pub fn subscription_count(&self) -> usize {
        self.0.table.lock().subscribers.len()
    }

    /// 发布实例服务的便捷方法
    pub fn publish_instance(
        &self,
        contract: impl Into<String>,
        instance: Instance,
        properties: ServiceProperties,
    ) -> Result<Arc<dyn ServiceRegistration>, RegistryError> {
        self.publish(vec![contract.into()], ServiceObject::Instance(instance), properties)
    }
}

impl Default for LocalServiceRegistry {
    fn default() -> Self {
        Self::new("local")
    }
}

impl ServiceRegistry for LocalServiceRegistry {
    fn publish(
        &self,
        contracts: Vec<String>,
        service: ServiceObject,
        properties: ServiceProperties,
    ) -> Result<Arc<dyn ServiceRegistration>, RegistryError> {
        if contracts.is_empty() {
            return Err(RegistryError::EmptyContracts);
        }
        let id = self.0.next_service.fetch_add(1, Ordering::SeqCst);
        let properties = decorate(id, &contracts, properties);
        let handle = ServiceHandle::new(id, contracts, properties);
        let ordering = Arc::new(ReentrantMutex::new(()));
        let _ordered = ordering.lock();

        let delivery = {
            let mut table = self.0.table.lock();
            table.services.insert(
                id,
                ServiceEntry {
                    handle: handle.clone(),
                    service,
                    ordering: ordering.clone(),
                },
            );
            table
                .subscribers
                .values()
                .filter(|subscriber| subscriber.query.matches(&handle))
                .map(|subscriber| {
                    (
                        subscriber.listener.clone(),
                        ServiceEventKind::Added,
                        handle.clone(),
                    )
                })
                .collect::<Delivery>()
        };
        info!("{}: 发布服务 {} (ranking {})", self.0.name, handle, handle.ranking());
        self.0.deliver(delivery);

        Ok(Arc::new(LocalRegistration {
            registry: self.0.clone(),
            id,
        }))
    }

    fn lookup(&self, query: &ServiceQuery) -> Vec<ServiceHandle> {
        let mut handles: Vec<ServiceHandle> = self
            .0
            .table
            .lock()
            .services
            .values()
            .filter(|entry| query.matches(&entry.handle))
            .map(|entry| entry.handle.clone())
            .collect();
        ServiceHandle::sort_best_first(&mut handles);
        handles
    }

    fn resolve(
        &self,
        handle: &ServiceHandle,
        consumer: &ConsumerId,
    ) -> Result<Instance, DependencyError> {
        let service = self
            .0
            .table
            .lock()
            .services
            .get(&handle.id())
            .map(|entry| entry.service.clone());

        match service {
            Some(ServiceObject::Instance(instance)) => Ok(instance),
            Some(ServiceObject::Factory(factory)) => factory.get_service(consumer, handle),
            None => Err(DependencyError::ServiceUnavailable {
                contract: handle.to_string(),
            }),
        }
    }

    fn release(&self, handle: &ServiceHandle, consumer: &ConsumerId, instance: &Instance) {
        let service = self
            .0
            .table
            .lock()
            .services
            .get(&handle.id())
            .map(|entry| entry.service.clone());

        if let Some(ServiceObject::Factory(factory)) = service {
            factory.unget_service(consumer, handle, instance);
        }
    }

    fn subscribe(&self, query: ServiceQuery, listener: Arc<dyn ServiceListener>) -> SubscriptionId {
        let id = SubscriptionId(self.0.next_subscription.fetch_add(1, Ordering::SeqCst));
        debug!("{}: 订阅服务 {} ({})", self.0.name, query, id);
        self.0
            .table
            .lock()
            .subscribers
            .insert(id, Subscriber { query, listener });
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if self.0.table.lock().subscribers.remove(&subscription).is_some() {
            debug!("{}: 取消订阅 {}", self.0.name, subscription);
        }
    }
}

struct LocalRegistration {
    registry: Arc<LocalInner>,
    id: u64,
}

impl ServiceRegistration for LocalRegistration {
    fn handle(&self) -> ServiceHandle {
        let table = self.registry.table.lock();
        match table.services.get(&self.id) {
            Some(entry) => entry.handle.clone(),
            None => ServiceHandle::new(self.id, Vec::new(), ServiceProperties::new()),
        }
    }

    fn set_properties(&self, properties: ServiceProperties) -> Result<(), RegistryError> {
        self.registry.set_properties(self.id, properties)
    }

    fn unpublish(&self) {
        self.registry.unpublish(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrastructure_common::{Filter, SERVICE_RANKING};
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(ServiceEventKind, u64)>>,
    }

    impl ServiceListener for Recorder {
        fn service_changed(&self, kind: ServiceEventKind, handle: &ServiceHandle) {
            self.events.lock().push((kind, handle.id()));
        }
    }

    fn instance(value: &str) -> Instance {
        Arc::new(value.to_string())
    }

    #[test]
    fn test_publish_modify_unpublish_events() {
        let registry = LocalServiceRegistry::default();
        let recorder = Arc::new(Recorder::default());
        let query = ServiceQuery::new("Storage").with_filter(Filter::parse("(region=eu)").unwrap());
        registry.subscribe(query, recorder.clone());

        let registration = registry
            .publish_instance("Storage", instance("a"), ServiceProperties::new().with("region", "eu"))
            .unwrap();
        let id = registration.handle().id();
        registration
            .set_properties(ServiceProperties::new().with("region", "eu").with("tier", 1))
            .unwrap();
        registration
            .set_properties(ServiceProperties::new().with("region", "us"))
            .unwrap();
        registration.unpublish();
        registration.unpublish();

        assert_eq!(
            *recorder.events.lock(),
            vec![
                (ServiceEventKind::Added, id),
                (ServiceEventKind::Modified, id),
                (ServiceEventKind::ModifiedEndMatch, id),
            ]
        );
        assert!(matches!(
            registration.set_properties(ServiceProperties::new()),
            Err(RegistryError::RegistrationRemoved { .. })
        ));
    }

    #[test]
    fn test_lookup_orders_by_ranking_then_age() {
        let registry = LocalServiceRegistry::default();
        let low = registry
            .publish_instance("Storage", instance("low"), ServiceProperties::new())
            .unwrap();
        let high = registry
            .publish_instance(
                "Storage",
                instance("high"),
                ServiceProperties::new().with(SERVICE_RANKING, 10),
            )
            .unwrap();
        let tie = registry
            .publish_instance("Storage", instance("tie"), ServiceProperties::new())
            .unwrap();

        let ids: Vec<u64> = registry
            .lookup(&ServiceQuery::new("Storage"))
            .iter()
            .map(ServiceHandle::id)
            .collect();
        assert_eq!(
            ids,
            vec![high.handle().id(), low.handle().id(), tie.handle().id()]
        );
    }

    #[test]
    fn test_publish_requires_contract() {
        let registry = LocalServiceRegistry::default();
        let result = registry.publish(
            Vec::new(),
            ServiceObject::Instance(instance("a")),
            ServiceProperties::new(),
        );
        assert!(matches!(result, Err(RegistryError::EmptyContracts)));
    }

    #[test]
    fn test_resolve_after_unpublish_is_unavailable() {
        let registry = LocalServiceRegistry::default();
        let registration = registry
            .publish_instance("Storage", instance("a"), ServiceProperties::new())
            .unwrap();
        let handle = registration.handle();
        let consumer = ConsumerId::new("test");
        assert!(registry.resolve(&handle, &consumer).is_ok());

        registration.unpublish();
        assert!(matches!(
            registry.resolve(&handle, &consumer),
            Err(DependencyError::ServiceUnavailable { .. })
        ));
    }

    #[test]
    fn test_wait_for_times_out_then_succeeds() {
        let registry = LocalServiceRegistry::default();
        let query = ServiceQuery::new("Storage");

        let result = registry.wait_for(&query, Duration::from_millis(20));
        assert!(matches!(result, Err(DependencyError::LookupTimeout { .. })));
        assert_eq!(registry.subscription_count(), 0);

        let publisher = registry.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher
                .publish_instance("Storage", instance("late"), ServiceProperties::new())
                .unwrap()
        });
        let handle = registry.wait_for(&query, Duration::from_secs(5)).unwrap();
        let registration = worker.join().unwrap();
        assert_eq!(handle, registration.handle());
    }

    struct SlowRecorder {
        events: Mutex<Vec<ServiceEventKind>>,
        modifying: Mutex<Option<std::sync::mpsc::Sender<()>>>,
    }

    impl ServiceListener for SlowRecorder {
        fn service_changed(&self, kind: ServiceEventKind, _handle: &ServiceHandle) {
            if kind == ServiceEventKind::Modified {
                if let Some(started) = self.modifying.lock().take() {
                    let _ = started.send(());
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            self.events.lock().push(kind);
        }
    }

    #[test]
    fn test_removal_is_not_overtaken_by_modification() {
        let registry = LocalServiceRegistry::default();
        let (started, modifying) = std::sync::mpsc::channel();
        let recorder = Arc::new(SlowRecorder {
            events: Mutex::new(Vec::new()),
            modifying: Mutex::new(Some(started)),
        });
        registry.subscribe(ServiceQuery::new("Storage"), recorder.clone());
        let registration = registry
            .publish_instance("Storage", instance("a"), ServiceProperties::new())
            .unwrap();

        let updater = registration.clone();
        let worker = std::thread::spawn(move || {
            updater
                .set_properties(ServiceProperties::new().with("tier", 2))
                .unwrap();
        });
        modifying.recv().unwrap();
        registration.unpublish();
        worker.join().unwrap();

        assert_eq!(
            *recorder.events.lock(),
            vec![
                ServiceEventKind::Added,
                ServiceEventKind::Modified,
                ServiceEventKind::Removed,
            ]
        );
    }
}
