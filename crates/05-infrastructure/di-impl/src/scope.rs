//! 作用域上下文
//!
//! 作用域上下文保存组件的存活实例及其创建凭据，并决定实例何时销毁。
//! 实例的创建与销毁委托给 [`InstanceCreator`]，调用时不持有上下文内部的锁。
//! 创建失败时上下文会先回滚对应的槽位再返回错误。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use di_abstractions::{BoundService, Instance};
use infrastructure_common::{ConsumerId, DependencyError, ServiceScope};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 实例的创建凭据
#[derive(Debug, Clone)]
pub struct CreationTicket {
    /// 凭据 ID
    pub id: Uuid,
    /// 请求创建的消费者
    pub consumer: ConsumerId,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 创建时解析的静态依赖，销毁时归还
    pub dependencies: Vec<BoundService>,
}

impl CreationTicket {
    /// 创建凭据
    pub fn new(consumer: ConsumerId, dependencies: Vec<BoundService>) -> Self {
        Self {
            id: Uuid::new_v4(),
            consumer,
            created_at: Utc::now(),
            dependencies,
        }
    }
}

/// 实例创建者
pub trait InstanceCreator {
    /// 为消费者创建实例
    fn create(&self, consumer: &ConsumerId) -> Result<(Instance, CreationTicket), DependencyError>;

    /// 销毁实例
    fn destroy(&self, instance: &Instance, ticket: CreationTicket);
}

/// 作用域上下文 trait
pub trait ScopeContext: Send + Sync {
    /// 作用域
    fn scope(&self) -> ServiceScope;

    /// 获取或创建消费者可见的实例
    fn get(
        &self,
        consumer: &ConsumerId,
        creator: &dyn InstanceCreator,
    ) -> Result<Instance, DependencyError>;

    /// 消费者归还实例，实例被销毁时返回 true
    fn release(
        &self,
        consumer: &ConsumerId,
        instance: &Instance,
        creator: &dyn InstanceCreator,
    ) -> bool;

    /// 销毁全部实例，返回销毁数量
    fn destroy_all(&self, creator: &dyn InstanceCreator) -> usize;

    /// 存活实例数量
    fn instance_count(&self) -> usize;

    /// 存活实例
    fn instances(&self) -> Vec<Instance>;
}

/// 按作用域创建上下文
pub fn scope_context_for(scope: ServiceScope) -> Box<dyn ScopeContext> {
    match scope {
        ServiceScope::Singleton => Box::new(SingletonScopeContext::new()),
        ServiceScope::PerConsumer => Box::new(PerConsumerScopeContext::new()),
        ServiceScope::PerRequest => Box::new(PerRequestScopeContext::new()),
    }
}

/// 已创建的实例；凭据只能被取走一次，保证只销毁一次
struct Created {
    instance: Instance,
    ticket: Mutex<Option<CreationTicket>>,
}

impl Created {
    fn new((instance, ticket): (Instance, CreationTicket)) -> Arc<Self> {
        Arc::new(Self {
            instance,
            ticket: Mutex::new(Some(ticket)),
        })
    }

    fn destroy(&self, creator: &dyn InstanceCreator) -> bool {
        let ticket = self.ticket.lock().take();
        match ticket {
            Some(ticket) => {
                creator.destroy(&self.instance, ticket);
                true
            }
            None => false,
        }
    }
}

fn instance_key(instance: &Instance) -> usize {
    Arc::as_ptr(instance).cast::<()>() as usize
}

type Slot = OnceCell<Arc<Created>>;

/// 单例作用域：整个组件一个实例
pub struct SingletonScopeContext {
    slot: RwLock<Arc<Slot>>,
}

impl SingletonScopeContext {
    /// 创建空的单例上下文
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Arc::new(OnceCell::new())),
        }
    }
}

impl Default for SingletonScopeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeContext for SingletonScopeContext {
    fn scope(&self) -> ServiceScope {
        ServiceScope::Singleton
    }

    fn get(
        &self,
        consumer: &ConsumerId,
        creator: &dyn InstanceCreator,
    ) -> Result<Instance, DependencyError> {
        let slot = self.slot.read().clone();
        let created = slot
            .get_or_try_init(|| creator.create(consumer).map(Created::new))?
            .clone();

        if !Arc::ptr_eq(&slot, &self.slot.read()) {
            // 创建期间上下文已被销毁
            created.destroy(creator);
            return Err(DependencyError::ServiceUnavailable {
                contract: consumer.to_string(),
            });
        }
        Ok(created.instance.clone())
    }

    fn release(&self, _consumer: &ConsumerId, _instance: &Instance, _creator: &dyn InstanceCreator) -> bool {
        false
    }

    fn destroy_all(&self, creator: &dyn InstanceCreator) -> usize {
        let previous = std::mem::replace(&mut *self.slot.write(), Arc::new(OnceCell::new()));
        match previous.get() {
            Some(created) if created.destroy(creator) => 1,
            _ => 0,
        }
    }

    fn instance_count(&self) -> usize {
        usize::from(self.slot.read().get().is_some())
    }

    fn instances(&self) -> Vec<Instance> {
        self.slot
            .read()
            .get()
            .map(|created| created.instance.clone())
            .into_iter()
            .collect()
    }
}

struct ConsumerSlot {
    cell: Slot,
    users: AtomicUsize,
}

/// 按消费者作用域：每个消费者一个实例，消费者全部归还后销毁
pub struct PerConsumerScopeContext {
    slots: DashMap<ConsumerId, Arc<ConsumerSlot>>,
}

impl PerConsumerScopeContext {
    /// 创建空的按消费者上下文
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// 销毁某个消费者的实例，不影响其他消费者
    pub fn destroy(&self, consumer: &ConsumerId, creator: &dyn InstanceCreator) -> bool {
        match self.slots.remove(consumer) {
            Some((_, slot)) => slot.cell.get().is_some_and(|created| created.destroy(creator)),
            None => false,
        }
    }
}

impl Default for PerConsumerScopeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeContext for PerConsumerScopeContext {
    fn scope(&self) -> ServiceScope {
        ServiceScope::PerConsumer
    }

    fn get(
        &self,
        consumer: &ConsumerId,
        creator: &dyn InstanceCreator,
    ) -> Result<Instance, DependencyError> {
        let slot = {
            let entry = self.slots.entry(consumer.clone()).or_insert_with(|| {
                Arc::new(ConsumerSlot {
                    cell: OnceCell::new(),
                    users: AtomicUsize::new(0),
                })
            });
            entry.users.fetch_add(1, Ordering::SeqCst);
            entry.clone()
        };

        match slot.cell.get_or_try_init(|| creator.create(consumer).map(Created::new)) {
            Ok(created) => Ok(created.instance.clone()),
            Err(e) => {
                slot.users.fetch_sub(1, Ordering::SeqCst);
                self.slots.remove_if(consumer, |_, current| {
                    Arc::ptr_eq(current, &slot)
                        && current.cell.get().is_none()
                        && current.users.load(Ordering::SeqCst) == 0
                });
                debug!("按消费者实例创建失败，已回滚: {}", consumer);
                Err(e)
            }
        }
    }

    fn release(
        &self,
        consumer: &ConsumerId,
        _instance: &Instance,
        creator: &dyn InstanceCreator,
    ) -> bool {
        let Some(slot) = self.slots.get(consumer).map(|entry| entry.clone()) else {
            return false;
        };
        let remaining = slot
            .users
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |users| users.checked_sub(1));
        if remaining != Ok(1) {
            return false;
        }

        let removed = self.slots.remove_if(consumer, |_, current| {
            Arc::ptr_eq(current, &slot) && current.users.load(Ordering::SeqCst) == 0
        });
        match removed {
            Some((_, slot)) => slot.cell.get().is_some_and(|created| created.destroy(creator)),
            None => false,
        }
    }

    fn destroy_all(&self, creator: &dyn InstanceCreator) -> usize {
        let consumers: Vec<ConsumerId> = self.slots.iter().map(|entry| entry.key().clone()).collect();
        consumers
            .iter()
            .filter(|consumer| self.destroy(consumer, creator))
            .count()
    }

    fn instance_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| entry.value().cell.get().is_some())
            .count()
    }

    fn instances(&self) -> Vec<Instance> {
        self.slots
            .iter()
            .filter_map(|entry| entry.value().cell.get().map(|c| c.instance.clone()))
            .collect()
    }
}

/// 按请求作用域：每次获取都创建新实例，按实例身份归还
pub struct PerRequestScopeContext {
    instances: DashMap<usize, Arc<Created>>,
}

impl PerRequestScopeContext {
    /// 创建空的按请求上下文
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// 按实例身份销毁，无需调用方提供创建凭据
    pub fn destroy(&self, instance: &Instance, creator: &dyn InstanceCreator) -> bool {
        match self.instances.remove(&instance_key(instance)) {
            Some((_, created)) => created.destroy(creator),
            None => false,
        }
    }
}

impl Default for PerRequestScopeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeContext for PerRequestScopeContext {
    fn scope(&self) -> ServiceScope {
        ServiceScope::PerRequest
    }

    fn get(
        &self,
        consumer: &ConsumerId,
        creator: &dyn InstanceCreator,
    ) -> Result<Instance, DependencyError> {
        let created = Created::new(creator.create(consumer)?);
        let instance = created.instance.clone();
        self.instances.insert(instance_key(&instance), created);
        Ok(instance)
    }

    fn release(
        &self,
        _consumer: &ConsumerId,
        instance: &Instance,
        creator: &dyn InstanceCreator,
    ) -> bool {
        self.destroy(instance, creator)
    }

    fn destroy_all(&self, creator: &dyn InstanceCreator) -> usize {
        let keys: Vec<usize> = self.instances.iter().map(|entry| *entry.key()).collect();
        keys.into_iter()
            .filter_map(|key| self.instances.remove(&key))
            .filter(|(_, created)| created.destroy(creator))
            .count()
    }

    fn instance_count(&self) -> usize {
        self.instances.len()
    }

    fn instances(&self) -> Vec<Instance> {
        self.instances
            .iter()
            .map(|entry| entry.value().instance.clone())
            .collect()
    }
}
