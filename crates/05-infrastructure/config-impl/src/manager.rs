//! 进程内配置存储实现

use config_abstractions::{ConfigurationEvent, ConfigurationListener, ConfigurationStore};
use dashmap::DashMap;
use infrastructure_common::{ConfigurationSnapshot, ServiceProperties, SubscriptionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

type ListenerTable = HashMap<SubscriptionId, (String, Arc<dyn ConfigurationListener>)>;

/// 进程内配置存储
///
/// 更新与删除在调用线程上同步通知订阅者，通知时不持有任何内部锁
pub struct MemoryConfigurationStore {
    /// pid -> 配置快照
    configurations: DashMap<String, ConfigurationSnapshot>,
    /// 订阅表
    listeners: RwLock<ListenerTable>,
    next_subscription: AtomicU64,
    revision: AtomicU64,
}

impl MemoryConfigurationStore {
    /// 创建空的配置存储
    pub fn new() -> Self {
        Self {
            configurations: DashMap::new(),
            listeners: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            revision: AtomicU64::new(0),
        }
    }

    /// 预置配置（构建器风格，不通知订阅者）
    pub fn with_configuration(self, pid: impl Into<String>, properties: ServiceProperties) -> Self {
        let pid = pid.into();
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.configurations
            .insert(pid.clone(), ConfigurationSnapshot::new(pid, properties, revision));
        self
    }

    /// 创建或更新配置
    pub fn update(&self, pid: impl Into<String>, properties: ServiceProperties) -> ConfigurationSnapshot {
        let pid = pid.into();
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = ConfigurationSnapshot::new(pid.clone(), properties, revision);
        self.configurations.insert(pid.clone(), snapshot.clone());
        info!("更新配置: {} (revision {})", pid, revision);

        self.notify(&pid, &ConfigurationEvent::updated(snapshot.clone()));
        snapshot
    }

    /// 删除配置，配置不存在时返回 false
    pub fn delete(&self, pid: &str) -> bool {
        if self.configurations.remove(pid).is_none() {
            debug!("删除不存在的配置: {}", pid);
            return false;
        }
        info!("删除配置: {}", pid);
        self.notify(pid, &ConfigurationEvent::deleted(pid));
        true
    }

    /// 所有配置 pid
    pub fn pids(&self) -> Vec<String> {
        let mut pids: Vec<String> = self
            .configurations
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        pids.sort();
        pids
    }

    /// 订阅者数量
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, pid: &str, event: &ConfigurationEvent) {
        let targets: Vec<Arc<dyn ConfigurationListener>> = self
            .listeners
            .read()
            .values()
            .filter(|(subscribed, _)| subscribed == pid)
            .map(|(_, listener)| listener.clone())
            .collect();

        debug!("通知配置变更: {} -> {} 个订阅者", pid, targets.len());
        for listener in targets {
            listener.configuration_changed(event);
        }
    }
}

impl Default for MemoryConfigurationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationStore for MemoryConfigurationStore {
    fn get(&self, pid: &str) -> Option<ConfigurationSnapshot> {
        self.configurations.get(pid).map(|entry| entry.value().clone())
    }

    fn subscribe(&self, pid: &str, listener: Arc<dyn ConfigurationListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .insert(id, (pid.to_string(), listener));
        debug!("订阅配置: {} ({})", pid, id);
        id
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if self.listeners.write().remove(&subscription).is_some() {
            debug!("取消配置订阅: {}", subscription);
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
