//! 配置存储抽象接口

use crate::events::ConfigurationListener;
use infrastructure_common::{ConfigurationSnapshot, SubscriptionId};
use std::sync::Arc;

/// 配置存储 trait
///
/// 以 pid 为键保存组件配置，并在配置变化时通知订阅者
pub trait ConfigurationStore: Send + Sync {
    /// 获取 pid 当前的配置快照
    fn get(&self, pid: &str) -> Option<ConfigurationSnapshot>;

    /// 订阅某个 pid 的配置变更
    fn subscribe(&self, pid: &str, listener: Arc<dyn ConfigurationListener>) -> SubscriptionId;

    /// 取消订阅
    fn unsubscribe(&self, subscription: SubscriptionId);

    /// 存储名称
    fn name(&self) -> &str {
        "configuration-store"
    }
}
