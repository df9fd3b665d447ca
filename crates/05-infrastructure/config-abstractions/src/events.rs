//! 配置变更事件定义

use infrastructure_common::ConfigurationSnapshot;
use serde::{Deserialize, Serialize};

/// 配置变更事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigurationEventKind {
    /// 配置创建或更新
    Updated,
    /// 配置删除
    Deleted,
}

/// 配置变更事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationEvent {
    /// 事件类型
    pub kind: ConfigurationEventKind,
    /// 配置 pid
    pub pid: String,
    /// 更新后的快照，删除事件为 None
    pub snapshot: Option<ConfigurationSnapshot>,
    /// 事件时间
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ConfigurationEvent {
    /// 创建配置更新事件
    pub fn updated(snapshot: ConfigurationSnapshot) -> Self {
        Self {
            kind: ConfigurationEventKind::Updated,
            pid: snapshot.pid.clone(),
            snapshot: Some(snapshot),
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建配置删除事件
    pub fn deleted(pid: impl Into<String>) -> Self {
        Self {
            kind: ConfigurationEventKind::Deleted,
            pid: pid.into(),
            snapshot: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 是否为删除事件
    pub fn is_deleted(&self) -> bool {
        self.kind == ConfigurationEventKind::Deleted
    }
}

/// 配置变更监听器
///
/// 回调在配置存储的调用线程上执行，存储不会在持锁时回调
pub trait ConfigurationListener: Send + Sync {
    /// 处理配置变更事件
    fn configuration_changed(&self, event: &ConfigurationEvent);
}
