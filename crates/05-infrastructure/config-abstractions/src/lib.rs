//! # Configuration Abstractions
//!
//! 组件配置存储抽象层。配置按字符串 pid 索引，每个 pid 对应一组属性。
//!
//! ## 核心接口
//!
//! - [`ConfigurationStore`] - 配置存储接口
//! - [`ConfigurationListener`] - 配置变更监听接口
//! - [`ConfigurationEvent`] - 配置变更事件

pub mod events;
pub mod provider;

pub use events::*;
pub use provider::*;
