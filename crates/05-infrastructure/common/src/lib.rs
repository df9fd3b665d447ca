//! # Infrastructure Common
//!
//! 组件注册表的公共定义：组件与引用描述符、服务属性、过滤器、
//! 生命周期状态、配置快照以及各层共享的错误类型。
//!
//! ## 核心类型
//!
//! - [`ComponentDescriptor`] - 组件描述符，注册前完成校验
//! - [`ReferenceDescriptor`] - 组件对其他服务的引用
//! - [`ServiceProperties`] - 服务属性集合
//! - [`Filter`] - 服务属性过滤器
//! - [`LifecycleState`] - 生命周期管理器状态

pub mod component;
pub mod configuration;
pub mod errors;
pub mod filter;
pub mod lifecycle;
pub mod metadata;

pub use component::*;
pub use configuration::*;
pub use errors::*;
pub use filter::*;
pub use lifecycle::*;
pub use metadata::*;
