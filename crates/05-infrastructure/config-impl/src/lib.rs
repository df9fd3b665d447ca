//! # Configuration Implementation
//!
//! 配置存储与注册表设置加载的具体实现。
//!
//! ## 主要组件
//!
//! - [`MemoryConfigurationStore`] - 进程内配置存储
//! - [`load_settings`] - 从配置文件和环境变量加载注册表设置

pub mod manager;
pub mod settings;

pub use manager::*;
pub use settings::*;

#[cfg(test)]
mod tests;
