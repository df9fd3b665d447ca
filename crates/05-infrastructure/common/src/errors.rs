//! 错误类型定义

use thiserror::Error;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    #[error("配置解析失败: {source}")]
    ParseError {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("配置序列化失败: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error("配置验证失败: {message}")]
    ValidationError { message: String },
}

/// 依赖注入错误类型
#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("组件未注册: {type_name}")]
    ComponentNotRegistered { type_name: String },

    #[error("组件创建失败: {type_name}, 原因: {source}")]
    ComponentCreationFailed {
        type_name: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("循环依赖检测到: {dependency_chain}")]
    CircularDependency { dependency_chain: String },

    #[error("依赖解析失败: {type_name}, 原因: {message}")]
    DependencyResolutionFailed { type_name: String, message: String },

    #[error("服务查找超时: {contract}, 等待 {timeout_ms} 毫秒")]
    LookupTimeout { contract: String, timeout_ms: u64 },

    #[error("服务不可用: {contract}")]
    ServiceUnavailable { contract: String },

    #[error("不支持的操作: {operation} ({component})")]
    UnsupportedOperation { operation: String, component: String },

    #[error("组件生命周期管理失败: {message}")]
    LifecycleError { message: String },
}

impl DependencyError {
    /// 是否为循环依赖错误
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }

    /// 是否为组件实例创建失败（来自 bean 容器）
    pub fn is_creation_failure(&self) -> bool {
        matches!(self, Self::ComponentCreationFailed { .. })
    }
}

/// 描述符验证错误类型
///
/// 在注册阶段同步返回给调用方，注册表不会启动出错的描述符
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("验证失败: {message}")]
    ValidationFailed { message: String },

    #[error("组件名称不能为空")]
    EmptyName,

    #[error("组件名称重复: {name}")]
    DuplicateComponentName { name: String },

    #[error("引用名称重复: {component}.{reference}")]
    DuplicateReferenceName { component: String, reference: String },

    #[error("引用缺少目标契约: {component}.{reference}")]
    MissingContract { component: String, reference: String },

    #[error("无效的引用策略: {component}.{reference}, 原因: {reason}")]
    InvalidPolicy {
        component: String,
        reference: String,
        reason: String,
    },

    #[error("无效的过滤器: {filter}, 原因: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("作用域 {scope} 需要提供服务契约: {component}")]
    ScopeWithoutService { component: String, scope: String },

    #[error("配置依赖缺少 pid: {component}")]
    MissingPid { component: String },

    #[error("pid 冲突: {pid}, 组件 {component} 与 {existing} 的配置策略不一致")]
    PidCollision {
        pid: String,
        component: String,
        existing: String,
    },

    #[error("组件 {component} 声明了全局引用 {reference}，但注册表没有共享容器")]
    MissingSharedContainer { component: String, reference: String },

    #[error("组件 {component} 声明了配置依赖，但注册表没有配置存储")]
    MissingConfigurationStore { component: String },

    #[error("注册表已启动，无法再注册组件: {component}")]
    RegistrationClosed { component: String },
}

impl ValidationError {
    /// 创建新的验证错误
    pub fn new(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    /// 创建引用策略错误
    pub fn invalid_policy(
        component: impl Into<String>,
        reference: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidPolicy {
            component: component.into(),
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// 创建过滤器错误
    pub fn invalid_filter(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            filter: filter.into(),
            reason: reason.into(),
        }
    }
}

/// 服务注册表门面错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("服务发布缺少契约")]
    EmptyContracts,

    #[error("服务注册已撤销: {service_id}")]
    RegistrationRemoved { service_id: u64 },
}

/// 基础设施错误类型
#[derive(Error, Debug)]
pub enum InfrastructureError {
    #[error("配置错误: {source}")]
    ConfigError {
        #[from]
        source: ConfigError,
    },

    #[error("依赖注入错误: {source}")]
    DependencyError {
        #[from]
        source: DependencyError,
    },

    #[error("验证错误: {source}")]
    ValidationError {
        #[from]
        source: ValidationError,
    },

    #[error("注册表错误: {source}")]
    RegistryError {
        #[from]
        source: RegistryError,
    },

    #[error("基础设施启动失败: {message}")]
    BootstrapFailed { message: String },
}

/// 结果类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type DependencyResult<T> = Result<T, DependencyError>;
pub type ValidationResult<T> = Result<T, ValidationError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
pub type InfrastructureResult<T> = Result<T, InfrastructureError>;
