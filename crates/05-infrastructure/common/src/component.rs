//! 组件描述符定义
//!
//! 描述符由外部扫描器产生的元数据构建，经过校验后不可变。
//! [`ComponentDescriptor::builder`] 提供流式构建，[`ComponentDefinition`]
//! 接受纯数据结构（契约列表、属性映射、引用列表）并执行同样的校验。

use crate::errors::ValidationError;
use crate::filter::Filter;
use crate::lifecycle::{ConsumerId, ServiceScope};
use crate::metadata::ServiceProperties;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// 引用基数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cardinality {
    /// 0..1
    #[serde(rename = "0..1")]
    Optional,
    /// 1..1
    #[default]
    #[serde(rename = "1..1")]
    Mandatory,
    /// 0..n
    #[serde(rename = "0..n")]
    Multiple,
    /// 1..n
    #[serde(rename = "1..n")]
    AtLeastOne,
}

impl Cardinality {
    /// 最少绑定数量
    pub fn min(&self) -> usize {
        match self {
            Self::Optional | Self::Multiple => 0,
            Self::Mandatory | Self::AtLeastOne => 1,
        }
    }

    /// 是否允许绑定多个目标
    pub fn is_multiple(&self) -> bool {
        matches!(self, Self::Multiple | Self::AtLeastOne)
    }

    /// 是否为可选引用
    pub fn is_optional(&self) -> bool {
        self.min() == 0
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Optional => "0..1",
            Self::Mandatory => "1..1",
            Self::Multiple => "0..n",
            Self::AtLeastOne => "1..n",
        };
        f.write_str(text)
    }
}

/// 引用动态性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
    /// 静态引用，绑定变化需要重建消费者
    #[default]
    Static,
    /// 动态引用，原地换绑
    Dynamic,
}

/// 引用贪婪性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyOption {
    /// 保持当前绑定
    #[default]
    Reluctant,
    /// 更高排名的候选者抢占当前绑定
    Greedy,
}

/// 配置依赖策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationPolicy {
    /// 不使用外部配置
    #[default]
    Ignore,
    /// 有配置时使用
    Optional,
    /// 没有配置时不激活
    Require,
}

/// 配置更新时组件的反应方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationReaction {
    /// 只刷新属性
    #[default]
    Refresh,
    /// 停用后重新激活
    Reactivate,
}

/// 配置依赖
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigurationDependency {
    /// 策略
    #[serde(default)]
    pub policy: ConfigurationPolicy,
    /// 配置 pid
    #[serde(default)]
    pub pid: Option<String>,
    /// 更新反应
    #[serde(default)]
    pub reaction: ConfigurationReaction,
}

impl ConfigurationDependency {
    /// 是否声明了配置依赖
    pub fn is_declared(&self) -> bool {
        self.policy != ConfigurationPolicy::Ignore
    }
}

const UNBOUND_COMPONENT: &str = "<unbound>";

/// 引用描述符
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescriptor {
    /// 引用名称，在所属组件内唯一
    pub name: String,
    /// 目标契约
    pub contract: String,
    /// 目标过滤器
    pub filter: Option<Filter>,
    /// 基数
    pub cardinality: Cardinality,
    /// 动态性
    pub policy: ReferencePolicy,
    /// 贪婪性
    pub option: PolicyOption,
    /// 只匹配进程内服务
    pub internal: bool,
    /// 跨模块全局引用
    pub global: bool,
    /// 动态代理等待目标的超时
    pub timeout: Option<Duration>,
}

impl ReferenceDescriptor {
    /// 创建引用构建器
    pub fn builder(name: impl Into<String>, contract: impl Into<String>) -> ReferenceBuilder {
        ReferenceBuilder {
            reference: ReferenceDescriptor {
                name: name.into(),
                contract: contract.into(),
                filter: None,
                cardinality: Cardinality::default(),
                policy: ReferencePolicy::default(),
                option: PolicyOption::default(),
                internal: false,
                global: false,
                timeout: None,
            },
            filter_source: None,
        }
    }

    /// 是否为静态引用
    pub fn is_static(&self) -> bool {
        self.policy == ReferencePolicy::Static
    }

    /// 是否为贪婪引用
    pub fn is_greedy(&self) -> bool {
        self.option == PolicyOption::Greedy
    }

    /// 用于去重的目标键
    pub fn target_key(&self) -> String {
        match &self.filter {
            Some(filter) => format!("{}{}", self.contract, filter),
            None => self.contract.clone(),
        }
    }

    fn validate(&self, component: &str) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::new(format!("组件 {component} 存在未命名的引用")));
        }
        if self.contract.trim().is_empty() {
            return Err(ValidationError::MissingContract {
                component: component.to_string(),
                reference: self.name.clone(),
            });
        }
        if self.is_static() && self.cardinality.is_multiple() && self.is_greedy() {
            return Err(ValidationError::invalid_policy(
                component,
                &self.name,
                "多值静态引用激活后无法改变绑定，只能使用 reluctant",
            ));
        }
        if self.global && self.internal {
            return Err(ValidationError::invalid_policy(
                component,
                &self.name,
                "全局引用不能同时是进程内引用",
            ));
        }
        Ok(())
    }
}

/// 引用构建器
#[derive(Debug, Clone)]
pub struct ReferenceBuilder {
    reference: ReferenceDescriptor,
    filter_source: Option<String>,
}

impl ReferenceBuilder {
    /// 设置过滤表达式，在 `build` 时解析
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_source = Some(filter.into());
        self
    }

    /// 设置基数
    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.reference.cardinality = cardinality;
        self
    }

    /// 设置动态性
    pub fn policy(mut self, policy: ReferencePolicy) -> Self {
        self.reference.policy = policy;
        self
    }

    /// 设置贪婪性
    pub fn option(mut self, option: PolicyOption) -> Self {
        self.reference.option = option;
        self
    }

    /// 标记为动态引用
    pub fn dynamic(self) -> Self {
        self.policy(ReferencePolicy::Dynamic)
    }

    /// 标记为贪婪引用
    pub fn greedy(self) -> Self {
        self.option(PolicyOption::Greedy)
    }

    /// 标记为进程内引用
    pub fn internal(mut self) -> Self {
        self.reference.internal = true;
        self
    }

    /// 标记为全局引用
    pub fn global(mut self) -> Self {
        self.reference.global = true;
        self
    }

    /// 设置等待超时
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.reference.timeout = Some(timeout);
        self
    }

    /// 构建引用描述符
    ///
    /// 此时引用尚未归属组件，错误中的组件名为 `<unbound>`；加入组件后会再次校验
    pub fn build(self) -> Result<ReferenceDescriptor, ValidationError> {
        let mut reference = self.reference;
        if let Some(source) = self.filter_source {
            reference.filter = Some(Filter::parse(&source)?);
        }
        reference.validate(UNBOUND_COMPONENT)?;
        Ok(reference)
    }
}

/// 组件描述符
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDescriptor {
    /// 组件名称
    pub name: String,
    /// 声明组件的模块，解析引用时作为消费者身份
    pub module: ConsumerId,
    /// 提供的契约
    pub contracts: Vec<String>,
    /// 服务只在进程内发布
    pub internal: bool,
    /// 组件属性
    pub properties: ServiceProperties,
    /// 实例共享策略
    pub scope: ServiceScope,
    /// 激活时立即创建实例
    pub immediate: bool,
    /// 启动时是否启用
    pub enabled: bool,
    /// 配置依赖
    pub configuration: ConfigurationDependency,
    /// 引用列表
    pub references: Vec<ReferenceDescriptor>,
}

impl ComponentDescriptor {
    /// 创建组件描述符构建器
    pub fn builder(name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder::new(name)
    }

    /// 是否提供服务
    pub fn provides_service(&self) -> bool {
        !self.contracts.is_empty()
    }

    /// 配置 pid（仅在声明了配置依赖时存在）
    pub fn pid(&self) -> Option<&str> {
        if self.configuration.is_declared() {
            self.configuration.pid.as_deref()
        } else {
            None
        }
    }

    /// 按名称获取引用
    pub fn reference(&self, name: &str) -> Option<&ReferenceDescriptor> {
        self.references.iter().find(|r| r.name == name)
    }

    /// 全局引用
    pub fn global_references(&self) -> impl Iterator<Item = &ReferenceDescriptor> {
        self.references.iter().filter(|r| r.global)
    }

    /// 组件自身追踪的引用（不含全局引用）
    pub fn local_references(&self) -> impl Iterator<Item = &ReferenceDescriptor> {
        self.references.iter().filter(|r| !r.global)
    }

    /// 校验描述符自身的一致性
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let mut names = HashSet::new();
        for reference in &self.references {
            reference.validate(&self.name)?;
            if !names.insert(reference.name.as_str()) {
                return Err(ValidationError::DuplicateReferenceName {
                    component: self.name.clone(),
                    reference: reference.name.clone(),
                });
            }
        }

        if self.scope != ServiceScope::Singleton && !self.provides_service() {
            return Err(ValidationError::ScopeWithoutService {
                component: self.name.clone(),
                scope: self.scope.to_string(),
            });
        }

        if self.configuration.is_declared()
            && self
                .configuration
                .pid
                .as_deref()
                .map_or(true, |pid| pid.trim().is_empty())
        {
            return Err(ValidationError::MissingPid {
                component: self.name.clone(),
            });
        }

        Ok(())
    }
}

/// 组件描述符构建器
#[derive(Debug, Clone)]
pub struct ComponentBuilder {
    name: String,
    module: Option<ConsumerId>,
    contracts: Vec<String>,
    internal: bool,
    properties: ServiceProperties,
    scope: ServiceScope,
    immediate: Option<bool>,
    enabled: bool,
    configuration: ConfigurationDependency,
    references: Vec<ReferenceDescriptor>,
}

impl ComponentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: None,
            contracts: Vec::new(),
            internal: false,
            properties: ServiceProperties::new(),
            scope: ServiceScope::default(),
            immediate: None,
            enabled: true,
            configuration: ConfigurationDependency::default(),
            references: Vec::new(),
        }
    }

    /// 设置声明模块
    pub fn module(mut self, module: impl Into<ConsumerId>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// 添加提供的契约
    pub fn provides(mut self, contract: impl Into<String>) -> Self {
        self.contracts.push(contract.into());
        self
    }

    /// 服务只在进程内发布
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// 添加属性
    pub fn property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// 设置服务排名
    pub fn ranking(self, ranking: i64) -> Self {
        self.property(crate::metadata::SERVICE_RANKING, ranking)
    }

    /// 设置作用域
    pub fn scope(mut self, scope: ServiceScope) -> Self {
        self.scope = scope;
        self
    }

    /// 设置是否立即激活
    pub fn immediate(mut self, immediate: bool) -> Self {
        self.immediate = Some(immediate);
        self
    }

    /// 设置启动时是否启用
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// 声明配置依赖
    pub fn configuration(
        mut self,
        policy: ConfigurationPolicy,
        reaction: ConfigurationReaction,
    ) -> Self {
        self.configuration.policy = policy;
        self.configuration.reaction = reaction;
        self
    }

    /// 设置配置 pid
    pub fn pid(mut self, pid: impl Into<String>) -> Self {
        self.configuration.pid = Some(pid.into());
        self
    }

    /// 添加引用
    pub fn reference(mut self, reference: ReferenceDescriptor) -> Self {
        self.references.push(reference);
        self
    }

    /// 构建并校验描述符
    pub fn build(self) -> Result<ComponentDescriptor, ValidationError> {
        let immediate = match self.scope {
            ServiceScope::Singleton => self.immediate.unwrap_or(self.contracts.is_empty()),
            ServiceScope::PerConsumer | ServiceScope::PerRequest => false,
        };
        let mut configuration = self.configuration;
        if configuration.is_declared() && configuration.pid.is_none() {
            configuration.pid = Some(self.name.clone());
        }
        let descriptor = ComponentDescriptor {
            module: self.module.unwrap_or_else(|| ConsumerId::new(&self.name)),
            name: self.name,
            contracts: self.contracts,
            internal: self.internal,
            properties: self.properties,
            scope: self.scope,
            immediate,
            enabled: self.enabled,
            configuration,
            references: self.references,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// 引用的纯数据定义
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceDefinition {
    pub name: String,
    pub contract: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub cardinality: Cardinality,
    #[serde(default)]
    pub policy: ReferencePolicy,
    #[serde(default)]
    pub option: PolicyOption,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub global: bool,
    /// 等待超时（毫秒）
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// 组件的纯数据定义
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub name: String,
    #[serde(default)]
    pub module: Option<String>,
    #[serde(default)]
    pub contracts: Vec<String>,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub properties: ServiceProperties,
    #[serde(default)]
    pub scope: ServiceScope,
    #[serde(default)]
    pub immediate: Option<bool>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub configuration: ConfigurationDependency,
    #[serde(default)]
    pub references: Vec<ReferenceDefinition>,
}

fn default_enabled() -> bool {
    true
}

impl TryFrom<ReferenceDefinition> for ReferenceDescriptor {
    type Error = ValidationError;

    fn try_from(definition: ReferenceDefinition) -> Result<Self, Self::Error> {
        let mut builder = ReferenceDescriptor::builder(definition.name, definition.contract)
            .cardinality(definition.cardinality)
            .policy(definition.policy)
            .option(definition.option);
        if let Some(filter) = definition.filter {
            builder = builder.filter(filter);
        }
        if definition.internal {
            builder = builder.internal();
        }
        if definition.global {
            builder = builder.global();
        }
        if let Some(timeout_ms) = definition.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        builder.build()
    }
}

impl TryFrom<ComponentDefinition> for ComponentDescriptor {
    type Error = ValidationError;

    fn try_from(definition: ComponentDefinition) -> Result<Self, Self::Error> {
        let mut builder = ComponentDescriptor::builder(definition.name)
            .scope(definition.scope)
            .enabled(definition.enabled)
            .configuration(definition.configuration.policy, definition.configuration.reaction);
        if let Some(module) = definition.module {
            builder = builder.module(module);
        }
        if let Some(pid) = definition.configuration.pid {
            builder = builder.pid(pid);
        }
        if let Some(immediate) = definition.immediate {
            builder = builder.immediate(immediate);
        }
        if definition.internal {
            builder = builder.internal();
        }
        for contract in definition.contracts {
            builder = builder.provides(contract);
        }
        for (key, value) in definition.properties.iter() {
            builder = builder.property(key.clone(), value.clone());
        }
        for reference in definition.references {
            builder = builder.reference(reference.try_into()?);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str) -> ReferenceBuilder {
        ReferenceDescriptor::builder(name, "Storage")
    }

    #[test]
    fn test_static_multiple_greedy_is_rejected() {
        let result = reference("stores")
            .cardinality(Cardinality::Multiple)
            .greedy()
            .build()
            .and_then(|r| ComponentDescriptor::builder("indexer").reference(r).build());

        assert!(matches!(result, Err(ValidationError::InvalidPolicy { .. })));
    }

    #[test]
    fn test_reference_build_validates_on_its_own() {
        let greedy = reference("stores")
            .cardinality(Cardinality::Multiple)
            .greedy()
            .build();
        assert!(matches!(
            greedy,
            Err(ValidationError::InvalidPolicy { ref component, .. }) if component == "<unbound>"
        ));

        let empty = ReferenceDescriptor::builder("store", " ").build();
        assert!(matches!(empty, Err(ValidationError::MissingContract { .. })));

        let global_internal = reference("store").global().internal().build();
        assert!(matches!(
            global_internal,
            Err(ValidationError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_dynamic_multiple_greedy_is_accepted() {
        let descriptor = ComponentDescriptor::builder("indexer")
            .reference(
                reference("stores")
                    .cardinality(Cardinality::AtLeastOne)
                    .dynamic()
                    .greedy()
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        assert_eq!(descriptor.references[0].cardinality.min(), 1);
    }

    #[test]
    fn test_duplicate_reference_names_are_rejected() {
        let result = ComponentDescriptor::builder("indexer")
            .reference(reference("store").build().unwrap())
            .reference(reference("store").build().unwrap())
            .build();
        assert!(matches!(
            result,
            Err(ValidationError::DuplicateReferenceName { .. })
        ));
    }

    #[test]
    fn test_scoped_component_requires_contract() {
        let result = ComponentDescriptor::builder("session")
            .scope(ServiceScope::PerConsumer)
            .build();
        assert!(matches!(
            result,
            Err(ValidationError::ScopeWithoutService { .. })
        ));
    }

    #[test]
    fn test_defaults_follow_service_declaration() {
        let immediate = ComponentDescriptor::builder("worker").build().unwrap();
        assert!(immediate.immediate);
        assert_eq!(immediate.module.as_str(), "worker");

        let delayed = ComponentDescriptor::builder("cache")
            .provides("Cache")
            .build()
            .unwrap();
        assert!(!delayed.immediate);
    }

    #[test]
    fn test_configuration_pid_defaults_to_name() {
        let descriptor = ComponentDescriptor::builder("pool")
            .configuration(ConfigurationPolicy::Require, ConfigurationReaction::Refresh)
            .build()
            .unwrap();
        assert_eq!(descriptor.pid(), Some("pool"));
    }

    #[test]
    fn test_definition_converts_to_descriptor() {
        let json = serde_json::json!({
            "name": "report",
            "contracts": ["Report"],
            "scope": "per-request",
            "properties": { "service.ranking": 3 },
            "configuration": { "policy": "optional", "reaction": "reactivate" },
            "references": [
                { "name": "store", "contract": "Storage", "cardinality": "0..n", "policy": "dynamic", "filter": "(region=eu-*)" }
            ]
        });
        let definition: ComponentDefinition = serde_json::from_value(json).unwrap();
        let descriptor = ComponentDescriptor::try_from(definition).unwrap();

        assert_eq!(descriptor.scope, ServiceScope::PerRequest);
        assert_eq!(descriptor.properties.ranking(), 3);
        assert_eq!(descriptor.pid(), Some("report"));
        let store = descriptor.reference("store").unwrap();
        assert_eq!(store.cardinality, Cardinality::Multiple);
        assert_eq!(store.policy, ReferencePolicy::Dynamic);
        assert!(store.filter.is_some());
    }

    #[test]
    fn test_definition_with_bad_filter_is_rejected() {
        let definition = ComponentDefinition {
            name: "report".to_string(),
            enabled: true,
            references: vec![ReferenceDefinition {
                name: "store".to_string(),
                contract: "Storage".to_string(),
                filter: Some("(region=".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            ComponentDescriptor::try_from(definition),
            Err(ValidationError::InvalidFilter { .. })
        ));
    }
}
