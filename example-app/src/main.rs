//! # 示例应用程序
//!
//! 演示组件注册表如何随服务的发布与撤销重新绑定组件：
//! 静态引用在主库下线时重新激活，动态引用原地换绑，配置更新刷新服务属性。

use anyhow::Context;
use clap::Parser;
use config_impl::{load_settings, MemoryConfigurationStore};
use di_abstractions::{ActivationContext, BoxError, Instance, ServiceQuery, ServiceRegistry};
use di_impl::{ComponentRegistry, LocalServiceRegistry, SimpleBeanContainer};
use infrastructure_common::{
    ComponentDescriptor, ConfigurationPolicy, ConfigurationReaction, ConsumerId,
    ReferenceDescriptor, ServiceProperties, SERVICE_RANKING,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "example-app")]
#[command(about = "组件注册表演示")]
struct Args {
    /// 注册表设置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 日志级别
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// 数据库连接
#[derive(Debug)]
struct Database {
    name: String,
}

/// 依赖数据库的仓储
#[derive(Debug)]
struct Repository {
    database: String,
    pool_size: i64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let settings = load_settings(args.config.as_deref()).context("加载注册表设置失败")?;
    info!("注册表设置: {:?}", settings);

    let services = LocalServiceRegistry::new("shared");
    let container = Arc::new(SimpleBeanContainer::new());
    container.register("Repository", create_repository);
    container.register("Reporter", |context| {
        let repositories = context.proxy("repository").cloned();
        info!("报表组件已创建，动态仓储引用: {}", repositories.is_some());
        Ok(Arc::new(repositories) as Instance)
    });

    let store = Arc::new(MemoryConfigurationStore::new().with_configuration(
        "repository",
        ServiceProperties::new().with("pool_size", 4),
    ));

    let registry = ComponentRegistry::builder(Arc::new(services.clone()), container.clone())
        .with_configuration_store(store.clone())
        .with_settings(settings)
        .build()?;

    registry.register(
        ComponentDescriptor::builder("Repository")
            .provides("Repository")
            .configuration(ConfigurationPolicy::Optional, ConfigurationReaction::Refresh)
            .pid("repository")
            .reference(ReferenceDescriptor::builder("database", "Database").build()?)
            .build()?,
    )?;
    registry.register(
        ComponentDescriptor::builder("Reporter")
            .reference(
                ReferenceDescriptor::builder("repository", "Repository")
                    .dynamic()
                    .build()?,
            )
            .build()?,
    )?;
    registry.start()?;

    let primary = publish_database(&services, "primary", 10)?;
    let _standby = publish_database(&services, "standby", 0)?;
    registry.await_pending_bindings();

    let consumer = ConsumerId::new("example-app");
    let query = ServiceQuery::new("Repository");
    describe(&registry, &consumer, &query)?;

    info!("主库下线");
    primary.unpublish();
    registry.await_pending_bindings();
    describe(&registry, &consumer, &query)?;

    info!("更新仓储配置");
    store.update("repository", ServiceProperties::new().with("pool_size", 16));
    let handle = services
        .lookup(&query)
        .into_iter()
        .next()
        .context("仓储服务未发布")?;
    info!("仓储服务属性: {:?}", handle.properties());

    for name in registry.component_names() {
        if let Some(manager) = registry.get_component_holder(&name) {
            info!(
                "组件 {}: 状态 {}, 激活 {} 次",
                name,
                manager.state(),
                manager.activation_count()
            );
        }
    }

    registry.shutdown();
    info!("应用已关闭");
    Ok(())
}

fn create_repository(context: &ActivationContext) -> Result<Instance, BoxError> {
    let database = context
        .service_as::<Database>("database")
        .ok_or("数据库未绑定")?;
    let pool_size = context
        .property("pool_size")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(1);
    Ok(Arc::new(Repository {
        database: database.name.clone(),
        pool_size,
    }) as Instance)
}

fn publish_database(
    services: &LocalServiceRegistry,
    name: &str,
    ranking: i64,
) -> anyhow::Result<Arc<dyn di_abstractions::ServiceRegistration>> {
    let instance: Instance = Arc::new(Database {
        name: name.to_string(),
    });
    let registration = services.publish_instance(
        "Database",
        instance,
        ServiceProperties::new().with(SERVICE_RANKING, ranking),
    )?;
    Ok(registration)
}

fn describe(
    registry: &ComponentRegistry,
    consumer: &ConsumerId,
    query: &ServiceQuery,
) -> anyhow::Result<()> {
    let bound = registry.lookup_service(consumer, query, None)?;
    if let Some(repository) = bound.instance.downcast_ref::<Repository>() {
        info!(
            "仓储使用数据库 {} (连接池 {})",
            repository.database, repository.pool_size
        );
    }
    registry.release_service(consumer, &bound);
    Ok(())
}
