//! 循环激活检测
//!
//! 每个线程维护一个正在创建实例的组件栈。组件在自己的激活链上再次出现即为循环依赖；
//! 不同线程上的激活链互不影响。
//!
//! 必选引用互相指向对方契约的组件永远无法满足，不会进入激活链，
//! 由 [`mandatory_cycles`] 在启动时从描述符中找出。

use infrastructure_common::{ComponentDescriptor, DependencyError, COMPONENT_NAME};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

thread_local! {
    static ACTIVATION_STACK: RefCell<Vec<(Uuid, Arc<str>)>> = const { RefCell::new(Vec::new()) };
}

/// 循环激活守卫，每个注册表一个
#[derive(Debug)]
pub struct CircularActivationGuard {
    registry: Uuid,
    max_depth: usize,
}

impl CircularActivationGuard {
    /// 创建守卫
    pub fn new(max_depth: usize) -> Self {
        Self {
            registry: Uuid::new_v4(),
            max_depth: max_depth.max(1),
        }
    }

    /// 进入组件创建
    ///
    /// 返回的 [`CreateGuard`] 在离开作用域时出栈
    pub fn enter_create(&self, component: &Arc<str>) -> Result<CreateGuard, DependencyError> {
        ACTIVATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let chain: Vec<&str> = stack
                .iter()
                .filter(|(registry, _)| *registry == self.registry)
                .map(|(_, name)| name.as_ref())
                .collect();

            if let Some(start) = chain.iter().position(|name| *name == component.as_ref()) {
                let mut cycle: Vec<&str> = chain[start..].to_vec();
                cycle.push(component.as_ref());
                let dependency_chain = cycle.join(" -> ");
                warn!("检测到循环依赖: {}", dependency_chain);
                return Err(DependencyError::CircularDependency { dependency_chain });
            }

            if chain.len() >= self.max_depth {
                warn!("激活链深度超过 {}: {}", self.max_depth, component);
                return Err(DependencyError::DependencyResolutionFailed {
                    type_name: component.to_string(),
                    message: format!("激活链深度超过 {}", self.max_depth),
                });
            }

            stack.push((self.registry, component.clone()));
            Ok(CreateGuard {
                registry: self.registry,
                component: component.clone(),
                _not_send: PhantomData,
            })
        })
    }

    /// 当前线程上本注册表的激活链深度
    pub fn depth(&self) -> usize {
        ACTIVATION_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .filter(|(registry, _)| *registry == self.registry)
                .count()
        })
    }

    /// 组件是否正在当前线程上创建
    pub fn is_creating(&self, component: &str) -> bool {
        ACTIVATION_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|(registry, name)| *registry == self.registry && name.as_ref() == component)
        })
    }
}

/// 创建期间持有的出栈凭据，只能在进入的线程上释放
#[derive(Debug)]
pub struct CreateGuard {
    registry: Uuid,
    component: Arc<str>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CreateGuard {
    fn drop(&mut self) {
        ACTIVATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(position) = stack
                .iter()
                .rposition(|(registry, name)| *registry == self.registry && *name == self.component)
            {
                stack.remove(position);
            }
        });
    }
}

/// 找出必选引用构成的循环
///
/// 组件的必选引用指向另一个组件提供的契约（进程内标记一致、过滤器匹配组件属性）即形成一条边。
/// 返回位于环上的组件名称到依赖链的映射，链从该组件出发并回到自身，例如 `X -> Y -> X`。
pub fn mandatory_cycles(descriptors: &[Arc<ComponentDescriptor>]) -> HashMap<String, String> {
    let edges: Vec<Vec<usize>> = descriptors
        .iter()
        .map(|consumer| {
            let mut targets: Vec<usize> = Vec::new();
            for reference in consumer.local_references() {
                if reference.cardinality.min() == 0 {
                    continue;
                }
                for (index, provider) in descriptors.iter().enumerate() {
                    let properties = provider
                        .properties
                        .clone()
                        .with(COMPONENT_NAME, provider.name.clone());
                    let provides = provider.contracts.iter().any(|c| *c == reference.contract)
                        && provider.internal == reference.internal
                        && reference
                            .filter
                            .as_ref()
                            .map_or(true, |filter| filter.matches(&properties));
                    if provides && !targets.contains(&index) {
                        targets.push(index);
                    }
                }
            }
            targets
        })
        .collect();

    let mut cycles = HashMap::new();
    for start in 0..descriptors.len() {
        if let Some(path) = shortest_cycle(&edges, start) {
            let mut names: Vec<&str> = path
                .iter()
                .map(|&index| descriptors[index].name.as_str())
                .collect();
            names.push(descriptors[start].name.as_str());
            let dependency_chain = names.join(" -> ");
            warn!("检测到必选引用循环: {}", dependency_chain);
            cycles.insert(descriptors[start].name.clone(), dependency_chain);
        }
    }
    cycles
}

/// 从 `start` 出发回到自身的最短路径（不含终点）
fn shortest_cycle(edges: &[Vec<usize>], start: usize) -> Option<Vec<usize>> {
    let mut parent: Vec<Option<usize>> = vec![None; edges.len()];
    let mut visited = vec![false; edges.len()];
    let mut queue = VecDeque::from([start]);
    visited[start] = true;

    while let Some(node) = queue.pop_front() {
        for &next in &edges[node] {
            if next == start {
                let mut path = vec![node];
                let mut current = node;
                while let Some(previous) = parent[current] {
                    path.push(previous);
                    current = previous;
                }
                path.reverse();
                return Some(path);
            }
            if !visited[next] {
                visited[next] = true;
                parent[next] = Some(node);
                queue.push_back(next);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrastructure_common::{Cardinality, ReferenceDescriptor};
    use std::thread;

    fn component(
        name: &str,
        provides: &str,
        requires: &[(&str, Cardinality)],
    ) -> Arc<ComponentDescriptor> {
        let mut builder = ComponentDescriptor::builder(name).provides(provides);
        for (contract, cardinality) in requires {
            builder = builder.reference(
                ReferenceDescriptor::builder(contract.to_lowercase(), *contract)
                    .cardinality(*cardinality)
                    .build()
                    .unwrap(),
            );
        }
        Arc::new(builder.build().unwrap())
    }

    fn name(value: &str) -> Arc<str> {
        Arc::from(value)
    }

    #[test]
    fn test_reentry_is_reported_as_cycle() {
        let guard = CircularActivationGuard::new(16);
        let _x = guard.enter_create(&name("X")).unwrap();
        let _y = guard.enter_create(&name("Y")).unwrap();

        let error = guard.enter_create(&name("X")).unwrap_err();
        match error {
            DependencyError::CircularDependency { dependency_chain } => {
                assert_eq!(dependency_chain, "X -> Y -> X");
            }
            other => panic!("意外的错误: {other}"),
        }
        assert_eq!(guard.depth(), 2);
    }

    #[test]
    fn test_guard_pops_on_drop() {
        let guard = CircularActivationGuard::new(16);
        {
            let _x = guard.enter_create(&name("X")).unwrap();
            assert!(guard.is_creating("X"));
        }
        assert!(!guard.is_creating("X"));
        assert!(guard.enter_create(&name("X")).is_ok());
    }

    #[test]
    fn test_other_threads_are_independent() {
        let guard = Arc::new(CircularActivationGuard::new(16));
        let _x = guard.enter_create(&name("X")).unwrap();

        let remote = guard.clone();
        let entered = thread::spawn(move || remote.enter_create(&name("X")).is_ok())
            .join()
            .unwrap();
        assert!(entered);
    }

    #[test]
    fn test_registries_do_not_share_chains() {
        let first = CircularActivationGuard::new(16);
        let second = CircularActivationGuard::new(16);
        let _x = first.enter_create(&name("X")).unwrap();
        assert!(second.enter_create(&name("X")).is_ok());
    }

    #[test]
    fn test_depth_limit() {
        let guard = CircularActivationGuard::new(2);
        let _a = guard.enter_create(&name("A")).unwrap();
        let _b = guard.enter_create(&name("B")).unwrap();
        assert!(matches!(
            guard.enter_create(&name("C")),
            Err(DependencyError::DependencyResolutionFailed { .. })
        ));
    }

    #[test]
    fn test_mandatory_cycle_is_found_from_each_member() {
        let descriptors = vec![
            component("X", "X", &[("Y", Cardinality::Mandatory)]),
            component("Y", "Y", &[("X", Cardinality::Mandatory)]),
            component("Z", "Z", &[("X", Cardinality::Mandatory)]),
        ];
        let cycles = mandatory_cycles(&descriptors);
        assert_eq!(cycles.get("X").map(String::as_str), Some("X -> Y -> X"));
        assert_eq!(cycles.get("Y").map(String::as_str), Some("Y -> X -> Y"));
        assert!(!cycles.contains_key("Z"));
    }

    #[test]
    fn test_optional_edge_breaks_cycle() {
        let descriptors = vec![
            component("X", "X", &[("Y", Cardinality::Mandatory)]),
            component("Y", "Y", &[("X", Cardinality::Optional)]),
        ];
        assert!(mandatory_cycles(&descriptors).is_empty());
    }

    #[test]
    fn test_filter_mismatch_breaks_cycle() {
        let x = Arc::new(
            ComponentDescriptor::builder("X")
                .provides("X")
                .reference(
                    ReferenceDescriptor::builder("y", "Y")
                        .filter("(component.name=Other)")
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        );
        let descriptors = vec![x, component("Y", "Y", &[("X", Cardinality::Mandatory)])];
        assert!(mandatory_cycles(&descriptors).is_empty());
    }
}
