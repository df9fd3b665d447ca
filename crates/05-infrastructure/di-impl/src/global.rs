//! 全局描述符
//!
//! 所有组件声明的全局引用按目标去重后汇总到一个 [`GlobalDescriptor`]，
//! 整个注册表只评估一次。它控制外部共享容器：
//!
//! - 打开时依赖未满足，暂停容器；
//! - 依赖满足时恢复容器并记录激活上下文；
//! - 依赖满足后又失去时，在独立线程上先停止再启动容器，不阻塞通知线程。
//!
//! 每次满足状态翻转都会递增代号；恢复容器前后都核对代号，
//! 过期的激活不会在依赖已失去后恢复容器或记录上下文。对容器的调用由同一把锁串行化。

use di_abstractions::{
    ActivationContext, BoxError, ServiceEventKind, ServiceHandle, ServiceListener, ServiceQuery,
    ServiceRegistry, SharedContainer,
};
use infrastructure_common::{
    ConsumerId, ReferenceDescriptor, ServiceProperties, SubscriptionId,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// 激活上下文中记录全局目标的属性
pub const GLOBAL_TARGETS: &str = "global.targets";

const GLOBAL_COMPONENT: &str = "global";

type RestartWork = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct GlobalState {
    candidates: Vec<BTreeMap<u64, ServiceHandle>>,
    satisfied: bool,
    activation: Option<ActivationContext>,
    subscriptions: Vec<SubscriptionId>,
    pending: Option<JoinHandle<()>>,
    generation: u64,
}

enum Transition {
    Activate,
    Deactivate,
    None,
}

/// 全局描述符
pub struct GlobalDescriptor {
    self_ref: Weak<GlobalDescriptor>,
    references: Vec<ReferenceDescriptor>,
    services: Arc<dyn ServiceRegistry>,
    container: Option<Arc<dyn SharedContainer>>,
    thread_name: String,
    state: Mutex<GlobalState>,
    container_calls: Arc<Mutex<()>>,
}

impl GlobalDescriptor {
    /// 由全局引用创建描述符，相同目标的引用只保留一个
    pub fn new(
        references: impl IntoIterator<Item = ReferenceDescriptor>,
        services: Arc<dyn ServiceRegistry>,
        container: Option<Arc<dyn SharedContainer>>,
        thread_name: impl Into<String>,
    ) -> Arc<Self> {
        let mut unique: Vec<ReferenceDescriptor> = Vec::new();
        for reference in references {
            if !unique.iter().any(|r| r.target_key() == reference.target_key()) {
                unique.push(reference);
            }
        }
        let candidates = vec![BTreeMap::new(); unique.len()];
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            references: unique,
            services,
            container,
            thread_name: thread_name.into(),
            state: Mutex::new(GlobalState {
                candidates,
                ..GlobalState::default()
            }),
            container_calls: Arc::new(Mutex::new(())),
        })
    }

    /// 去重后的全局引用
    pub fn references(&self) -> &[ReferenceDescriptor] {
        &self.references
    }

    /// 全部全局引用是否满足
    pub fn is_satisfied(&self) -> bool {
        self.state.lock().satisfied
    }

    /// 最近一次激活记录的上下文
    pub fn activation_context(&self) -> Option<ActivationContext> {
        self.state.lock().activation.clone()
    }

    fn evaluate(&self, state: &GlobalState) -> bool {
        self.references
            .iter()
            .zip(&state.candidates)
            .all(|(reference, candidates)| candidates.len() >= reference.cardinality.min())
    }

    /// 订阅全局引用并按当前满足情况控制共享容器
    pub fn open(&self) {
        let mut subscriptions = Vec::with_capacity(self.references.len());
        let mut initial = Vec::with_capacity(self.references.len());
        for (index, reference) in self.references.iter().enumerate() {
            let query = ServiceQuery::for_reference(reference);
            let listener = Arc::new(GlobalListener {
                descriptor: self.self_ref.clone(),
                index,
            });
            subscriptions.push(self.services.subscribe(query.clone(), listener));
            initial.push(self.services.lookup(&query));
        }

        let (satisfied, generation) = {
            let mut state = self.state.lock();
            state.subscriptions = subscriptions;
            for (candidates, handles) in state.candidates.iter_mut().zip(initial) {
                for handle in handles {
                    candidates.entry(handle.id()).or_insert(handle);
                }
            }
            let satisfied = self.evaluate(&state);
            state.satisfied = satisfied;
            state.generation += 1;
            (satisfied, state.generation)
        };

        info!(
            "全局描述符已打开: {} 个全局引用, 满足={}",
            self.references.len(),
            satisfied
        );
        if satisfied {
            self.activate(generation);
        } else {
            let _calls = self.container_calls.lock();
            self.invoke("pause", |c| c.pause());
        }
    }

    /// 等待进行中的停用任务结束
    pub fn wait_for_deactivation(&self) {
        let pending = self.state.lock().pending.take();
        if let Some(pending) = pending {
            if pending.join().is_err() {
                warn!("全局停用线程异常终止");
            }
        }
    }

    /// 取消订阅
    pub fn close(&self) {
        let subscriptions = std::mem::take(&mut self.state.lock().subscriptions);
        for subscription in subscriptions {
            self.services.unsubscribe(subscription);
        }
        self.wait_for_deactivation();
        debug!("全局描述符已关闭");
    }

    fn on_event(&self, index: usize, kind: ServiceEventKind, handle: &ServiceHandle) {
        let (transition, generation, inline) = {
            let mut state = self.state.lock();
            let Some(candidates) = state.candidates.get_mut(index) else {
                return;
            };
            if kind.is_present() {
                candidates.insert(handle.id(), handle.clone());
            } else {
                candidates.remove(&handle.id());
            }
            let satisfied = self.evaluate(&state);
            let transition = match (state.satisfied, satisfied) {
                (false, true) => Transition::Activate,
                (true, false) => Transition::Deactivate,
                _ => Transition::None,
            };
            state.satisfied = satisfied;
            if !matches!(transition, Transition::None) {
                state.generation += 1;
            }

            let mut inline = None;
            if let Transition::Deactivate = transition {
                state.activation = None;
                let previous = state.pending.take();
                match self.spawn_restart(previous) {
                    Ok(handle) => state.pending = Some(handle),
                    Err(work) => inline = Some(work),
                }
            }
            (transition, state.generation, inline)
        };

        if let Some(work) = inline {
            work();
        }
        if let Transition::Activate = transition {
            self.wait_for_deactivation();
            self.activate(generation);
        }
    }

    fn activate(&self, generation: u64) {
        let _calls = self.container_calls.lock();
        if self.state.lock().generation != generation {
            debug!("全局依赖已再次变化，跳过过期的激活");
            return;
        }
        self.invoke("resume", |c| c.resume());

        let mut state = self.state.lock();
        if state.generation != generation {
            debug!("全局依赖已再次变化，不记录激活上下文");
            return;
        }
        let targets: Vec<String> = state
            .candidates
            .iter()
            .flat_map(|candidates| candidates.values().map(ToString::to_string))
            .collect();
        info!("全局依赖已满足: {}", targets.join(", "));
        let properties = ServiceProperties::new().with(GLOBAL_TARGETS, targets);
        state.activation = Some(ActivationContext::new(
            GLOBAL_COMPONENT,
            ConsumerId::new(GLOBAL_COMPONENT),
            properties,
        ));
    }

    /// 启动重启线程；无法创建线程时把任务交还调用方在锁外执行
    fn spawn_restart(&self, previous: Option<JoinHandle<()>>) -> Result<JoinHandle<()>, RestartWork> {
        let container = self.container.clone();
        let calls = self.container_calls.clone();
        let work: RestartWork = Box::new(move || {
            if let Some(previous) = previous {
                if previous.join().is_err() {
                    warn!("上一个全局停用线程异常终止");
                }
            }
            if let Some(container) = container {
                let _calls = calls.lock();
                info!("全局依赖已失去，重启共享容器");
                if let Err(e) = container.stop() {
                    warn!("停止共享容器失败: {}", e);
                }
                if let Err(e) = container.start() {
                    warn!("启动共享容器失败: {}", e);
                }
            }
        });

        let slot = Arc::new(Mutex::new(Some(work)));
        let spawned = {
            let slot = slot.clone();
            thread::Builder::new()
                .name(self.thread_name.clone())
                .spawn(move || {
                    let work = slot.lock().take();
                    if let Some(work) = work {
                        work();
                    }
                })
        };
        spawned.or_else(|e| {
            warn!("无法启动全局停用线程，在当前线程执行: {}", e);
            let work = slot.lock().take();
            match work {
                Some(work) => Err(work),
                None => Err(Box::new(|| {}) as RestartWork),
            }
        })
    }

    fn invoke(
        &self,
        operation: &str,
        call: impl FnOnce(&dyn SharedContainer) -> Result<(), BoxError>,
    ) {
        let Some(container) = &self.container else {
            return;
        };
        debug!("共享容器 {}", operation);
        if let Err(e) = call(container.as_ref()) {
            warn!("共享容器 {} 失败: {}", operation, e);
        }
    }
}

struct GlobalListener {
    descriptor: Weak<GlobalDescriptor>,
    index: usize,
}

impl ServiceListener for GlobalListener {
    fn service_changed(&self, kind: ServiceEventKind, handle: &ServiceHandle) {
        if let Some(descriptor) = self.descriptor.upgrade() {
            descriptor.on_event(self.index, kind, handle);
        }
    }
}
