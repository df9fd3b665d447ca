//! 组件执行器
//!
//! 单个工作线程按提交顺序执行延迟绑定任务，同一注册表的两个任务不会并发执行。

use infrastructure_common::InfrastructureError;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum ActorMessage {
    Run(Task),
    Flush(oneshot::Sender<()>),
    Stop,
}

/// 单线程组件执行器
pub struct ComponentActor {
    name: String,
    sender: mpsc::UnboundedSender<ActorMessage>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl ComponentActor {
    /// 启动执行器线程
    ///
    /// 任务在普通线程上执行，调用方不能处于异步运行时内
    pub fn spawn(name: impl Into<String>) -> Result<Self, InfrastructureError> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<ActorMessage>();
        let thread_name = name.clone();

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!("组件执行器已启动: {}", thread_name);
                while let Some(message) = receiver.blocking_recv() {
                    match message {
                        ActorMessage::Run(task) => {
                            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                                error!("组件执行器任务异常终止: {}", panic_message(&*panic));
                            }
                        }
                        ActorMessage::Flush(done) => {
                            let _ = done.send(());
                        }
                        ActorMessage::Stop => break,
                    }
                }
                info!("组件执行器已停止: {}", thread_name);
            })
            .map_err(|e| InfrastructureError::BootstrapFailed {
                message: format!("无法启动组件执行器线程 {name}: {e}"),
            })?;

        let worker_id = worker.thread().id();
        Ok(Self {
            name,
            sender,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    /// 执行器名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 提交任务，执行器已停止时返回 false
    pub fn schedule(&self, task: impl FnOnce() + Send + 'static) -> bool {
        let accepted = self.sender.send(ActorMessage::Run(Box::new(task))).is_ok();
        if !accepted {
            warn!("组件执行器已停止，任务被丢弃: {}", self.name);
        }
        accepted
    }

    /// 当前线程是否为执行器线程
    pub fn is_worker_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// 等待此前提交的任务全部执行完毕
    ///
    /// 在执行器线程上调用时立即返回
    pub fn flush(&self) {
        if self.is_worker_thread() {
            return;
        }
        let (done, wait) = oneshot::channel();
        if self.sender.send(ActorMessage::Flush(done)).is_ok() {
            let _ = wait.blocking_recv();
        }
    }

    /// 停止执行器，已提交的任务会先执行完
    pub fn shutdown(&self) {
        if self.sender.send(ActorMessage::Stop).is_ok() {
            debug!("停止组件执行器: {}", self.name);
        }
        if self.is_worker_thread() {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("组件执行器线程异常退出: {}", self.name);
            }
        }
    }
}

impl Drop for ComponentActor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知错误".to_string()
    }
}
