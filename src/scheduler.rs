use enum_dispatch::enum_dispatch;
use futures::Future;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;

pub(crate) mod work_stealing;
use work_stealing::WorkStealing;

/// Identifier handed to every lightweight task at spawn time
pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SchedulerStatus {
    Active,
    Finished,
}

/// The available worker thread scheduling algorithms
#[derive(Debug, Clone, Copy, Default)]
pub enum SchedulerType {
    #[default]
    WorkStealing,
}

#[enum_dispatch]
pub(crate) trait SchedulerQueue {
    /// spawn a task whose future is built from its own task id; the returned handle resolves to the output
    fn spawn_task<F, Fut>(&self, task: F) -> (TaskId, async_task::Task<Fut::Output, TaskId>)
    where
        F: FnOnce(TaskId) -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static;
    /// spawn a detached task
    fn submit_task<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static;
    /// run a future to completion, executing other tasks on the calling thread while it is pending
    fn block_on<F>(&self, fut: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
    fn exec_task(&self) -> bool;
    fn shutdown(&self);
    fn active(&self) -> bool;
    fn num_workers(&self) -> usize;
}

#[enum_dispatch(SchedulerQueue)]
#[derive(Debug)]
pub(crate) enum Scheduler {
    WorkStealing,
}

pub(crate) fn create_scheduler(
    sched: SchedulerType,
    num_workers: usize,
    bind_threads: bool,
    status: Arc<AtomicU8>,
) -> Scheduler {
    match sched {
        SchedulerType::WorkStealing => Scheduler::WorkStealing(WorkStealing::new(
            num_workers,
            bind_threads,
            status,
        )),
    }
}
