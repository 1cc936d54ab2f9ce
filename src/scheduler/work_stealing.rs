use crate::scheduler::{SchedulerQueue, SchedulerStatus, TaskId};

use async_task::{Builder, Runnable};
use core_affinity::CoreId;
use crossbeam::deque::{Injector, Stealer, Worker};
use crossbeam::utils::Backoff;
use futures::Future;
use rand::prelude::*;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread;
use tracing::{trace, trace_span, Instrument};

static TASK_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug)]
pub(crate) struct WorkStealingThread {
    work_inj: Arc<Injector<Runnable<TaskId>>>,
    work_stealers: Vec<Stealer<Runnable<TaskId>>>,
    work_q: Worker<Runnable<TaskId>>,
    work_flag: Arc<AtomicU8>,
    status: Arc<AtomicU8>,
}

impl WorkStealingThread {
    #[tracing::instrument(skip_all, level = "debug")]
    fn run(
        worker: WorkStealingThread,
        idx: usize,
        active_cnt: Arc<AtomicUsize>,
        core_ids: Option<Arc<Vec<CoreId>>>,
    ) -> std::io::Result<thread::JoinHandle<()>> {
        let builder = thread::Builder::new().name(format!("ammpi_worker_{idx}"));
        builder.spawn(move || {
            if let Some(ids) = core_ids {
                core_affinity::set_for_current(ids[idx % ids.len()]);
            }
            trace!("worker thread {idx} running {:?}", std::thread::current().id());
            active_cnt.fetch_add(1, Ordering::SeqCst);
            let mut rng = rand::thread_rng();
            let backoff = Backoff::new();
            while worker.status.load(Ordering::SeqCst) == SchedulerStatus::Active as u8
                || !(worker.work_q.is_empty() && worker.work_inj.is_empty())
            {
                let omsg = worker.work_q.pop().or_else(|| {
                    if worker
                        .work_flag
                        .compare_exchange(0, 1, Ordering::SeqCst, Ordering::Relaxed)
                        == Ok(0)
                    {
                        let ret = worker
                            .work_inj
                            .steal_batch_and_pop(&worker.work_q)
                            .success();
                        worker.work_flag.store(0, Ordering::SeqCst);
                        ret
                    } else {
                        worker
                            .work_stealers
                            .choose(&mut rng)
                            .and_then(|s| s.steal().success())
                    }
                });
                match omsg {
                    Some(runnable) => {
                        backoff.reset();
                        runnable.run();
                    }
                    None => backoff.snooze(),
                }
            }
            active_cnt.fetch_sub(1, Ordering::SeqCst);
            trace!("worker thread {idx} shutting down");
        })
    }
}

#[derive(Debug)]
pub(crate) struct WorkStealing {
    num_threads: usize,
    threads: Vec<thread::JoinHandle<()>>,
    work_inj: Arc<Injector<Runnable<TaskId>>>,
    work_stealers: Vec<Stealer<Runnable<TaskId>>>,
    work_flag: Arc<AtomicU8>,
    status: Arc<AtomicU8>,
    active_cnt: Arc<AtomicUsize>,
}

impl SchedulerQueue for WorkStealing {
    fn spawn_task<F, Fut>(&self, task: F) -> (TaskId, async_task::Task<Fut::Output, TaskId>)
    where
        F: FnOnce(TaskId) -> Fut + Send + 'static,
        Fut: Future + Send + 'static,
        Fut::Output: Send + 'static,
    {
        let task_id = TASK_ID.fetch_add(1, Ordering::Relaxed);
        let work_inj = self.work_inj.clone();
        let schedule = move |runnable| work_inj.push(runnable);
        let (runnable, task) = Builder::new()
            .metadata(task_id)
            .propagate_panic(true)
            .spawn(
                move |task_id: &TaskId| {
                    let task_id = *task_id;
                    task(task_id).instrument(trace_span!("Spawned Task", task_id = task_id))
                },
                schedule,
            );
        runnable.schedule();
        (task_id, task)
    }

    fn submit_task<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task_id = TASK_ID.fetch_add(1, Ordering::Relaxed);
        let work_inj = self.work_inj.clone();
        let schedule = move |runnable| work_inj.push(runnable);
        let (runnable, task) = Builder::new().metadata(task_id).spawn(
            move |_task_id| task.instrument(trace_span!("Submitted Task", task_id = task_id)),
            schedule,
        );
        runnable.schedule();
        task.detach();
    }

    fn block_on<F>(&self, fut: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (task_id, mut task) = self.spawn_task(move |_| fut);
        let backoff = Backoff::new();
        while !task.is_finished() {
            //try to execute another task while this one is not ready
            if self.exec_task() {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        let cx = &mut Context::from_waker(futures::task::noop_waker_ref());
        match Pin::new(&mut task).poll(cx) {
            Poll::Ready(output) => output,
            Poll::Pending => panic!("work stealing block on failed -- task id {task_id:?}"),
        }
    }

    fn exec_task(&self) -> bool {
        let ret = if self
            .work_flag
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::Relaxed)
            == Ok(0)
        {
            let ret = self.work_inj.steal().success();
            self.work_flag.store(0, Ordering::SeqCst);
            ret
        } else {
            None
        };
        let ret = ret.or_else(|| {
            self.work_stealers
                .choose(&mut rand::thread_rng())
                .and_then(|s| s.steal().success())
        });
        match ret {
            Some(runnable) => {
                runnable.run();
                true
            }
            None => false,
        }
    }

    #[tracing::instrument(skip_all, level = "debug")]
    fn shutdown(&self) {
        self.status
            .store(SchedulerStatus::Finished as u8, Ordering::SeqCst);
    }

    fn active(&self) -> bool {
        self.status.load(Ordering::SeqCst) == SchedulerStatus::Active as u8
    }

    fn num_workers(&self) -> usize {
        self.num_threads
    }
}

impl WorkStealing {
    pub(crate) fn new(num_workers: usize, bind_threads: bool, status: Arc<AtomicU8>) -> WorkStealing {
        let core_ids = if bind_threads {
            let ids = core_affinity::get_core_ids()
                .unwrap_or_else(|| vec![core_affinity::CoreId { id: 0 }]);
            Some(Arc::new(ids))
        } else {
            None
        };
        let mut ws = WorkStealing {
            // the calling thread does work during block_on
            num_threads: std::cmp::max(1, num_workers.saturating_sub(1)),
            threads: Vec::new(),
            work_inj: Arc::new(Injector::new()),
            work_stealers: Vec::new(),
            work_flag: Arc::new(AtomicU8::new(0)),
            status,
            active_cnt: Arc::new(AtomicUsize::new(0)),
        };
        ws.init(core_ids);
        ws
    }

    fn init(&mut self, core_ids: Option<Arc<Vec<CoreId>>>) {
        let mut work_workers: Vec<Worker<Runnable<TaskId>>> = vec![];
        for _i in 0..self.num_threads {
            let work_worker: Worker<Runnable<TaskId>> = Worker::new_fifo();
            self.work_stealers.push(work_worker.stealer());
            work_workers.push(work_worker);
        }
        for (i, work_worker) in work_workers.into_iter().enumerate() {
            let worker = WorkStealingThread {
                work_inj: self.work_inj.clone(),
                work_stealers: self.work_stealers.clone(),
                work_q: work_worker,
                work_flag: self.work_flag.clone(),
                status: self.status.clone(),
            };
            match WorkStealingThread::run(worker, i, self.active_cnt.clone(), core_ids.clone()) {
                Ok(handle) => self.threads.push(handle),
                Err(e) => tracing::error!("unable to spawn worker thread {i}: {e}"),
            }
        }
        while self.active_cnt.load(Ordering::SeqCst) != self.threads.len() {
            std::thread::yield_now();
        }
    }
}

impl Drop for WorkStealing {
    #[tracing::instrument(skip_all, level = "debug")]
    fn drop(&mut self) {
        self.shutdown();
        while let Some(thread) = self.threads.pop() {
            if thread.thread().id() != std::thread::current().id() {
                let _res = thread.join();
            }
        }
    }
}
