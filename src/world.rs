//! World start-up, rank task launch and the handles rank code works through.

use crate::arch::RankMap;
use crate::communicator::{CommConfig, Communicator};
use crate::config;
use crate::error::{Error, Result};
use crate::fabric::{create_fabric, Action, Backend, CollectiveHeader, Fabric, FabricComm};
use crate::locality::Locality;
use crate::op_dict::OpKind;
use crate::rank::RankRecord;
use crate::scheduler::{create_scheduler, Scheduler, SchedulerQueue, SchedulerStatus, SchedulerType, TaskId};

use futures::Future;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// An in-process world of localities, each hosting a number of ranks.
///
/// Rank programs are launched with [MpiWorld::run]; each receives a
/// [RankEnv] from which it initializes its [Mpi] context.
///
/// # Examples
///
///```
/// use ammpi::MpiWorldBuilder;
///
/// let world = MpiWorldBuilder::new().with_localities(2).with_ranks(4).build();
/// let sums = world.run(|env| async move {
///     let mpi = env.init().await?;
///     let world = mpi.world()?;
///     let mut sum = [0i64];
///     world.allreduce(&[world.rank() as i64], &mut sum, ammpi::ReduceOp::Sum).await?;
///     mpi.finalize().await?;
///     Ok::<_, ammpi::Error>(sum[0])
/// });
/// assert!(sums.into_iter().all(|s| s.unwrap() == 6));
///```
pub struct MpiWorld {
    scheduler: Arc<Scheduler>,
    fabric: Arc<Fabric>,
    localities: Vec<Arc<Locality>>,
    map: Arc<RankMap>,
}

impl std::fmt::Debug for MpiWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MpiWorld {{ localities: {}, ranks: {} }}",
            self.map.num_localities(),
            self.map.size()
        )
    }
}

impl MpiWorld {
    /// Total number of ranks.
    pub fn size(&self) -> usize {
        self.map.size()
    }

    pub fn num_localities(&self) -> usize {
        self.map.num_localities()
    }

    /// Parcel bytes moved by the fabric so far.
    pub fn bytes_sent(&self) -> usize {
        self.fabric.bytes_sent()
    }

    /// Run a future to completion on the world's scheduler.
    pub fn block_on<F>(&self, f: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.scheduler.block_on(f)
    }

    /// Launch `f` once per rank as a lightweight task and wait for all of them.
    ///
    /// Outputs are returned indexed by rank.
    #[tracing::instrument(skip_all, level = "debug")]
    pub fn run<F, Fut, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(RankEnv) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Send + 'static,
    {
        if !self.scheduler.active() {
            error!("run called on a world whose scheduler has shut down");
        }
        let f = Arc::new(f);
        let mut ranks = Vec::with_capacity(self.size());
        let mut tasks = Vec::with_capacity(self.size());
        for locality in &self.localities {
            locality.reset();
        }
        for locality in &self.localities {
            for slot in 0..self.map.ranks_on(locality.id) {
                let rank = match self.map.rank_of(locality.id, slot) {
                    Ok(rank) => rank,
                    Err(e) => {
                        error!("no rank for slot {slot} of locality {}: {e}", locality.id);
                        continue;
                    }
                };
                let f = f.clone();
                let locality = locality.clone();
                let (_, task) = self.scheduler.spawn_task(move |task_id| {
                    if let Err(e) = locality.slots.register(slot, task_id) {
                        error!("unable to register task {task_id} in slot {slot}: {e}");
                    }
                    f(RankEnv { locality, task_id })
                });
                ranks.push(rank);
                tasks.push(task);
            }
        }
        let outputs = self.scheduler.block_on(futures::future::join_all(tasks));
        let mut outputs: Vec<(usize, R)> = ranks.into_iter().zip(outputs).collect();
        outputs.sort_by_key(|(rank, _)| *rank);
        outputs.into_iter().map(|(_, out)| out).collect()
    }
}

impl Drop for MpiWorld {
    #[tracing::instrument(skip_all, level = "debug")]
    fn drop(&mut self) {
        self.fabric.shutdown();
        self.scheduler.shutdown();
    }
}

/// An implementation of the Builder design pattern, used to construct an instance of an MpiWorld.
///
/// Defaults come from the `AMMPI_*` environment configuration; every setter overrides it.
///
/// # Examples
///
///```
/// use ammpi::MpiWorldBuilder;
///
/// let world = MpiWorldBuilder::new()
///                 .with_localities(3)
///                 .with_ranks_per_node(2)
///                 .with_threads(4)
///                 .build();
/// assert_eq!(world.size(), 6);
///```
#[derive(Debug, Clone)]
pub struct MpiWorldBuilder {
    backend: Backend,
    scheduler: SchedulerType,
    localities: usize,
    ranks: usize,
    ranks_per_node: usize,
    threads: usize,
    bind_threads: bool,
    request_capacity: usize,
    comm: CommConfig,
}

impl Default for MpiWorldBuilder {
    fn default() -> Self {
        MpiWorldBuilder::new()
    }
}

impl MpiWorldBuilder {
    #[tracing::instrument(skip_all)]
    pub fn new() -> MpiWorldBuilder {
        let config = config();
        MpiWorldBuilder {
            backend: Backend::default(),
            scheduler: SchedulerType::default(),
            localities: config.localities,
            ranks: config.ranks,
            ranks_per_node: config.ranks_per_node,
            threads: config.threads,
            bind_threads: config.bind_threads,
            request_capacity: config.request_capacity,
            comm: CommConfig {
                dict_capacity: config.dict_capacity,
                op_dict_capacity: config.op_dict_capacity,
                match_thread: config.match_thread,
                match_burst: config.match_burst,
                wait_timeout: config.wait_timeout.map(Duration::from_secs_f64),
            },
        }
    }

    /// Specify the fabric backend to use for this execution
    pub fn with_backend(mut self, backend: Backend) -> MpiWorldBuilder {
        self.backend = backend;
        self
    }

    /// Specify the number of localities (nodes)
    pub fn with_localities(mut self, localities: usize) -> MpiWorldBuilder {
        self.localities = localities.max(1);
        self
    }

    /// Specify the total number of ranks, spread over the localities
    pub fn with_ranks(mut self, ranks: usize) -> MpiWorldBuilder {
        self.ranks = ranks;
        self.ranks_per_node = 0;
        self
    }

    /// Specify the number of ranks every locality hosts
    pub fn with_ranks_per_node(mut self, ranks_per_node: usize) -> MpiWorldBuilder {
        self.ranks_per_node = ranks_per_node;
        self
    }

    /// Specify the number of worker threads
    pub fn with_threads(mut self, threads: usize) -> MpiWorldBuilder {
        self.threads = threads.max(1);
        self
    }

    /// Run a background matcher on every communicator
    pub fn with_match_thread(mut self, enabled: bool) -> MpiWorldBuilder {
        self.comm.match_thread = enabled;
        self
    }

    /// Abort any rendezvous wait that takes longer than `timeout`
    pub fn with_wait_timeout(mut self, timeout: Duration) -> MpiWorldBuilder {
        self.comm.wait_timeout = Some(timeout);
        self
    }

    /// Initial capacity of the transaction dictionaries
    pub fn with_dict_capacity(mut self, capacity: usize) -> MpiWorldBuilder {
        self.comm.dict_capacity = capacity.max(1);
        self
    }

    /// Initial capacity of each rank's request table
    pub fn with_request_capacity(mut self, capacity: usize) -> MpiWorldBuilder {
        self.request_capacity = capacity;
        self
    }

    #[tracing::instrument(skip_all)]
    pub fn build(self) -> MpiWorld {
        let map = Arc::new(RankMap::new(self.localities, self.ranks, self.ranks_per_node));
        let status = Arc::new(AtomicU8::new(SchedulerStatus::Active as u8));
        let scheduler = Arc::new(create_scheduler(
            self.scheduler,
            self.threads,
            self.bind_threads,
            status,
        ));
        let fabric = Arc::new(create_fabric(
            self.backend,
            map.num_localities(),
            scheduler.clone(),
        ));
        let localities: Vec<Arc<Locality>> = (0..map.num_localities())
            .map(|id| {
                Arc::new(Locality::new(
                    id,
                    map.clone(),
                    fabric.clone(),
                    scheduler.clone(),
                    self.comm.clone(),
                    self.request_capacity,
                ))
            })
            .collect();
        fabric.attach(localities.clone());
        tracing::debug!(
            "built world: {} localities, {} ranks, {} workers, {:?} fabric",
            map.num_localities(),
            map.size(),
            scheduler.num_workers(),
            fabric.backend()
        );
        MpiWorld {
            scheduler,
            fabric,
            localities,
            map,
        }
    }
}

/// What a rank task is handed at launch: where it runs and who it is.
#[derive(Debug, Clone)]
pub struct RankEnv {
    locality: Arc<Locality>,
    task_id: TaskId,
}

impl RankEnv {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Id of the locality hosting this rank.
    pub fn locality(&self) -> usize {
        self.locality.id
    }

    /// Create this rank's state and wait until every rank of the world has done the same.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn init(&self) -> Result<Mpi> {
        let slot = self.locality.slots.local_slot_index(self.task_id)?;
        if let Ok(record) = self.locality.record(slot) {
            if record.is_initialized() && !record.is_finalized() {
                return Ok(Mpi {
                    locality: self.locality.clone(),
                    record,
                });
            }
        }
        let record = self.locality.create_record(slot)?;
        self.locality.announce_init(record.rank)?;
        self.locality
            .wait_all_inited(self.locality.comm_config.wait_timeout)
            .await?;
        record.set_initialized();
        Ok(Mpi {
            locality: self.locality.clone(),
            record,
        })
    }

    /// The context of an already initialized rank.
    pub fn current(&self) -> Result<Mpi> {
        let slot = self.locality.slots.local_slot_index(self.task_id)?;
        let record = self.locality.record(slot)?;
        if !record.is_initialized() || record.is_finalized() {
            return Err(Error::NotInitialized);
        }
        Ok(Mpi {
            locality: self.locality.clone(),
            record,
        })
    }
}

/// Per-rank message-passing context.
#[derive(Debug, Clone)]
pub struct Mpi {
    locality: Arc<Locality>,
    record: Arc<RankRecord>,
}

impl Mpi {
    /// The communicator spanning every rank.
    pub fn world(&self) -> Result<Comm> {
        if self.record.is_finalized() {
            return Err(Error::NotInitialized);
        }
        Ok(Comm {
            inner: self.record.comm(0)?,
            locality: self.locality.clone(),
            record: self.record.clone(),
        })
    }

    pub fn rank(&self) -> usize {
        self.record.rank
    }

    pub fn size(&self) -> usize {
        self.locality.map.size()
    }

    /// Synchronize with every rank, then tear down this rank's communicators.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn finalize(self) -> Result<()> {
        if self.record.is_finalized() {
            return Ok(());
        }
        self.world()?.barrier().await?;
        self.record.finalize();
        Ok(())
    }
}

/// Handle to one communicator as seen by one rank.
#[derive(Debug, Clone)]
pub struct Comm {
    pub(crate) inner: Arc<Communicator>,
    pub(crate) locality: Arc<Locality>,
    pub(crate) record: Arc<RankRecord>,
}

impl Comm {
    /// This rank's id within the communicator (`comm_rank`).
    pub fn rank(&self) -> usize {
        self.inner.rank
    }

    /// Number of ranks in the communicator (`comm_size`).
    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub(crate) fn timeout(&self) -> Option<Duration> {
        self.inner.wait_timeout
    }

    pub(crate) fn check_root(&self, root: usize) -> Result<usize> {
        self.inner.check_rank(root)
    }

    /// Ship one collective block to `dest`.
    pub(crate) fn send_collective(&self, dest: usize, op: OpKind, trans_num: u64, payload: &[u8]) -> Result<()> {
        let header = CollectiveHeader {
            source_rank: self.rank(),
            dest_rank: self.inner.check_rank(dest)?,
            comm_id: self.id(),
            op,
            trans_num,
            payload_size: payload.len(),
        };
        self.locality
            .send_to_rank(dest, Action::from(op), &header, payload)
    }
}
