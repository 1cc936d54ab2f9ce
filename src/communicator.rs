//! Per-rank communicator state: collective rendezvous tables, point-to-point
//! arrival lists and the pending receive queue that the matching engine
//! walks.

use crate::error::{Error, Result};
use crate::op_dict::{OpDict, OpKind};
use crate::p2p::{Message, P2pList};
use crate::request::{Request, Source};
use crate::scheduler::{Scheduler, SchedulerQueue};
use crate::transaction_dict::TransactionDict;

use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Sizing and behavior knobs handed down from the world configuration.
#[derive(Debug, Clone)]
pub(crate) struct CommConfig {
    pub(crate) dict_capacity: usize,
    pub(crate) op_dict_capacity: usize,
    pub(crate) match_thread: bool,
    pub(crate) match_burst: usize,
    pub(crate) wait_timeout: Option<Duration>,
}

impl Default for CommConfig {
    fn default() -> Self {
        CommConfig {
            dict_capacity: 100,
            op_dict_capacity: 16,
            match_thread: false,
            match_burst: 100,
            wait_timeout: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Communicator {
    pub(crate) id: usize,
    pub(crate) rank: usize,
    pub(crate) size: usize,
    pub(crate) wait_timeout: Option<Duration>,
    op_dict: OpDict,
    p2p: Vec<P2pList>,
    pending: Mutex<VecDeque<Arc<Request>>>,
    matcher: Mutex<Option<UnboundedSender<()>>>,
    destroyed: AtomicBool,
}

impl Communicator {
    #[tracing::instrument(skip(config, scheduler), level = "debug")]
    pub(crate) fn create(
        id: usize,
        size: usize,
        rank: usize,
        config: &CommConfig,
        scheduler: &Scheduler,
    ) -> Result<Arc<Communicator>> {
        if rank >= size {
            return Err(Error::InvalidRank { rank, size });
        }
        let op_dict = OpDict::new(config.op_dict_capacity);
        for kind in OpKind::ALL {
            op_dict.insert(kind, Arc::new(TransactionDict::new(config.dict_capacity)))?;
        }
        let comm = Arc::new(Communicator {
            id,
            rank,
            size,
            wait_timeout: config.wait_timeout,
            op_dict,
            p2p: (0..size).map(|_| P2pList::new()).collect(),
            pending: Mutex::new(VecDeque::new()),
            matcher: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });
        if config.match_thread {
            comm.start_matcher(scheduler, config.match_burst);
        }
        Ok(comm)
    }

    // Matching moves off the delivering thread: each wake-up matches at most
    // `burst` requests and re-arms itself while work remains.
    fn start_matcher(self: &Arc<Self>, scheduler: &Scheduler, burst: usize) {
        let (tx, mut rx) = unbounded::<()>();
        *self.matcher.lock() = Some(tx);
        let comm = self.clone();
        let burst = burst.max(1);
        scheduler.submit_task(async move {
            while rx.next().await.is_some() {
                let mut matched = 0;
                while matched < burst && comm.match_message() {
                    matched += 1;
                }
                if matched == burst {
                    comm.notify_matcher();
                }
            }
            trace!("matcher for comm {} on rank {} stopped", comm.id, comm.rank);
        });
    }

    // false when no matcher is running and the caller has to match inline
    fn notify_matcher(&self) -> bool {
        match self.matcher.lock().as_ref() {
            Some(tx) => tx.unbounded_send(()).is_ok(),
            None => false,
        }
    }

    pub(crate) fn dict(&self, kind: OpKind) -> Result<Arc<TransactionDict>> {
        self.op_dict.search(kind)
    }

    pub(crate) fn peer(&self, rank: usize) -> Result<&P2pList> {
        self.p2p.get(rank).ok_or(Error::InvalidRank {
            rank,
            size: self.size,
        })
    }

    pub(crate) fn check_rank(&self, rank: usize) -> Result<usize> {
        if rank < self.size {
            Ok(rank)
        } else {
            Err(Error::InvalidRank {
                rank,
                size: self.size,
            })
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    // caller holds the pending lock
    fn match_locked(&self, pending: &mut VecDeque<Arc<Request>>) -> bool {
        let hit = pending.iter().position(|req| match req.source {
            Source::Rank(src) => self.p2p.get(src).map_or(false, |list| list.try_fulfill(req)),
            Source::Any => self.p2p.iter().any(|list| list.try_fulfill(req)),
        });
        match hit {
            Some(idx) => {
                pending.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Match the oldest pending request that any arrival satisfies.
    pub(crate) fn match_message(&self) -> bool {
        let mut pending = self.pending.lock();
        self.match_locked(&mut pending)
    }

    /// Match until nothing more can be matched.
    pub(crate) fn progress(&self) {
        let mut pending = self.pending.lock();
        while self.match_locked(&mut pending) {}
    }

    /// Queue an arrived message and match whatever it unblocks, either here
    /// or on the background matcher.
    pub(crate) fn deliver(&self, msg: Message) -> Result<()> {
        let list = self.peer(msg.source)?;
        {
            let _pending = self.pending.lock();
            list.append(msg);
        }
        if !self.notify_matcher() {
            self.progress();
        }
        Ok(())
    }

    /// Add a receive request to the pending queue and match it, either here
    /// or on the background matcher.
    pub(crate) fn post(&self, req: Arc<Request>) {
        self.pending.lock().push_back(req);
        if !self.notify_matcher() {
            self.progress();
        }
    }

    /// Drop a request that has not been matched yet; returns whether it was still pending.
    pub(crate) fn cancel(&self, number: usize) -> bool {
        let mut pending = self.pending.lock();
        match pending.iter().position(|r| r.number == number) {
            Some(idx) => {
                pending.remove(idx);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Release collective tables and stop the background matcher; safe to call more than once.
    pub(crate) fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("destroying comm {} on rank {}", self.id, self.rank);
        self.matcher.lock().take();
        self.op_dict.clear();
        self.pending.lock().clear();
    }
}
