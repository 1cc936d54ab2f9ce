use crate::communicator::Communicator;
use crate::error::{Error, Result};
use crate::request::RequestTable;

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bookkeeping for one logical rank, owned by the locality hosting it.
#[derive(Debug)]
pub(crate) struct RankRecord {
    pub(crate) rank: usize,
    initialized: AtomicBool,
    finalized: AtomicBool,
    // index = communicator id, 0 is the world communicator
    comms: RwLock<Vec<Option<Arc<Communicator>>>>,
    pub(crate) requests: Mutex<RequestTable>,
}

impl RankRecord {
    pub(crate) fn new(rank: usize, request_capacity: usize) -> RankRecord {
        RankRecord {
            rank,
            initialized: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            comms: RwLock::new(Vec::new()),
            requests: Mutex::new(RequestTable::new(request_capacity)),
        }
    }

    pub(crate) fn add_comm(&self, comm: Arc<Communicator>) {
        let mut comms = self.comms.write();
        if comms.len() <= comm.id {
            comms.resize_with(comm.id + 1, || None);
        }
        let id = comm.id;
        comms[id] = Some(comm);
    }

    pub(crate) fn comm(&self, id: usize) -> Result<Arc<Communicator>> {
        match self.comms.read().get(id) {
            Some(Some(comm)) if !comm.is_destroyed() => Ok(comm.clone()),
            _ => Err(Error::Generic(format!(
                "rank {} has no live communicator {id}",
                self.rank
            ))),
        }
    }

    pub(crate) fn set_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }

    /// Mark finalized and destroy every communicator; returns false if already finalized.
    pub(crate) fn finalize(&self) -> bool {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return false;
        }
        for comm in self.comms.read().iter().flatten() {
            comm.destroy();
        }
        true
    }
}
