use crate::error::{Error, Result};
use crate::fabric::{handler, Action, Backend, FabricComm};
use crate::locality::Locality;
use crate::scheduler::{Scheduler, SchedulerQueue};

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Localities living in one process; delivering a parcel spawns its handler on the shared scheduler.
pub(crate) struct LocalFabric {
    num_localities: usize,
    localities: RwLock<Vec<Arc<Locality>>>,
    scheduler: Arc<Scheduler>,
    bytes_sent: AtomicUsize,
}

impl std::fmt::Debug for LocalFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalFabric({} localities)", self.num_localities)
    }
}

impl LocalFabric {
    pub(crate) fn new(num_localities: usize, scheduler: Arc<Scheduler>) -> LocalFabric {
        LocalFabric {
            num_localities,
            localities: RwLock::new(Vec::new()),
            scheduler,
            bytes_sent: AtomicUsize::new(0),
        }
    }
}

impl FabricComm for LocalFabric {
    fn num_localities(&self) -> usize {
        self.num_localities
    }

    fn attach(&self, localities: Vec<Arc<Locality>>) {
        *self.localities.write() = localities;
    }

    fn send(&self, dest: usize, action: Action, data: Vec<u8>) -> Result<()> {
        let locality = self
            .localities
            .read()
            .get(dest)
            .cloned()
            .ok_or_else(|| Error::Generic(format!("locality {dest} is not reachable")))?;
        let handler = handler(action)?;
        self.bytes_sent.fetch_add(data.len(), Ordering::Relaxed);
        trace!("parcel {action:?} ({} bytes) -> locality {dest}", data.len());
        self.scheduler.submit_task(async move {
            if let Err(e) = handler(locality, data).await {
                error!("{action:?} handler on locality {dest} failed: {e}");
            }
        });
        Ok(())
    }

    fn bytes_sent(&self) -> usize {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    fn backend(&self) -> Backend {
        Backend::Local
    }

    fn shutdown(&self) {
        // localities hold the fabric, dropping them here breaks the cycle
        self.localities.write().clear();
    }
}
