use crate::error::{Error, Result};
use crate::transaction_dict::TransactionDict;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Collective operation kinds, each owning its own transaction dictionary on a communicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum OpKind {
    Scatterv,
    Gatherv,
    Bcast,
    Gather,
    Alltoallv,
    Alltoall,
    Reduce,
}

impl OpKind {
    pub(crate) const ALL: [OpKind; 7] = [
        OpKind::Scatterv,
        OpKind::Gatherv,
        OpKind::Bcast,
        OpKind::Gather,
        OpKind::Alltoallv,
        OpKind::Alltoall,
        OpKind::Reduce,
    ];
}

/// Small fixed-capacity lookup from operation kind to its transaction dictionary.
#[derive(Debug)]
pub(crate) struct OpDict {
    capacity: usize,
    dicts: Mutex<IndexMap<OpKind, Arc<TransactionDict>>>,
}

impl OpDict {
    pub(crate) fn new(capacity: usize) -> OpDict {
        OpDict {
            capacity,
            dicts: Mutex::new(IndexMap::with_capacity(capacity)),
        }
    }

    pub(crate) fn insert(&self, kind: OpKind, dict: Arc<TransactionDict>) -> Result<()> {
        let mut dicts = self.dicts.lock();
        if !dicts.contains_key(&kind) && dicts.len() >= self.capacity {
            return Err(Error::Generic(format!(
                "operation dictionary full ({} kinds), cannot insert {kind:?}",
                self.capacity
            )));
        }
        dicts.insert(kind, dict);
        Ok(())
    }

    pub(crate) fn search(&self, kind: OpKind) -> Result<Arc<TransactionDict>> {
        self.dicts
            .lock()
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Generic(format!("no transaction dictionary for {kind:?}")))
    }

    pub(crate) fn clear(&self) {
        self.dicts.lock().clear();
    }
}
