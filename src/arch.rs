//! Rank ⇄ (locality, slot) arithmetic.
//!
//! Ranks are dealt round-robin over localities: rank `r` lives on locality
//! `r % L` in slot `r / L`. Every locality computes the same map from the
//! start-up configuration, so no lookup traffic is ever needed.

use crate::error::Error;
use crate::scheduler::TaskId;

use parking_lot::RwLock;

/// An error that occurs when trying to access a rank, locality or slot that does not exist
#[derive(Debug, Clone, Copy)]
pub struct IdError {
    pub id: usize,
    pub bound: usize,
}

pub type ArchResult<T> = std::result::Result<T, IdError>;

impl std::fmt::Display for IdError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Invalid Id => id:{} bound => {}", self.id, self.bound)
    }
}

impl std::error::Error for IdError {}

impl From<IdError> for Error {
    fn from(e: IdError) -> Self {
        Error::InvalidRank {
            rank: e.id,
            size: e.bound,
        }
    }
}

/// Number of ranks hosted by `locality`.
///
/// A non-zero `ranks_per_node` wins; otherwise a non-zero `ranks` is spread
/// as evenly as possible with the low localities taking the remainder;
/// otherwise every locality hosts a single rank.
pub fn decide_ranks_per_node(
    locality: usize,
    num_localities: usize,
    ranks: usize,
    ranks_per_node: usize,
) -> usize {
    if ranks_per_node > 0 {
        ranks_per_node
    } else if ranks > 0 {
        ranks / num_localities + usize::from(locality < ranks % num_localities)
    } else {
        1
    }
}

#[derive(Debug, Clone)]
pub struct RankMap {
    num_localities: usize,
    size: usize,
    per_locality: Vec<usize>,
}

impl RankMap {
    pub fn new(num_localities: usize, ranks: usize, ranks_per_node: usize) -> RankMap {
        let num_localities = num_localities.max(1);
        let per_locality: Vec<usize> = (0..num_localities)
            .map(|l| decide_ranks_per_node(l, num_localities, ranks, ranks_per_node))
            .collect();
        RankMap {
            num_localities,
            size: per_locality.iter().sum(),
            per_locality,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn num_localities(&self) -> usize {
        self.num_localities
    }

    pub fn ranks_on(&self, locality: usize) -> usize {
        self.per_locality.get(locality).copied().unwrap_or(0)
    }

    pub fn rank_of(&self, locality: usize, slot: usize) -> ArchResult<usize> {
        if slot < self.ranks_on(locality) {
            Ok(locality + slot * self.num_localities)
        } else {
            Err(IdError {
                id: slot,
                bound: self.ranks_on(locality),
            })
        }
    }

    pub fn locality_of(&self, rank: usize) -> ArchResult<usize> {
        self.check(rank).map(|r| r % self.num_localities)
    }

    pub fn slot_of(&self, rank: usize) -> ArchResult<usize> {
        self.check(rank).map(|r| r / self.num_localities)
    }

    fn check(&self, rank: usize) -> ArchResult<usize> {
        if rank < self.size {
            Ok(rank)
        } else {
            Err(IdError {
                id: rank,
                bound: self.size,
            })
        }
    }
}

/// Per-locality table of which task occupies which local slot.
#[derive(Debug)]
pub(crate) struct SlotRegistry {
    tids: RwLock<Vec<Option<TaskId>>>,
}

impl SlotRegistry {
    pub(crate) fn new(slots: usize) -> SlotRegistry {
        SlotRegistry {
            tids: RwLock::new(vec![None; slots]),
        }
    }

    pub(crate) fn register(&self, slot: usize, task_id: TaskId) -> ArchResult<()> {
        let mut tids = self.tids.write();
        let bound = tids.len();
        match tids.get_mut(slot) {
            Some(entry) => {
                *entry = Some(task_id);
                Ok(())
            }
            None => Err(IdError { id: slot, bound }),
        }
    }

    pub(crate) fn local_slot_index(&self, task_id: TaskId) -> ArchResult<usize> {
        let tids = self.tids.read();
        tids.iter()
            .position(|t| *t == Some(task_id))
            .ok_or(IdError {
                id: task_id,
                bound: tids.len(),
            })
    }
}
