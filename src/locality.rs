//! State of one locality (node): the ranks it hosts, the task → slot
//! registry and the futures tracking which ranks of the world have
//! finished initializing.

use crate::arch::{RankMap, SlotRegistry};
use crate::communicator::{CommConfig, Communicator};
use crate::error::{Error, Result};
use crate::fabric::{decode, encode, Action, Fabric, FabricComm, HandlerFuture, InitHeader};
use crate::oneshot::OneShot;
use crate::rank::RankRecord;
use crate::scheduler::Scheduler;

use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Debug)]
pub(crate) struct Locality {
    pub(crate) id: usize,
    pub(crate) map: Arc<RankMap>,
    pub(crate) fabric: Arc<Fabric>,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) comm_config: CommConfig,
    pub(crate) request_capacity: usize,
    pub(crate) slots: SlotRegistry,
    // index = local slot
    ranks: RwLock<Vec<Option<Arc<RankRecord>>>>,
    // index = global rank
    rank_init_futs: RwLock<Vec<Arc<OneShot<()>>>>,
}

impl Locality {
    pub(crate) fn new(
        id: usize,
        map: Arc<RankMap>,
        fabric: Arc<Fabric>,
        scheduler: Arc<Scheduler>,
        comm_config: CommConfig,
        request_capacity: usize,
    ) -> Locality {
        let local_ranks = map.ranks_on(id);
        let size = map.size();
        Locality {
            id,
            map,
            fabric,
            scheduler,
            comm_config,
            request_capacity,
            slots: SlotRegistry::new(local_ranks),
            ranks: RwLock::new(vec![None; local_ranks]),
            rank_init_futs: RwLock::new((0..size).map(|_| OneShot::new_arc()).collect()),
        }
    }

    /// Forget the ranks of a previous run so a new one starts from scratch.
    pub(crate) fn reset(&self) {
        for record in self.ranks.write().iter_mut() {
            if let Some(record) = record.take() {
                record.finalize();
            }
        }
        let size = self.map.size();
        *self.rank_init_futs.write() = (0..size).map(|_| OneShot::new_arc()).collect();
    }

    pub(crate) fn record(&self, slot: usize) -> Result<Arc<RankRecord>> {
        self.ranks
            .read()
            .get(slot)
            .cloned()
            .flatten()
            .ok_or(Error::NotInitialized)
    }

    /// Build the record for the rank in `slot`, including its world communicator.
    pub(crate) fn create_record(&self, slot: usize) -> Result<Arc<RankRecord>> {
        let rank = self.map.rank_of(self.id, slot)?;
        let record = Arc::new(RankRecord::new(rank, self.request_capacity));
        let world = Communicator::create(0, self.map.size(), rank, &self.comm_config, &self.scheduler)?;
        record.add_comm(world);
        let mut ranks = self.ranks.write();
        match ranks.get_mut(slot) {
            Some(entry) => {
                *entry = Some(record.clone());
                Ok(record)
            }
            None => Err(Error::InvalidRank {
                rank,
                size: self.map.size(),
            }),
        }
    }

    /// The communicator `comm_id` of a rank hosted here.
    pub(crate) fn comm(&self, rank: usize, comm_id: usize) -> Result<Arc<Communicator>> {
        if self.map.locality_of(rank)? != self.id {
            return Err(Error::Generic(format!(
                "rank {rank} is not hosted by locality {}",
                self.id
            )));
        }
        self.record(self.map.slot_of(rank)?)?.comm(comm_id)
    }

    /// Encode a parcel and ship it to the locality hosting `dest_rank`.
    pub(crate) fn send_to_rank<H: Serialize>(
        &self,
        dest_rank: usize,
        action: Action,
        header: &H,
        payload: &[u8],
    ) -> Result<()> {
        let dest = self.map.locality_of(dest_rank)?;
        self.fabric.send(dest, action, encode(header, payload)?)
    }

    /// Tell every locality that `rank` is ready to receive parcels.
    pub(crate) fn announce_init(&self, rank: usize) -> Result<()> {
        let data = encode(&InitHeader { rank }, &[])?;
        for dest in 0..self.fabric.num_localities() {
            self.fabric.send(dest, Action::MarkRankInited, data.clone())?;
        }
        Ok(())
    }

    /// Wait until every rank of the world has announced itself.
    pub(crate) async fn wait_all_inited(&self, deadline: Option<Duration>) -> Result<()> {
        let futs = self.rank_init_futs.read().clone();
        for fut in futs {
            fut.wait(deadline).await?;
        }
        Ok(())
    }

    fn mark_rank_inited(&self, rank: usize) -> Result<()> {
        let futs = self.rank_init_futs.read();
        match futs.get(rank) {
            Some(fut) => {
                if fut.set(()).is_err() {
                    trace!("rank {rank} announced twice on locality {}", self.id);
                }
                Ok(())
            }
            None => Err(Error::InvalidRank {
                rank,
                size: futs.len(),
            }),
        }
    }
}

pub(crate) fn mark_rank_inited_handler(locality: Arc<Locality>, data: Vec<u8>) -> HandlerFuture {
    async move {
        let (header, _): (InitHeader, _) = decode(&data)?;
        trace!("locality {} sees rank {} inited", locality.id, header.rank);
        locality.mark_rank_inited(header.rank)
    }
    .boxed()
}
