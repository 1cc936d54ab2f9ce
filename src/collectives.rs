//! Collective operations built on the transaction dictionary rendezvous.
//!
//! Every rank takes a transaction number from the dictionary of the
//! operation kind on every call, so numbers agree across ranks as long as
//! collectives are called in the same order everywhere. Receivers deposit a
//! sink under that number; parcels carry it in their header so the handler
//! on the receiving side finds the same entry no matter in which order
//! parcels arrive.

use crate::communicator::Communicator;
use crate::error::{Error, Result};
use crate::fabric::{decode, CollectiveHeader, HandlerFuture};
use crate::locality::Locality;
use crate::transaction_dict::{Deposit, Signal};
use crate::world::Comm;

use futures::FutureExt;
use std::sync::Arc;
use tracing::trace;

pub(crate) mod alltoall;
pub(crate) mod alltoallv;
pub(crate) mod bcast;
pub(crate) mod derived;
pub(crate) mod gather;
pub(crate) mod gatherv;
pub(crate) mod reduce;
pub(crate) mod scatterv;

impl Comm {
    /// Wait on one rendezvous signal with the communicator deadline.
    pub(crate) async fn await_signal(&self, signal: Signal) -> Result<()> {
        signal.wait(self.timeout()).await?
    }

    /// Wait on every signal; the first failure (in rank order) wins.
    pub(crate) async fn await_all(&self, signals: Vec<Signal>) -> Result<()> {
        let timeout = self.timeout();
        let results =
            futures::future::join_all(signals.iter().map(|signal| signal.wait(timeout))).await;
        for res in results {
            res??;
        }
        Ok(())
    }
}

/// Check a counts/displacements pair against a buffer of `len` elements.
pub(crate) fn check_layout(counts: &[usize], displs: &[usize], size: usize, len: usize) -> Result<()> {
    if counts.len() != size || displs.len() != size {
        return Err(Error::InvalidArgument(format!(
            "{} counts and {} displacements for {size} ranks",
            counts.len(),
            displs.len()
        )));
    }
    for (rank, (count, displ)) in counts.iter().zip(displs.iter()).enumerate() {
        if *count > 0 && displ.checked_add(*count).map_or(true, |end| end > len) {
            return Err(Error::InvalidArgument(format!(
                "block of {count} elements for rank {rank} at element {displ} overruns a {len} element buffer"
            )));
        }
    }
    Ok(())
}

struct Arrival {
    header: CollectiveHeader,
    payload: Vec<u8>,
    userside: Signal,
    deposit: Deposit,
}

// decode, find the entry for the header's transaction and wait for the user side's deposit
async fn arrive(locality: &Locality, data: &[u8]) -> Result<Arrival> {
    let (header, payload): (CollectiveHeader, _) = decode(data)?;
    let comm: Arc<Communicator> = locality.comm(header.dest_rank, header.comm_id)?;
    let dict = comm.dict(header.op)?;
    let arrival = dict.inc_nicside_count();
    trace!(
        "{:?} #{} from {} at rank {} (arrival {arrival})",
        header.op,
        header.trans_num,
        header.source_rank,
        header.dest_rank
    );
    let (userside, nicside) = dict.nicside_record(header.trans_num)?;
    // a parcel that has arrived waits for its caller however late it shows up
    let deposit = nicside.get().await;
    Ok(Arrival {
        header,
        payload,
        userside,
        deposit,
    })
}

fn mismatch(arrival: &Arrival) -> Error {
    let err = Error::Generic(format!(
        "{:?} parcel #{} found a mismatched deposit",
        arrival.header.op, arrival.header.trans_num
    ));
    let _ = arrival.userside.set(Err(err.clone()));
    err
}

/// Copies the payload into the single buffer deposited by the receiver (broadcast, scatter).
pub(crate) fn buffer_handler(locality: Arc<Locality>, data: Vec<u8>) -> HandlerFuture {
    async move {
        let arrival = arrive(&locality, &data).await?;
        match &arrival.deposit {
            Deposit::Buffer(sink) => {
                let res = sink.accept(&arrival.payload);
                if arrival.userside.set(res.clone()).is_err() {
                    return Err(Error::Recording {
                        trans_num: arrival.header.trans_num,
                        reason: "user side released twice".to_string(),
                    });
                }
                res
            }
            _ => Err(mismatch(&arrival)),
        }
    }
    .boxed()
}

/// Places the payload at the source's displacement (gather, gatherv, alltoall, alltoallv).
pub(crate) fn gather_handler(locality: Arc<Locality>, data: Vec<u8>) -> HandlerFuture {
    async move {
        let arrival = arrive(&locality, &data).await?;
        match &arrival.deposit {
            Deposit::Gather(sink) => sink.accept(arrival.header.source_rank, &arrival.payload),
            _ => Err(mismatch(&arrival)),
        }
    }
    .boxed()
}

/// Folds the payload into the root's accumulator.
pub(crate) fn reduce_handler(locality: Arc<Locality>, data: Vec<u8>) -> HandlerFuture {
    async move {
        let arrival = arrive(&locality, &data).await?;
        match &arrival.deposit {
            Deposit::Reduce(sink) => sink.accept(arrival.header.source_rank, &arrival.payload),
            _ => Err(mismatch(&arrival)),
        }
    }
    .boxed()
}
