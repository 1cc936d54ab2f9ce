//! The rendezvous table pairing a locally initiated call with a remotely
//! triggered handler for one operation kind on one communicator.
//!
//! Each live entry carries two one-shot futures. The user side deposits
//! where incoming data should land by setting the nic-side future; the
//! handler waits on it, moves the data, then releases the caller through
//! the user-side future (or, for gather-like deposits, through a per-source
//! future carried inside the deposit). Whichever side shows up first creates
//! the entry. Only the call that recorded the user side completes it.

use crate::datatype::DatatypeKind;
use crate::error::{Error, Result};
use crate::oneshot::OneShot;
use crate::op::{fold, ReduceOp};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

pub(crate) type Signal = Arc<OneShot<Result<()>>>;

/// Destination for a single incoming block (broadcast, scatter).
#[derive(Debug)]
pub(crate) struct BufferSink {
    buf: Mutex<Vec<u8>>,
    capacity: usize,
}

impl BufferSink {
    pub(crate) fn new(capacity: usize) -> Arc<BufferSink> {
        Arc::new(BufferSink {
            buf: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        })
    }

    pub(crate) fn accept(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.capacity {
            return Err(Error::Truncated {
                incoming: payload.len(),
                capacity: self.capacity,
            });
        }
        let mut buf = self.buf.lock();
        buf.clear();
        buf.extend_from_slice(payload);
        Ok(())
    }

    pub(crate) fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.lock())
    }
}

/// Destination for one block per source rank placed at byte displacements.
#[derive(Debug)]
pub(crate) struct GatherSink {
    buf: Mutex<Vec<u8>>,
    displs: Vec<usize>,
    lens: Vec<usize>,
    futs: Vec<Signal>,
}

impl GatherSink {
    /// `displs` and `lens` are in bytes, one per source rank.
    pub(crate) fn new(total: usize, displs: Vec<usize>, lens: Vec<usize>) -> Result<Arc<GatherSink>> {
        if displs.len() != lens.len() {
            return Err(Error::InvalidArgument(format!(
                "{} displacements for {} counts",
                displs.len(),
                lens.len()
            )));
        }
        let overruns = |i: usize| lens[i] > 0 && displs[i].checked_add(lens[i]).map_or(true, |end| end > total);
        if let Some(src) = (0..lens.len()).find(|&i| overruns(i)) {
            return Err(Error::InvalidArgument(format!(
                "block of {} bytes from rank {src} at byte {} overruns a {total} byte buffer",
                lens[src], displs[src]
            )));
        }
        let futs = (0..lens.len()).map(|_| OneShot::new_arc()).collect();
        Ok(Arc::new(GatherSink {
            buf: Mutex::new(vec![0u8; total]),
            displs,
            lens,
            futs,
        }))
    }

    /// Copy the block from `src` into place and release that source's future.
    pub(crate) fn accept(&self, src: usize, payload: &[u8]) -> Result<()> {
        let res = self.place(src, payload);
        self.signal(src, res.clone())?;
        res
    }

    fn place(&self, src: usize, payload: &[u8]) -> Result<()> {
        let (displ, len) = match (self.displs.get(src), self.lens.get(src)) {
            (Some(d), Some(l)) => (*d, *l),
            _ => {
                return Err(Error::InvalidRank {
                    rank: src,
                    size: self.lens.len(),
                })
            }
        };
        if payload.len() > len {
            return Err(Error::Truncated {
                incoming: payload.len(),
                capacity: len,
            });
        }
        let mut buf = self.buf.lock();
        let available = buf.len().saturating_sub(displ);
        match buf.get_mut(displ..displ + payload.len()) {
            Some(block) => {
                block.copy_from_slice(payload);
                Ok(())
            }
            // the buffer is gone once the root has taken it
            None => Err(Error::Truncated {
                incoming: payload.len(),
                capacity: available,
            }),
        }
    }

    fn signal(&self, src: usize, res: Result<()>) -> Result<()> {
        match self.futs.get(src) {
            Some(fut) => fut.set(res).map_err(|_| Error::Recording {
                trans_num: src as u64,
                reason: format!("duplicate block from rank {src}"),
            }),
            None => Err(Error::InvalidRank {
                rank: src,
                size: self.futs.len(),
            }),
        }
    }

    /// Futures of every source that contributes a non-empty block.
    pub(crate) fn expected(&self) -> Vec<Signal> {
        self.lens
            .iter()
            .zip(self.futs.iter())
            .filter(|(len, _)| **len > 0)
            .map(|(_, fut)| fut.clone())
            .collect()
    }

    pub(crate) fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.lock())
    }
}

/// Accumulator folding one contribution per source with a reduction operator.
#[derive(Debug)]
pub(crate) struct ReduceSink {
    acc: Mutex<Option<Vec<u8>>>,
    len: usize,
    kind: DatatypeKind,
    op: ReduceOp,
    futs: Vec<Signal>,
}

impl ReduceSink {
    pub(crate) fn new(len: usize, kind: DatatypeKind, op: ReduceOp, sources: usize) -> Arc<ReduceSink> {
        Arc::new(ReduceSink {
            acc: Mutex::new(None),
            len,
            kind,
            op,
            futs: (0..sources).map(|_| OneShot::new_arc()).collect(),
        })
    }

    /// Fold the contribution from `src` into the accumulator and release that source's future.
    pub(crate) fn accept(&self, src: usize, payload: &[u8]) -> Result<()> {
        let res = self.fold_in(payload);
        match self.futs.get(src) {
            Some(fut) => {
                if fut.set(res.clone()).is_err() {
                    return Err(Error::Recording {
                        trans_num: src as u64,
                        reason: format!("duplicate contribution from rank {src}"),
                    });
                }
            }
            None => {
                return Err(Error::InvalidRank {
                    rank: src,
                    size: self.futs.len(),
                })
            }
        }
        res
    }

    fn fold_in(&self, payload: &[u8]) -> Result<()> {
        if payload.len() != self.len {
            return Err(Error::InvalidArgument(format!(
                "contribution of {} bytes to a {} byte reduction",
                payload.len(),
                self.len
            )));
        }
        let mut acc = self.acc.lock();
        match acc.as_mut() {
            None => {
                *acc = Some(payload.to_vec());
                Ok(())
            }
            Some(acc) => fold(self.op, self.kind, acc, payload),
        }
    }

    pub(crate) fn futs(&self) -> &[Signal] {
        &self.futs
    }

    pub(crate) fn take(&self) -> Option<Vec<u8>> {
        self.acc.lock().take()
    }
}

/// What the user side leaves for the handler to act on.
#[derive(Debug, Clone)]
pub(crate) enum Deposit {
    Buffer(Arc<BufferSink>),
    Gather(Arc<GatherSink>),
    Reduce(Arc<ReduceSink>),
}

#[derive(Debug)]
struct TransactionEntry {
    trans_num: u64,
    nicside: Arc<OneShot<Deposit>>,
    userside: Signal,
}

impl TransactionEntry {
    fn new(trans_num: u64) -> TransactionEntry {
        TransactionEntry {
            trans_num,
            nicside: OneShot::new_arc(),
            userside: OneShot::new_arc(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct TransactionDict {
    userside_count: AtomicU64,
    nicside_count: AtomicU64,
    // None marks a free (completed or never used) slot
    slots: Mutex<Vec<Option<TransactionEntry>>>,
}

impl TransactionDict {
    pub(crate) fn new(capacity: usize) -> TransactionDict {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(1), || None);
        TransactionDict {
            userside_count: AtomicU64::new(0),
            nicside_count: AtomicU64::new(0),
            slots: Mutex::new(slots),
        }
    }

    pub(crate) fn inc_userside_count(&self) -> u64 {
        self.userside_count.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn inc_nicside_count(&self) -> u64 {
        self.nicside_count.fetch_add(1, Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn live(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    fn find(slots: &[Option<TransactionEntry>], trans_num: u64) -> Option<usize> {
        slots
            .iter()
            .position(|s| matches!(s, Some(e) if e.trans_num == trans_num))
    }

    fn find_or_create(slots: &mut Vec<Option<TransactionEntry>>, trans_num: u64) -> usize {
        if let Some(idx) = Self::find(slots, trans_num) {
            return idx;
        }
        let idx = match slots.iter().position(|s| s.is_none()) {
            Some(idx) => idx,
            None => {
                let idx = slots.len();
                trace!("transaction dictionary full, growing {} -> {}", idx, idx * 2);
                slots.resize_with(idx * 2, || None);
                idx
            }
        };
        slots[idx] = Some(TransactionEntry::new(trans_num));
        idx
    }

    /// Deposit `deposit` for transaction `trans_num` and get the future the handler will release.
    pub(crate) fn userside_record(&self, trans_num: u64, deposit: Deposit) -> Result<Signal> {
        let mut slots = self.slots.lock();
        let idx = Self::find_or_create(&mut slots, trans_num);
        match &slots[idx] {
            Some(entry) => {
                if entry.nicside.set(deposit).is_err() {
                    return Err(Error::Recording {
                        trans_num,
                        reason: "user side already recorded".to_string(),
                    });
                }
                Ok(entry.userside.clone())
            }
            None => Err(Error::Recording {
                trans_num,
                reason: "no slot available".to_string(),
            }),
        }
    }

    /// Get `(userside, nicside)` for `trans_num`, creating the entry if the user side has not arrived yet.
    pub(crate) fn nicside_record(&self, trans_num: u64) -> Result<(Signal, Arc<OneShot<Deposit>>)> {
        let mut slots = self.slots.lock();
        let idx = Self::find_or_create(&mut slots, trans_num);
        match &slots[idx] {
            Some(entry) => Ok((entry.userside.clone(), entry.nicside.clone())),
            None => Err(Error::Recording {
                trans_num,
                reason: "no slot available".to_string(),
            }),
        }
    }

    /// Free the live entry for `trans_num`.
    pub(crate) fn complete(&self, trans_num: u64) -> Result<()> {
        let mut slots = self.slots.lock();
        match Self::find(&slots, trans_num) {
            Some(idx) => {
                slots[idx] = None;
                Ok(())
            }
            None => Err(Error::Completing(trans_num)),
        }
    }

    #[cfg(test)]
    pub(crate) fn nicside_future(&self, trans_num: u64) -> Option<Arc<OneShot<Deposit>>> {
        let slots = self.slots.lock();
        Self::find(&slots, trans_num).and_then(|idx| slots[idx].as_ref().map(|e| e.nicside.clone()))
    }

    #[cfg(test)]
    pub(crate) fn userside_future(&self, trans_num: u64) -> Option<Signal> {
        let slots = self.slots.lock();
        Self::find(&slots, trans_num).and_then(|idx| slots[idx].as_ref().map(|e| e.userside.clone()))
    }
}
