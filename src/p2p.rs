//! Arrived-but-unmatched point-to-point messages for one (source, destination) pair.
//!
//! Senders number their messages to a peer from a per-pair counter. The
//! receiving side keeps arrivals in a B-tree keyed by that number together
//! with `next_matchable`, the lowest number that has not yet arrived. Only
//! messages numbered below it may match, so a later message can never
//! overtake an earlier one that is still in flight.

use crate::oneshot::OneShot;
use crate::request::Request;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct Message {
    pub(crate) source: usize,
    pub(crate) tag: i32,
    pub(crate) trans_num: u64,
    /// set with the matching request once one is found
    pub(crate) matched: Arc<OneShot<Arc<Request>>>,
}

#[derive(Debug, Default)]
struct Arrivals {
    queued: BTreeMap<u64, Message>,
    next_matchable: u64,
}

#[derive(Debug, Default)]
pub(crate) struct P2pList {
    send_count: AtomicU64,
    arrivals: Mutex<Arrivals>,
}

impl P2pList {
    pub(crate) fn new() -> P2pList {
        P2pList::default()
    }

    pub(crate) fn inc_send_count(&self) -> u64 {
        self.send_count.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn append(&self, msg: Message) {
        let mut arrivals = self.arrivals.lock();
        let trans_num = msg.trans_num;
        if arrivals.queued.insert(trans_num, msg).is_some() {
            tracing::error!("duplicate point-to-point transaction {trans_num}");
        }
        while arrivals.queued.contains_key(&arrivals.next_matchable) {
            arrivals.next_matchable += 1;
        }
    }

    /// Match `req` against the contiguous prefix of arrivals, oldest first.
    pub(crate) fn try_fulfill(&self, req: &Arc<Request>) -> bool {
        let mut arrivals = self.arrivals.lock();
        if arrivals.queued.is_empty() {
            return false;
        }
        let next = arrivals.next_matchable;
        let found = arrivals
            .queued
            .range(..next)
            .find(|(_, msg)| req.tag.matches(msg.tag))
            .map(|(num, _)| *num);
        match found.and_then(|num| arrivals.queued.remove(&num)) {
            Some(msg) => {
                if msg.matched.set(req.clone()).is_err() {
                    tracing::error!("message {} matched twice", msg.trans_num);
                }
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.arrivals.lock().queued.len()
    }

    #[cfg(test)]
    pub(crate) fn next_matchable(&self) -> u64 {
        self.arrivals.lock().next_matchable
    }
}
