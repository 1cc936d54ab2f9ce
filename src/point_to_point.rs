//! Point-to-point operations on a [Comm].
//!
//! Sends are eager: the payload travels immediately and waits in the
//! destination's arrival list until a receive matches it. The arrival
//! handler then hands the payload to the matched request.

use crate::communicator::Communicator;
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::fabric::{decode, Action, HandlerFuture, P2pHeader};
use crate::locality::Locality;
use crate::oneshot::OneShot;
use crate::p2p::Message;
use crate::request::{Request, RequestId, Source, Status, Tag};
use crate::world::Comm;

use futures::FutureExt;
use std::sync::Arc;
use tracing::trace;

impl Comm {
    fn send_bytes(&self, payload: &[u8], dest: usize, tag: i32, completion: u64) -> Result<()> {
        let dest = self.inner.check_rank(dest)?;
        let trans_num = self.inner.peer(dest)?.inc_send_count();
        let header = P2pHeader {
            source_rank: self.rank(),
            dest_rank: dest,
            comm_id: self.id(),
            tag,
            trans_num,
            payload_size: payload.len(),
            completion,
        };
        trace!("rank {} send #{trans_num} tag {tag} -> {dest}", self.rank());
        self.locality
            .send_to_rank(dest, Action::SendRemote, &header, payload)
    }

    /// Send `buf` to `dest`; returns once the payload is on its way.
    pub fn send<T: Datatype>(&self, buf: &[T], dest: usize, tag: i32) -> Result<()> {
        self.send_bytes(&T::slice_to_bytes(buf), dest, tag, 0)
    }

    /// Nonblocking send; the returned request is already complete.
    pub fn isend<T: Datatype>(&self, buf: &[T], dest: usize, tag: i32) -> Result<RequestId> {
        let dest = self.inner.check_rank(dest)?;
        let req = self
            .record
            .requests
            .lock()
            .alloc(|n| Request::send(n, dest, tag, T::KIND, buf.len()));
        self.send_bytes(&T::slice_to_bytes(buf), dest, tag, req.number as u64)?;
        Ok(RequestId(req.number))
    }

    /// Post a receive for up to `count` elements.
    pub fn irecv<T: Datatype>(
        &self,
        count: usize,
        source: impl Into<Source>,
        tag: impl Into<Tag>,
    ) -> Result<RequestId> {
        let source = source.into();
        if let Source::Rank(src) = source {
            self.inner.check_rank(src)?;
        }
        let tag = tag.into();
        let req = self
            .record
            .requests
            .lock()
            .alloc(|n| Request::recv(n, source, tag, T::KIND, count));
        let id = RequestId(req.number);
        self.inner.post(req);
        Ok(id)
    }

    /// Wait for `request` to finish, releasing it and resetting the handle to [RequestId::NULL].
    pub async fn wait(&self, request: &mut RequestId) -> Result<Status> {
        if request.is_null() {
            return Ok(Status::empty());
        }
        let req = self.record.requests.lock().get(*request)?;
        self.inner.progress();
        let waited = req.done.wait(self.timeout()).await;
        let res = settle(&self.inner, &req, waited).await;
        self.record.requests.lock().free(*request)?;
        *request = RequestId::NULL;
        res
    }

    /// Wait for every request in `requests`, in order.
    pub async fn waitall(&self, requests: &mut [RequestId]) -> Result<Vec<Status>> {
        let mut statuses = Vec::with_capacity(requests.len());
        let mut first_err = None;
        for request in requests.iter_mut() {
            match self.wait(request).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                    statuses.push(Status::empty());
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(statuses),
        }
    }

    /// Blocking receive into `buf`.
    pub async fn recv<T: Datatype>(
        &self,
        buf: &mut [T],
        source: impl Into<Source>,
        tag: impl Into<Tag>,
    ) -> Result<Status> {
        let mut request = self.irecv::<T>(buf.len(), source, tag)?;
        let status = self.wait(&mut request).await?;
        status.copy_into(buf)?;
        Ok(status)
    }
}

// A timed out request only fails if it can still be withdrawn from the
// pending queue. Once matched, its payload is already on the way.
async fn settle(comm: &Communicator, req: &Request, waited: Result<Result<Status>>) -> Result<Status> {
    match waited {
        Ok(res) => res,
        Err(e) if comm.cancel(req.number) || comm.is_destroyed() => Err(e),
        Err(_) => req.done.get().await,
    }
}

pub(crate) fn send_remote_handler(locality: Arc<Locality>, data: Vec<u8>) -> HandlerFuture {
    async move {
        let (header, payload): (P2pHeader, _) = decode(&data)?;
        let comm = locality.comm(header.dest_rank, header.comm_id)?;
        let matched = OneShot::new_arc();
        comm.deliver(Message {
            source: header.source_rank,
            tag: header.tag,
            trans_num: header.trans_num,
            matched: matched.clone(),
        })?;
        // a message may legitimately sit unmatched for as long as the program likes
        let req = matched.get().await;
        trace!(
            "rank {} matched #{} from {} to request {}",
            header.dest_rank,
            header.trans_num,
            header.source_rank,
            req.number
        );
        if req.done.is_set() {
            return Err(Error::InvalidRequest(req.number));
        }
        req.fill(header.source_rank, header.tag, payload);
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator::CommConfig;
    use crate::datatype::DatatypeKind;
    use crate::scheduler::{create_scheduler, Scheduler, SchedulerQueue, SchedulerStatus, SchedulerType};
    use std::sync::atomic::AtomicU8;
    use std::time::Duration;

    fn scheduler() -> Scheduler {
        create_scheduler(
            SchedulerType::WorkStealing,
            1,
            false,
            Arc::new(AtomicU8::new(SchedulerStatus::Active as u8)),
        )
    }

    fn receive(number: usize) -> Arc<Request> {
        Arc::new(Request::recv(number, Source::Rank(0), Tag::Any, DatatypeKind::UInt8, 8))
    }

    #[test]
    fn matched_request_outlives_its_deadline() {
        let sched = scheduler();
        let comm = Communicator::create(0, 2, 1, &CommConfig::default(), &sched).unwrap();
        let req = receive(1);
        comm.post(req.clone());
        let matched = OneShot::new_arc();
        comm.deliver(Message {
            source: 0,
            tag: 3,
            trans_num: 0,
            matched: matched.clone(),
        })
        .unwrap();
        assert_eq!(matched.try_get().map(|r| r.number), Some(1));

        let filler = {
            let req = req.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                req.fill(0, 3, vec![1, 2]);
            })
        };
        let res = futures::executor::block_on(settle(&comm, &req, Err(Error::Timeout(0.1))));
        filler.join().unwrap();
        let status = res.unwrap();
        assert_eq!(status.source, Some(0));
        assert_eq!(status.count, 2);
        sched.shutdown();
    }

    #[test]
    fn pending_request_times_out() {
        let sched = scheduler();
        let comm = Communicator::create(0, 2, 1, &CommConfig::default(), &sched).unwrap();
        let req = receive(1);
        comm.post(req.clone());
        let res = futures::executor::block_on(settle(&comm, &req, Err(Error::Timeout(0.1))));
        assert!(matches!(res, Err(Error::Timeout(_))));
        assert_eq!(comm.pending(), 0);
        sched.shutdown();
    }
}
