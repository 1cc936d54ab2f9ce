//! Outstanding point-to-point requests and the per-rank table that numbers them.

use crate::datatype::{type_size, Datatype, DatatypeKind};
use crate::error::{Error, Result};
use crate::oneshot::OneShot;

use std::sync::Arc;
use tracing::trace;

/// Which sender a receive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Any,
    Rank(usize),
}

impl From<usize> for Source {
    fn from(rank: usize) -> Self {
        Source::Rank(rank)
    }
}

/// Which tag a receive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Any,
    Value(i32),
}

impl From<i32> for Tag {
    fn from(tag: i32) -> Self {
        Tag::Value(tag)
    }
}

impl Tag {
    pub fn matches(&self, tag: i32) -> bool {
        match self {
            Tag::Any => true,
            Tag::Value(t) => *t == tag,
        }
    }
}

/// Handle to a posted request; number 0 is the null request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub(crate) usize);

impl RequestId {
    pub const NULL: RequestId = RequestId(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    pub fn number(&self) -> usize {
        self.0
    }
}

/// Completion record of a point-to-point operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub source: Option<usize>,
    pub tag: Option<i32>,
    /// elements received (or sent)
    pub count: usize,
    data: Arc<Vec<u8>>,
    kind: Option<DatatypeKind>,
}

impl Status {
    pub(crate) fn empty() -> Status {
        Status {
            source: None,
            tag: None,
            count: 0,
            data: Arc::new(Vec::new()),
            kind: None,
        }
    }

    pub(crate) fn sent(dest: usize, tag: i32, count: usize) -> Status {
        Status {
            source: Some(dest),
            tag: Some(tag),
            count,
            data: Arc::new(Vec::new()),
            kind: None,
        }
    }

    pub(crate) fn received(source: usize, tag: i32, kind: DatatypeKind, data: Vec<u8>) -> Status {
        Status {
            source: Some(source),
            tag: Some(tag),
            count: data.len() / type_size(kind),
            data: Arc::new(data),
            kind: Some(kind),
        }
    }

    /// Raw payload bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn check_kind<T: Datatype>(&self) -> Result<()> {
        match self.kind {
            Some(kind) if kind != T::KIND => Err(Error::InvalidArgument(format!(
                "message holds {kind:?} elements, not {:?}",
                T::KIND
            ))),
            _ => Ok(()),
        }
    }

    /// Copy the received elements into the front of `buf`.
    pub fn copy_into<T: Datatype>(&self, buf: &mut [T]) -> Result<usize> {
        self.check_kind::<T>()?;
        if buf.len() < self.count {
            return Err(Error::Truncated {
                incoming: self.data.len(),
                capacity: buf.len() * T::SIZE,
            });
        }
        Ok(T::copy_from_bytes(&self.data, buf))
    }

    pub fn to_vec<T: Datatype>(&self) -> Result<Vec<T>> {
        self.check_kind::<T>()?;
        Ok(T::vec_from_bytes(&self.data))
    }
}

/// A posted receive (or an already-finished send).
#[derive(Debug)]
pub(crate) struct Request {
    pub(crate) number: usize,
    pub(crate) source: Source,
    pub(crate) tag: Tag,
    pub(crate) kind: DatatypeKind,
    capacity: usize,
    pub(crate) done: Arc<OneShot<Result<Status>>>,
}

impl Request {
    pub(crate) fn recv(number: usize, source: Source, tag: Tag, kind: DatatypeKind, count: usize) -> Request {
        Request {
            number,
            source,
            tag,
            kind,
            capacity: count * type_size(kind),
            done: OneShot::new_arc(),
        }
    }

    pub(crate) fn send(number: usize, dest: usize, tag: i32, kind: DatatypeKind, count: usize) -> Request {
        let req = Request::recv(number, Source::Rank(dest), Tag::Value(tag), kind, count);
        let _ = req.done.set(Ok(Status::sent(dest, tag, count)));
        req
    }

    /// Hand the matched payload to the request and release its waiter.
    pub(crate) fn fill(&self, source: usize, tag: i32, payload: Vec<u8>) {
        let res = if payload.len() > self.capacity {
            Err(Error::Truncated {
                incoming: payload.len(),
                capacity: self.capacity,
            })
        } else {
            Ok(Status::received(source, tag, self.kind, payload))
        };
        if self.done.set(res).is_err() {
            tracing::error!("request {} filled twice", self.number);
        }
    }
}

/// Growable table of active requests; slot 0 is never handed out.
#[derive(Debug)]
pub(crate) struct RequestTable {
    slots: Vec<Option<Arc<Request>>>,
}

impl RequestTable {
    pub(crate) fn new(capacity: usize) -> RequestTable {
        let mut slots = Vec::new();
        slots.resize_with(capacity.max(2), || None);
        RequestTable { slots }
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Place the request built by `make` into the first free slot, doubling the table if it is full.
    pub(crate) fn alloc(&mut self, make: impl FnOnce(usize) -> Request) -> Arc<Request> {
        let number = match self.slots.iter().skip(1).position(|s| s.is_none()) {
            Some(i) => i + 1,
            None => {
                let n = self.slots.len();
                trace!("request table full, growing {} -> {}", n, n * 2);
                self.slots.resize_with(n * 2, || None);
                n
            }
        };
        let req = Arc::new(make(number));
        self.slots[number] = Some(req.clone());
        req
    }

    pub(crate) fn get(&self, id: RequestId) -> Result<Arc<Request>> {
        match self.slots.get(id.0) {
            Some(Some(req)) if !id.is_null() => Ok(req.clone()),
            _ => Err(Error::InvalidRequest(id.0)),
        }
    }

    pub(crate) fn free(&mut self, id: RequestId) -> Result<()> {
        if id.is_null() {
            return Err(Error::InvalidRequest(id.0));
        }
        match self.slots.get_mut(id.0) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(Error::InvalidRequest(id.0)),
        }
    }
}
