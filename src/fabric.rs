//! Active-message transport between localities.
//!
//! A parcel is an [Action] plus a bincode-encoded envelope: a typed header
//! followed by raw element bytes. On arrival the fabric looks the action up
//! in the handler table and runs the handler as its own task on the
//! destination locality. No ordering between parcels is promised.

use crate::error::{Error, Result};
use crate::locality::Locality;
use crate::op_dict::OpKind;
use crate::scheduler::Scheduler;

use enum_dispatch::enum_dispatch;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) mod local_fabric;
use local_fabric::LocalFabric;

pub(crate) type HandlerFuture = BoxFuture<'static, Result<()>>;
pub(crate) type Handler = fn(Arc<Locality>, Vec<u8>) -> HandlerFuture;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Action {
    MarkRankInited,
    SendRemote,
    Bcast,
    Scatterv,
    Gather,
    Gatherv,
    Alltoall,
    Alltoallv,
    Reduce,
}

impl From<OpKind> for Action {
    fn from(kind: OpKind) -> Self {
        match kind {
            OpKind::Bcast => Action::Bcast,
            OpKind::Scatterv => Action::Scatterv,
            OpKind::Gather => Action::Gather,
            OpKind::Gatherv => Action::Gatherv,
            OpKind::Alltoall => Action::Alltoall,
            OpKind::Alltoallv => Action::Alltoallv,
            OpKind::Reduce => Action::Reduce,
        }
    }
}

lazy_static! {
    static ref HANDLERS: HashMap<Action, Handler> = {
        let mut handlers: HashMap<Action, Handler> = HashMap::new();
        handlers.insert(Action::MarkRankInited, crate::locality::mark_rank_inited_handler);
        handlers.insert(Action::SendRemote, crate::point_to_point::send_remote_handler);
        handlers.insert(Action::Bcast, crate::collectives::buffer_handler);
        handlers.insert(Action::Scatterv, crate::collectives::buffer_handler);
        handlers.insert(Action::Gather, crate::collectives::gather_handler);
        handlers.insert(Action::Gatherv, crate::collectives::gather_handler);
        handlers.insert(Action::Alltoall, crate::collectives::gather_handler);
        handlers.insert(Action::Alltoallv, crate::collectives::gather_handler);
        handlers.insert(Action::Reduce, crate::collectives::reduce_handler);
        handlers
    };
}

pub(crate) fn handler(action: Action) -> Result<Handler> {
    HANDLERS
        .get(&action)
        .copied()
        .ok_or_else(|| Error::Generic(format!("no handler registered for {action:?}")))
}

pub(crate) trait Header {
    fn payload_size(&self) -> usize;
}

/// Header of every collective parcel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct CollectiveHeader {
    pub(crate) source_rank: usize,
    pub(crate) dest_rank: usize,
    pub(crate) comm_id: usize,
    pub(crate) op: OpKind,
    pub(crate) trans_num: u64,
    pub(crate) payload_size: usize,
}

impl Header for CollectiveHeader {
    fn payload_size(&self) -> usize {
        self.payload_size
    }
}

/// Header of a point-to-point parcel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct P2pHeader {
    pub(crate) source_rank: usize,
    pub(crate) dest_rank: usize,
    pub(crate) comm_id: usize,
    pub(crate) tag: i32,
    pub(crate) trans_num: u64,
    pub(crate) payload_size: usize,
    /// sender-side request number, meaningless on the receiver
    pub(crate) completion: u64,
}

impl Header for P2pHeader {
    fn payload_size(&self) -> usize {
        self.payload_size
    }
}

/// Announces that `rank` finished initialization.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct InitHeader {
    pub(crate) rank: usize,
}

impl Header for InitHeader {
    fn payload_size(&self) -> usize {
        0
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, H> {
    header: &'a H,
    #[serde(with = "serde_bytes")]
    payload: &'a [u8],
}

#[derive(Deserialize)]
struct Envelope<H> {
    header: H,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
}

pub(crate) fn encode<H: Serialize>(header: &H, payload: &[u8]) -> Result<Vec<u8>> {
    Ok(crate::serialize(&EnvelopeRef { header, payload })?)
}

pub(crate) fn decode<H: Header + DeserializeOwned>(data: &[u8]) -> Result<(H, Vec<u8>)> {
    let envelope: Envelope<H> = crate::deserialize(data)?;
    if envelope.header.payload_size() != envelope.payload.len() {
        return Err(Error::Codec(format!(
            "header announces {} payload bytes, parcel carries {}",
            envelope.header.payload_size(),
            envelope.payload.len()
        )));
    }
    Ok((envelope.header, envelope.payload))
}

/// The list of available fabric backends, used to specify how parcels move between localities
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum Backend {
    /// In-process localities sharing one scheduler
    #[default]
    Local,
}

#[enum_dispatch]
pub(crate) trait FabricComm {
    fn num_localities(&self) -> usize;
    /// Make `localities` reachable; index = locality id.
    fn attach(&self, localities: Vec<Arc<Locality>>);
    /// Deliver `data` to `dest` and run the handler registered for `action` there.
    fn send(&self, dest: usize, action: Action, data: Vec<u8>) -> Result<()>;
    fn bytes_sent(&self) -> usize;
    fn backend(&self) -> Backend;
    fn shutdown(&self);
}

#[enum_dispatch(FabricComm)]
#[derive(Debug)]
pub(crate) enum Fabric {
    LocalFabric,
}

pub(crate) fn create_fabric(
    backend: Backend,
    num_localities: usize,
    scheduler: Arc<Scheduler>,
) -> Fabric {
    match backend {
        Backend::Local => Fabric::LocalFabric(LocalFabric::new(num_localities, scheduler)),
    }
}
