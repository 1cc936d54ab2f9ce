//! ammpi provides message-passing semantics (ranks, communicators, point-to-point sends and receives, and collective operations) on top of a lightweight-task active-message runtime.
//!
//! The runtime underneath knows nothing about ranks or ordered delivery: it can only run tasks and deliver a byte payload to a handler on some locality.
//! ammpi bridges the two with two pieces:
//! - a per-communicator, per-operation transaction dictionary that pairs a locally initiated call with the remote handler of the same transaction exactly once, whatever order they arrive in;
//! - a point-to-point matching engine that keeps delivery between any pair of ranks first-in first-out, even though parcels can arrive out of order.
//!
//! A world is made of localities (nodes), each hosting several ranks; every rank is a lightweight task on a shared work-stealing scheduler.
//! Parcels move between localities through a fabric; currently the only fabric is an in-process one ("local").
//!
//! EXAMPLES
//! --------
//!
//! # Point-to-point ring
//! ```
//! use ammpi::{MpiWorldBuilder, Source, Tag};
//!
//! fn main() {
//!     let world = MpiWorldBuilder::new().with_localities(2).with_ranks(4).build();
//!     let received = world.run(|env| async move {
//!         let mpi = env.init().await?;
//!         let comm = mpi.world()?;
//!         let next = (comm.rank() + 1) % comm.size();
//!         let prev = (comm.rank() + comm.size() - 1) % comm.size();
//!         comm.send(&[comm.rank() as u64], next, 7)?;
//!         let mut buf = [0u64];
//!         comm.recv(&mut buf, Source::Rank(prev), Tag::Value(7)).await?;
//!         mpi.finalize().await?;
//!         Ok::<_, ammpi::Error>(buf[0])
//!     });
//!     assert_eq!(received[0].as_ref().unwrap(), &3);
//! }
//! ```
//!
//! # Collectives
//! ```
//! use ammpi::{MpiWorldBuilder, ReduceOp};
//!
//! fn main() {
//!     let world = MpiWorldBuilder::new().with_ranks_per_node(3).build();
//!     world.run(|env| async move {
//!         let mpi = env.init().await?;
//!         let comm = mpi.world()?;
//!         let mut data = [0.0f64; 8];
//!         if comm.rank() == 0 {
//!             data.iter_mut().enumerate().for_each(|(i, d)| *d = i as f64);
//!         }
//!         comm.bcast(&mut data, 0).await?;
//!         let mut max = [0.0f64];
//!         comm.reduce(&[data[comm.rank()]], &mut max, ReduceOp::Max, 0).await?;
//!         mpi.finalize().await
//!     });
//! }
//! ```

#[macro_use]
extern crate lazy_static;

mod arch;
mod collectives;
mod communicator;
pub mod datatype;
mod env_var;
pub mod error;
mod fabric;
mod locality;
mod oneshot;
pub mod op;
mod op_dict;
mod p2p;
mod point_to_point;
mod rank;
pub mod request;
mod scheduler;
mod transaction_dict;
mod world;

pub use crate::arch::{decide_ranks_per_node, IdError, RankMap};
pub use crate::datatype::{type_size, Datatype, DatatypeKind, Logical, ValueIndex};
pub use crate::env_var::{config, Config};
pub use crate::error::{status_code, Error, ErrorCode, Result};
pub use crate::fabric::Backend;
pub use crate::op::ReduceOp;
pub use crate::request::{RequestId, Source, Status, Tag};
pub use crate::scheduler::{SchedulerType, TaskId};
pub use crate::world::{Comm, Mpi, MpiWorld, MpiWorldBuilder, RankEnv};

#[doc(hidden)]
pub fn serialize<T: ?Sized>(obj: &T) -> std::result::Result<Vec<u8>, anyhow::Error>
where
    T: serde::Serialize,
{
    Ok(bincode::serialize(obj)?)
}

#[doc(hidden)]
pub fn deserialize<'a, T>(bytes: &'a [u8]) -> std::result::Result<T, anyhow::Error>
where
    T: serde::Deserialize<'a>,
{
    Ok(bincode::deserialize(bytes)?)
}
