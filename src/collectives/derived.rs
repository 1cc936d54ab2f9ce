//! Collectives composed from the primitive ones.

use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::op::ReduceOp;
use crate::world::Comm;

impl Comm {
    /// Gather every rank's block onto every rank, one gather per root.
    pub async fn allgather<T: Datatype>(&self, sendbuf: &[T], recvbuf: &mut [T]) -> Result<()> {
        for root in 0..self.size() {
            if root == self.rank() {
                self.gather(sendbuf, recvbuf, root).await?;
            } else {
                self.gather(sendbuf, &mut [], root).await?;
            }
        }
        Ok(())
    }

    /// Variable-sized [Comm::allgather].
    pub async fn allgatherv<T: Datatype>(
        &self,
        sendbuf: &[T],
        recvbuf: &mut [T],
        counts: &[usize],
        displs: &[usize],
    ) -> Result<()> {
        for root in 0..self.size() {
            if root == self.rank() {
                self.gatherv(sendbuf, recvbuf, counts, displs, root).await?;
            } else {
                self.gatherv(sendbuf, &mut [], counts, displs, root).await?;
            }
        }
        Ok(())
    }

    /// Reduce onto the highest rank, then broadcast the result from it.
    pub async fn allreduce<T: Datatype>(&self, sendbuf: &[T], recvbuf: &mut [T], op: ReduceOp) -> Result<()> {
        if recvbuf.len() != sendbuf.len() {
            return Err(Error::InvalidArgument(format!(
                "allreduce of {} elements into a {} element buffer",
                sendbuf.len(),
                recvbuf.len()
            )));
        }
        let root = self.size() - 1;
        self.reduce(sendbuf, recvbuf, op, root).await?;
        self.bcast(recvbuf, root).await
    }

    /// Wait until every rank of the communicator has reached the barrier.
    pub async fn barrier(&self) -> Result<()> {
        let mut out = [0i32];
        self.allreduce(&[0i32], &mut out, ReduceOp::Sum).await
    }
}
