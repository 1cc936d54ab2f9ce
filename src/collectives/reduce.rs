use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::op::ReduceOp;
use crate::op_dict::OpKind;
use crate::transaction_dict::{Deposit, ReduceSink};
use crate::world::Comm;

use tracing::trace;

impl Comm {
    /// Combine `sendbuf` from every rank element-wise with `op` into `recvbuf` on `root`.
    ///
    /// An operator that is not defined for `T` fails on every rank before
    /// anything is sent.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn reduce<T: Datatype>(
        &self,
        sendbuf: &[T],
        recvbuf: &mut [T],
        op: ReduceOp,
        root: usize,
    ) -> Result<()> {
        let dict = self.inner.dict(OpKind::Reduce)?;
        let trans_num = dict.inc_userside_count();
        op.check(T::KIND)?;
        let root = self.check_root(root)?;
        let count = sendbuf.len();
        if count == 0 {
            return Ok(());
        }
        let sink = if self.rank() == root {
            if recvbuf.len() < count {
                return Err(Error::InvalidArgument(format!(
                    "reduction of {count} elements into a {} element buffer",
                    recvbuf.len()
                )));
            }
            let sink = ReduceSink::new(count * T::SIZE, T::KIND, op, self.size());
            dict.userside_record(trans_num, Deposit::Reduce(sink.clone()))?;
            Some(sink)
        } else {
            None
        };
        self.send_collective(root, OpKind::Reduce, trans_num, &T::slice_to_bytes(sendbuf))?;
        if let Some(sink) = sink {
            let res = self.await_all(sink.futs().to_vec()).await;
            dict.complete(trans_num)?;
            res?;
            let acc = sink
                .take()
                .ok_or_else(|| Error::Generic(format!("reduce #{trans_num} ended without contributions")))?;
            trace!("reduce #{trans_num} {op:?} folded {} contributions", self.size());
            T::copy_from_bytes(&acc, recvbuf);
        }
        Ok(())
    }
}
