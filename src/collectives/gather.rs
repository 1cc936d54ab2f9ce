use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::op_dict::OpKind;
use crate::transaction_dict::{Deposit, GatherSink};
use crate::world::Comm;

impl Comm {
    /// Gather equal blocks from every rank into `recvbuf` on `root`.
    ///
    /// Rank `i`'s block lands at element `i * sendbuf.len()`. `recvbuf` is
    /// only touched on the root.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn gather<T: Datatype>(&self, sendbuf: &[T], recvbuf: &mut [T], root: usize) -> Result<()> {
        let dict = self.inner.dict(OpKind::Gather)?;
        let trans_num = dict.inc_userside_count();
        let root = self.check_root(root)?;
        let count = sendbuf.len();
        if count == 0 {
            return Ok(());
        }
        let size = self.size();
        let sink = if self.rank() == root {
            if recvbuf.len() < count * size {
                return Err(Error::InvalidArgument(format!(
                    "gather of {count} elements from {size} ranks into a {} element buffer",
                    recvbuf.len()
                )));
            }
            let block = count * T::SIZE;
            let sink = GatherSink::new(
                block * size,
                (0..size).map(|i| i * block).collect(),
                vec![block; size],
            )?;
            dict.userside_record(trans_num, Deposit::Gather(sink.clone()))?;
            Some(sink)
        } else {
            None
        };
        self.send_collective(root, OpKind::Gather, trans_num, &T::slice_to_bytes(sendbuf))?;
        if let Some(sink) = sink {
            let res = self.await_all(sink.expected()).await;
            dict.complete(trans_num)?;
            res?;
            T::copy_from_bytes(&sink.take(), recvbuf);
        }
        Ok(())
    }
}
