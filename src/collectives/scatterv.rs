use crate::collectives::check_layout;
use crate::datatype::Datatype;
use crate::error::Result;
use crate::op_dict::OpKind;
use crate::transaction_dict::{BufferSink, Deposit};
use crate::world::Comm;

impl Comm {
    /// Scatter variable-sized blocks of `sendbuf` from `root`.
    ///
    /// Rank `i` receives `counts[i]` elements starting at `displs[i]`;
    /// `recvbuf.len()` is the number of elements this rank expects. The send
    /// arguments are only read on the root.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn scatterv<T: Datatype>(
        &self,
        sendbuf: &[T],
        counts: &[usize],
        displs: &[usize],
        recvbuf: &mut [T],
        root: usize,
    ) -> Result<()> {
        let dict = self.inner.dict(OpKind::Scatterv)?;
        let trans_num = dict.inc_userside_count();
        let root = self.check_root(root)?;
        if self.rank() == root {
            check_layout(counts, displs, self.size(), sendbuf.len())?;
        }
        let done = if recvbuf.is_empty() {
            None
        } else {
            let sink = BufferSink::new(recvbuf.len() * T::SIZE);
            let done = dict.userside_record(trans_num, Deposit::Buffer(sink.clone()))?;
            Some((sink, done))
        };
        if self.rank() == root {
            for dest in 0..self.size() {
                if counts[dest] == 0 {
                    continue;
                }
                let block = &sendbuf[displs[dest]..displs[dest] + counts[dest]];
                self.send_collective(dest, OpKind::Scatterv, trans_num, &T::slice_to_bytes(block))?;
            }
        }
        if let Some((sink, done)) = done {
            let res = self.await_signal(done).await;
            dict.complete(trans_num)?;
            res?;
            T::copy_from_bytes(&sink.take(), recvbuf);
        }
        Ok(())
    }

    /// Scatter equal blocks of `recvbuf.len()` elements from `root`.
    pub async fn scatter<T: Datatype>(&self, sendbuf: &[T], recvbuf: &mut [T], root: usize) -> Result<()> {
        let count = recvbuf.len();
        let size = self.size();
        let counts = vec![count; size];
        let displs: Vec<usize> = (0..size).map(|i| i * count).collect();
        self.scatterv(sendbuf, &counts, &displs, recvbuf, root).await
    }
}
