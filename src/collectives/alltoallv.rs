use crate::collectives::check_layout;
use crate::datatype::Datatype;
use crate::error::Result;
use crate::op_dict::OpKind;
use crate::transaction_dict::{Deposit, GatherSink};
use crate::world::Comm;

impl Comm {
    /// Variable-sized all-to-all exchange.
    ///
    /// `sendcounts[i]` elements at `sdispls[i]` go to rank `i`;
    /// `recvcounts[j]` elements from rank `j` land at `rdispls[j]`.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn alltoallv<T: Datatype>(
        &self,
        sendbuf: &[T],
        sendcounts: &[usize],
        sdispls: &[usize],
        recvbuf: &mut [T],
        recvcounts: &[usize],
        rdispls: &[usize],
    ) -> Result<()> {
        let dict = self.inner.dict(OpKind::Alltoallv)?;
        let trans_num = dict.inc_userside_count();
        let size = self.size();
        check_layout(sendcounts, sdispls, size, sendbuf.len())?;
        check_layout(recvcounts, rdispls, size, recvbuf.len())?;
        let sink = if recvcounts.iter().any(|c| *c > 0) {
            let sink = GatherSink::new(
                recvbuf.len() * T::SIZE,
                rdispls.iter().map(|d| d * T::SIZE).collect(),
                recvcounts.iter().map(|c| c * T::SIZE).collect(),
            )?;
            dict.userside_record(trans_num, Deposit::Gather(sink.clone()))?;
            Some(sink)
        } else {
            None
        };
        for dest in 0..size {
            if sendcounts[dest] > 0 {
                let chunk = &sendbuf[sdispls[dest]..sdispls[dest] + sendcounts[dest]];
                self.send_collective(dest, OpKind::Alltoallv, trans_num, &T::slice_to_bytes(chunk))?;
            }
        }
        if let Some(sink) = sink {
            let res = self.await_all(sink.expected()).await;
            dict.complete(trans_num)?;
            res?;
            let received = sink.take();
            for (count, displ) in recvcounts.iter().zip(rdispls.iter()) {
                if *count > 0 {
                    let bytes = &received[displ * T::SIZE..(displ + count) * T::SIZE];
                    T::copy_from_bytes(bytes, &mut recvbuf[*displ..displ + count]);
                }
            }
        }
        Ok(())
    }
}
