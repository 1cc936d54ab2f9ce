use crate::collectives::check_layout;
use crate::datatype::Datatype;
use crate::error::Result;
use crate::op_dict::OpKind;
use crate::transaction_dict::{Deposit, GatherSink};
use crate::world::Comm;

impl Comm {
    /// Gather variable-sized blocks into `recvbuf` on `root`.
    ///
    /// Rank `i` contributes `counts[i]` elements placed at element
    /// `displs[i]`; the root only waits for ranks with a non-zero count, so
    /// a rank contributing nothing sends nothing. `recvbuf`, `counts` and
    /// `displs` are only read on the root.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn gatherv<T: Datatype>(
        &self,
        sendbuf: &[T],
        recvbuf: &mut [T],
        counts: &[usize],
        displs: &[usize],
        root: usize,
    ) -> Result<()> {
        let dict = self.inner.dict(OpKind::Gatherv)?;
        let trans_num = dict.inc_userside_count();
        let root = self.check_root(root)?;
        let sink = if self.rank() == root {
            check_layout(counts, displs, self.size(), recvbuf.len())?;
            if counts.iter().all(|c| *c == 0) {
                None
            } else {
                let sink = GatherSink::new(
                    recvbuf.len() * T::SIZE,
                    displs.iter().map(|d| d * T::SIZE).collect(),
                    counts.iter().map(|c| c * T::SIZE).collect(),
                )?;
                dict.userside_record(trans_num, Deposit::Gather(sink.clone()))?;
                Some(sink)
            }
        } else {
            None
        };
        if !sendbuf.is_empty() {
            self.send_collective(root, OpKind::Gatherv, trans_num, &T::slice_to_bytes(sendbuf))?;
        }
        if let Some(sink) = sink {
            let res = self.await_all(sink.expected()).await;
            dict.complete(trans_num)?;
            res?;
            let gathered = sink.take();
            for (count, displ) in counts.iter().zip(displs.iter()) {
                if *count > 0 {
                    let bytes = &gathered[displ * T::SIZE..(displ + count) * T::SIZE];
                    T::copy_from_bytes(bytes, &mut recvbuf[*displ..displ + count]);
                }
            }
        }
        Ok(())
    }
}
