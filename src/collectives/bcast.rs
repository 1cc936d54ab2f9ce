use crate::datatype::Datatype;
use crate::error::Result;
use crate::op_dict::OpKind;
use crate::transaction_dict::{BufferSink, Deposit};
use crate::world::Comm;

use tracing::trace;

impl Comm {
    /// Broadcast `buf` from `root` to every rank.
    ///
    /// The root sends one parcel to every rank, itself included, and every
    /// rank waits until its own copy has landed.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn bcast<T: Datatype>(&self, buf: &mut [T], root: usize) -> Result<()> {
        let dict = self.inner.dict(OpKind::Bcast)?;
        let trans_num = dict.inc_userside_count();
        let root = self.check_root(root)?;
        if buf.is_empty() {
            return Ok(());
        }
        let sink = BufferSink::new(buf.len() * T::SIZE);
        let done = dict.userside_record(trans_num, Deposit::Buffer(sink.clone()))?;
        if self.rank() == root {
            let payload = T::slice_to_bytes(buf);
            trace!("bcast #{trans_num} from {root}: {} bytes", payload.len());
            for dest in 0..self.size() {
                self.send_collective(dest, OpKind::Bcast, trans_num, &payload)?;
            }
        }
        let res = self.await_signal(done).await;
        dict.complete(trans_num)?;
        res?;
        T::copy_from_bytes(&sink.take(), buf);
        Ok(())
    }
}
