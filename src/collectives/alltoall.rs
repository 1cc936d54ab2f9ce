use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::op_dict::OpKind;
use crate::transaction_dict::{Deposit, GatherSink};
use crate::world::Comm;

impl Comm {
    /// Every rank sends block `i` of `sendbuf` to rank `i` and receives block `j` of `recvbuf` from rank `j`.
    ///
    /// Both buffers hold `size` equal blocks.
    #[tracing::instrument(skip_all, level = "debug")]
    pub async fn alltoall<T: Datatype>(&self, sendbuf: &[T], recvbuf: &mut [T]) -> Result<()> {
        let dict = self.inner.dict(OpKind::Alltoall)?;
        let trans_num = dict.inc_userside_count();
        let size = self.size();
        if sendbuf.len() % size != 0 || recvbuf.len() < sendbuf.len() {
            return Err(Error::InvalidArgument(format!(
                "alltoall of {} elements over {size} ranks into {} elements",
                sendbuf.len(),
                recvbuf.len()
            )));
        }
        let count = sendbuf.len() / size;
        if count == 0 {
            return Ok(());
        }
        let block = count * T::SIZE;
        let sink = GatherSink::new(
            block * size,
            (0..size).map(|i| i * block).collect(),
            vec![block; size],
        )?;
        dict.userside_record(trans_num, Deposit::Gather(sink.clone()))?;
        for (dest, chunk) in sendbuf.chunks_exact(count).enumerate() {
            self.send_collective(dest, OpKind::Alltoall, trans_num, &T::slice_to_bytes(chunk))?;
        }
        let res = self.await_all(sink.expected()).await;
        dict.complete(trans_num)?;
        res?;
        T::copy_from_bytes(&sink.take(), recvbuf);
        Ok(())
    }
}
