//! Byte-stream reassembly.
//!
//! TCP delivers the frame stream in arbitrary fragments: one read may carry
//! several frames, or a frame split at any byte boundary. The reassembler
//! owns the accumulation buffer for one session and turns that chunk stream
//! back into an ordered sequence of complete frames.

use bytes::{Buf, BytesMut};

use crate::error::ProtocolError;
use crate::frame::{self, Frame};

/// Re-assembles complete frames out of arbitrary transport chunks.
///
/// The pending buffer belongs exclusively to one session and decode never
/// runs concurrently for the same stream, so no locking is needed.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    pending: BytesMut,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, invoking `dispatch` for every frame it completes.
    ///
    /// A zero-length chunk is a no-op. An unknown or malformed frame
    /// terminates reassembly for the stream: the error propagates to the
    /// caller and must not be silently dropped.
    pub fn push(
        &mut self,
        chunk: &[u8],
        mut dispatch: impl FnMut(Frame),
    ) -> Result<(), ProtocolError> {
        self.pending.extend_from_slice(chunk);
        while let Some((frame, consumed)) = frame::decode(&self.pending)? {
            self.pending.advance(consumed);
            dispatch(frame);
        }
        Ok(())
    }

    /// Number of buffered bytes not yet forming a complete frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
