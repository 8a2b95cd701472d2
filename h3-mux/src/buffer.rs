use bytes::{Buf, BytesMut};

/// A growable receive buffer that accepts stream data at absolute offsets.
///
/// The transport delivers stream bytes with explicit offsets to accommodate
/// out-of-order arrival. Splicing past the current end grows the buffer,
/// implicitly zero-filling the gap; the buffer itself does not track which
/// ranges are real. Callers only ever read the contiguous prefix the transport
/// reports as available.
#[derive(Default)]
pub struct ReceiveBuffer {
    data: BytesMut,
}

impl ReceiveBuffer {
    /// Copy `bytes` to the absolute position `offset`, growing as needed.
    ///
    /// Only fails by aborting on allocation exhaustion.
    pub fn splice(&mut self, offset: u64, bytes: &[u8]) {
        let offset = offset as usize;
        let end = offset + bytes.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(bytes);
    }

    /// The high-water mark reached by splicing.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Drop the first `n` bytes; later offsets are relative to the new front.
    pub fn consume(&mut self, n: usize) {
        self.data.advance(n);
    }
}

/// An egress stream's send buffer.
///
/// The transport borrows slices out of it at packet-emit time and shifts the
/// front off once bytes are durably handed over, so the buffer never learns
/// about retransmits.
#[derive(Default)]
pub struct SendBuffer {
    data: BytesMut,
}

impl SendBuffer {
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    /// Drop the first `delta` bytes: the transport owns them now.
    pub fn shift(&mut self, delta: usize) {
        self.data.advance(delta);
    }

    /// Copy up to `dst.len()` bytes starting at `offset` into `dst`.
    ///
    /// Returns the bytes copied and whether the copy reached the end of the
    /// buffered data.
    pub fn emit(&self, offset: usize, dst: &mut [u8]) -> (usize, bool) {
        debug_assert!(offset <= self.data.len());
        let remaining = self.data.len().saturating_sub(offset);
        let n = remaining.min(dst.len());
        dst[..n].copy_from_slice(&self.data[offset..offset + n]);
        (n, n == remaining)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
