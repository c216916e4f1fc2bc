//! Session buffers
//!
//! The bounded command line buffer and the staging buffer that holds one
//! in-flight chunk between non-blocking I/O calls.

/// Telnet "data mark" that follows urgent data in the stream.
pub const TELNET_DATA_MARK: u8 = 0xF2;

/// Fixed-capacity buffer accumulating command bytes until a line ends.
#[derive(Debug)]
pub struct CommandBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl CommandBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Unused tail of the buffer, to receive into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Whole buffer as scratch space. Contents are discarded by the caller.
    pub fn scratch_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Account for `n` bytes written into `spare_mut`.
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.data.len());
        self.len = (self.len + n).min(self.data.len());
    }

    /// Drop everything up to and including a telnet data mark.
    /// Returns whether a mark was found.
    pub fn skip_past_data_mark(&mut self) -> bool {
        match self.data[..self.len]
            .iter()
            .position(|&b| b == TELNET_DATA_MARK)
        {
            Some(idx) => {
                self.consume(idx + 1);
                true
            }
            None => false,
        }
    }

    /// Remove the first complete line (CRLF or bare LF) and return it
    /// without its terminator. Remaining bytes move to the front.
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        let buffered = &self.data[..self.len];
        let lf = buffered.iter().position(|&b| b == b'\n')?;
        let end = if lf > 0 && buffered[lf - 1] == b'\r' {
            lf - 1
        } else {
            lf
        };
        let line = buffered[..end].to_vec();
        self.consume(lf + 1);
        Some(line)
    }

    fn consume(&mut self, n: usize) {
        self.data.copy_within(n..self.len, 0);
        self.len -= n;
    }
}

/// Staging buffer with a send/write position.
///
/// `position <= size <= capacity` always holds.
#[derive(Debug)]
pub struct StagingBuffer {
    data: Box<[u8]>,
    position: usize,
    size: usize,
}

impl StagingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity].into_boxed_slice(),
            position: 0,
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Everything loaded has been flushed.
    pub fn is_drained(&self) -> bool {
        self.position == self.size
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.size = 0;
    }

    /// Bytes loaded but not yet flushed.
    pub fn pending(&self) -> &[u8] {
        &self.data[self.position..self.size]
    }

    /// Mark `n` pending bytes as flushed.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(self.position + n <= self.size);
        self.position = (self.position + n).min(self.size);
    }

    /// Full capacity, to read the next chunk into.
    pub fn fill_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Account for `n` bytes read through `fill_mut`.
    pub fn set_filled(&mut self, n: usize) {
        debug_assert!(n <= self.data.len());
        self.size = n.min(self.data.len());
        self.position = 0;
    }

    /// Replace the contents with `bytes`. Returns false when they do not fit.
    pub fn load(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.data.len() {
            return false;
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.set_filled(bytes.len());
        true
    }
}
