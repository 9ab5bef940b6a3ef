//! Growable output buffer for native encoders that write into caller memory.
//!
//! Native encoders report "need more output" when the space they were given
//! is full. [`drain`] keeps doubling the buffer and resuming from the first
//! unwritten byte until the encoder reports anything else, then truncates to
//! the exact number of bytes written.

use super::encode::EncoderStatus;

/// Size of the first output chunk handed to an encoder.
pub const INITIAL_OUTPUT_SIZE: usize = 64;

/// Byte buffer with a write cursor.
#[derive(Debug)]
pub struct OutputBuffer {
    data: Vec<u8>,
    written: usize,
}

impl OutputBuffer {
    /// Buffer of `size` bytes (at least one) with nothing written yet.
    pub fn with_size(size: usize) -> Self {
        Self {
            data: vec![0; size.max(1)],
            written: 0,
        }
    }

    /// Space after the last written byte.
    pub fn unwritten_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.written..]
    }

    /// Mark `count` more bytes as written.
    pub fn advance(&mut self, count: usize) {
        debug_assert!(self.written + count <= self.data.len());
        self.written = (self.written + count).min(self.data.len());
    }

    /// Double the allocated size, keeping written bytes.
    pub fn grow(&mut self) {
        let size = self.data.len() * 2;
        self.data.resize(size, 0);
    }

    /// Grow until at least `additional` unwritten bytes are available.
    pub fn ensure_available(&mut self, additional: usize) {
        while self.data.len() - self.written < additional {
            self.grow();
        }
    }

    /// Allocated size.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Written bytes only.
    pub fn finish(mut self) -> Vec<u8> {
        self.data.truncate(self.written);
        self.data
    }
}

/// Pull all output out of an encoder.
///
/// `process` receives the unwritten tail of the buffer and returns how many
/// bytes it wrote plus its status. The buffer doubles on every
/// [`EncoderStatus::NeedMoreOutput`]; the first other status ends the loop and
/// is returned with the bytes written so far.
pub fn drain<F>(initial_size: usize, mut process: F) -> (Vec<u8>, EncoderStatus)
where
    F: FnMut(&mut [u8]) -> (usize, EncoderStatus),
{
    let mut output = OutputBuffer::with_size(initial_size);
    loop {
        let (written, status) = process(output.unwritten_mut());
        output.advance(written);
        if status != EncoderStatus::NeedMoreOutput {
            return (output.finish(), status);
        }
        output.grow();
    }
}
