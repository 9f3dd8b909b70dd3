//! Limit Buffer Stage
//!
//! Fixed-capacity write buffer. Bytes accumulate until the buffer would
//! overflow, then the buffered bytes are forwarded in one write. Writes
//! larger than the whole capacity bypass the buffer entirely. The buffer
//! never splits a single write across a flush boundary, so downstream stages
//! see whole rows.

use std::io::{self, Write};

use crate::chain::{Link, Stage};

pub struct LimitBuffer {
    inner: Link,
    buf: Vec<u8>,
    capacity: usize,
}

impl LimitBuffer {
    pub fn new(inner: Link, capacity: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn flush_buf(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.inner.write_all(&self.buf)?;
        self.buf.clear();
        Ok(())
    }
}

impl Write for LimitBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.buf.len() + buf.len() > self.capacity {
            self.flush_buf()?;
        }
        if buf.len() >= self.capacity {
            self.inner.write_all(buf)?;
            return Ok(buf.len());
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stage for LimitBuffer {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn flush_stage(&mut self) -> io::Result<()> {
        self.flush_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::TestFile;
    use crate::chain::WriteChain;

    #[test]
    fn buffers_until_capacity() {
        let (file, state) = TestFile::new();
        let mut chain = WriteChain::new(file);
        chain
            .prepend_writer(|inner| Ok(LimitBuffer::new(inner, 8)))
            .unwrap();

        chain.write_all(b"abc").unwrap();
        assert!(state.written.lock().unwrap().is_empty());

        chain.write_all(b"def").unwrap();
        assert!(state.written.lock().unwrap().is_empty());

        // Third write would overflow: the buffer empties first.
        chain.write_all(b"ghi").unwrap();
        assert_eq!(state.written.lock().unwrap().as_slice(), b"abcdef");
    }

    #[test]
    fn oversized_writes_bypass_the_buffer() {
        let (file, state) = TestFile::new();
        let mut chain = WriteChain::new(file);
        chain
            .prepend_writer(|inner| Ok(LimitBuffer::new(inner, 4)))
            .unwrap();

        chain.write_all(b"0123456789").unwrap();
        assert_eq!(state.written.lock().unwrap().as_slice(), b"0123456789");
    }

    #[test]
    fn flush_empties_the_buffer() {
        let (file, state) = TestFile::new();
        let mut chain = WriteChain::new(file);
        chain
            .prepend_writer(|inner| Ok(LimitBuffer::new(inner, 64)))
            .unwrap();

        chain.write_all(b"abc").unwrap();
        chain.flush().unwrap();
        assert_eq!(state.written.lock().unwrap().as_slice(), b"abc");
    }
}
