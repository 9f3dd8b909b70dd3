//! Compression Stage
//!
//! LZ4 frame encoder as a chain stage. The codec is treated as a pluggable
//! byte transformer: the stage only adapts `lz4_flex`'s streaming encoder to
//! the chain's flush/close contract. `close` writes the frame trailer; the
//! stage rejects writes after that.

use std::io::{self, Write};

use lz4_flex::frame::FrameEncoder;

use crate::chain::{Link, Stage};

pub struct Lz4Stage {
    encoder: Option<FrameEncoder<Link>>,
}

impl Lz4Stage {
    pub fn new(inner: Link) -> Self {
        Self {
            encoder: Some(FrameEncoder::new(inner)),
        }
    }

    fn encoder_mut(&mut self) -> io::Result<&mut FrameEncoder<Link>> {
        self.encoder
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "compression is finished"))
    }
}

impl Write for Lz4Stage {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Stage for Lz4Stage {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn flush_stage(&mut self) -> io::Result<()> {
        self.encoder_mut()?.flush()
    }

    fn close_stage(&mut self) -> io::Result<()> {
        match self.encoder.take() {
            Some(encoder) => {
                encoder.finish().map_err(io::Error::other)?;
                Ok(())
            }
            None => Ok(()),
        }
    }
}
