//! Start/end-of-image delimiter scanning for spooling one JPEG frame out
//! of the capture FIFO without ever holding the whole image in memory.
//!
//! The scanner consumes the raw byte stream one byte at a time with a
//! single byte of lookback. Bytes before the start-of-image marker are
//! discarded; from the marker (inclusive) onwards bytes accumulate in a
//! fixed-size block that is flushed to the sink whenever it fills. The
//! end-of-image marker flushes the final block, closes the sink, and stops
//! the scanner, leaving any trailing FIFO bytes unconsumed.

/// Bytes accumulated between sink flushes.
pub const BLOCK_SIZE: usize = 256;

const MARKER_PREFIX: u8 = 0xFF;
const START_OF_IMAGE: u8 = 0xD8;
const END_OF_IMAGE: u8 = 0xD9;

/// Byte sink with open/append/close semantics, e.g. a file on a mounted
/// filesystem. Owned by the caller.
pub trait Sink {
    type Error;

    fn open(&mut self) -> Result<(), Self::Error>;
    fn append(&mut self, block: &[u8]) -> Result<(), Self::Error>;
    fn close(&mut self) -> Result<(), Self::Error>;
}

/// Scanner progress after a byte has been consumed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ScanState {
    /// Before the start marker, or inside the frame.
    Scanning,
    /// End marker seen; the sink has been flushed and closed.
    Complete,
}

/// One-shot delimiter scanner: frames exactly one (SOI .. EOI) image and
/// forwards only the framed payload, markers included, to the sink.
pub struct JpegScanner {
    lookback: u8,
    in_frame: bool,
    done: bool,
    block: [u8; BLOCK_SIZE],
    fill: usize,
    bytes_written: usize,
}

impl JpegScanner {
    pub fn new() -> Self {
        JpegScanner {
            lookback: 0,
            in_frame: false,
            done: false,
            block: [0; BLOCK_SIZE],
            fill: 0,
            bytes_written: 0,
        }
    }

    /// Consume one byte of the raw stream. Opens the sink on the start
    /// marker, closes it on the end marker. Once `Complete` is returned,
    /// further bytes are ignored.
    pub fn feed<S: Sink>(&mut self, byte: u8, sink: &mut S) -> Result<ScanState, S::Error> {
        if self.done {
            return Ok(ScanState::Complete);
        }

        let prev = self.lookback;
        self.lookback = byte;

        if !self.in_frame {
            if prev == MARKER_PREFIX && byte == START_OF_IMAGE {
                sink.open()?;
                self.in_frame = true;
                // The marker prefix was discarded when consumed, recover it
                self.push(prev, sink)?;
                self.push(byte, sink)?;
            }
            return Ok(ScanState::Scanning);
        }

        self.push(byte, sink)?;

        if prev == MARKER_PREFIX && byte == END_OF_IMAGE {
            self.flush(sink)?;
            sink.close()?;
            self.done = true;
            return Ok(ScanState::Complete);
        }

        Ok(ScanState::Scanning)
    }

    /// Flush and close an open sink when the stream ended before the end
    /// marker, persisting the truncated frame instead of leaking the sink.
    pub fn finish<S: Sink>(&mut self, sink: &mut S) -> Result<(), S::Error> {
        if self.in_frame && !self.done {
            self.flush(sink)?;
            sink.close()?;
            self.done = true;
        }
        Ok(())
    }

    /// Whether the end marker has been seen.
    pub fn is_complete(&self) -> bool {
        self.done
    }

    /// Total bytes handed to the sink so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    fn push<S: Sink>(&mut self, byte: u8, sink: &mut S) -> Result<(), S::Error> {
        self.block[self.fill] = byte;
        self.fill += 1;
        if self.fill == BLOCK_SIZE {
            self.flush(sink)?;
        }
        Ok(())
    }

    fn flush<S: Sink>(&mut self, sink: &mut S) -> Result<(), S::Error> {
        if self.fill > 0 {
            sink.append(&self.block[..self.fill])?;
            self.bytes_written += self.fill;
            self.fill = 0;
        }
        Ok(())
    }
}

impl Default for JpegScanner {
    fn default() -> Self {
        Self::new()
    }
}
