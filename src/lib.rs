//! A platform-agnostic driver for an SPI camera module with an on-board
//! capture FIFO ("Mega"-style modules with an FPGA front-end in front of the
//! image sensor). The driver speaks the module's register protocol over any
//! bus implementing the embedded-hal blocking SPI interface, manages the
//! capture FIFO, and turns the module's "capture done" flag into discrete
//! image buffers: one full still frame, a continuous queue of preview
//! frames, or a JPEG byte stream spooled straight to a caller-supplied sink.
//!
//! Board bring-up (clocks, pins, SPI peripheral configuration) and anything
//! downstream of a filled buffer (host protocol, storage, display) are the
//! application's job.

#![cfg_attr(not(test), no_std)]

pub mod frame_buf;
pub mod jpeg;
pub mod mega;

pub use crate::frame_buf::{FrameBuffer, Monotonic, QUEUE_DEPTH};
pub use crate::jpeg::{JpegScanner, ScanState, Sink};
pub use crate::mega::{Control, Error, MegaCamera, FRAME_INTERVAL_MS};
