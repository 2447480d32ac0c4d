//! Shared test doubles: a register-level fake of the camera module behind
//! the SPI wire protocol, a counting delay, a manually advanced clock, and
//! a recording byte sink.

#![allow(dead_code)]

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;
use megacam_rs::mega::MegaCamera;
use megacam_rs::{Monotonic, Sink};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeSpiError;

enum PendingRead {
    Register(u8),
    Burst(bool),
    FifoByte,
}

/// Behavioral model of the camera module's SPI slave.
pub struct ChipState {
    /// Register file; reads of plain registers return the last value.
    pub regs: [u8; 128],
    /// Every register write, in order.
    pub writes: Vec<(u8, u8)>,
    /// FIFO payload served to burst and single-byte reads.
    pub fifo: Vec<u8>,
    pub fifo_pos: usize,
    /// First-burst flag of every burst command observed.
    pub burst_prefixes: Vec<bool>,
    /// Number of capture starts (FIFO control bit 1 writes).
    pub captures: u32,
    /// Status reads reporting busy before the idle pattern appears.
    pub idle_countdown: u32,
    /// Reload value for the capture-done countdown at each capture start.
    pub done_after: u32,
    done_countdown: u32,
    /// Fail the next n SPI writes / transfers.
    pub fail_writes: u32,
    pub fail_reads: u32,
    pending: Option<PendingRead>,
}

impl ChipState {
    pub fn new(sensor_id: u8) -> ChipState {
        let mut regs = [0u8; 128];
        regs[0x40] = sensor_id;
        // Firmware build registers carry junk in their high bits
        regs[0x41] = 0xD8;
        regs[0x42] = 0xF3;
        regs[0x43] = 0x8F;
        regs[0x49] = 0x21;

        ChipState {
            regs,
            writes: Vec::new(),
            fifo: Vec::new(),
            fifo_pos: 0,
            burst_prefixes: Vec::new(),
            captures: 0,
            idle_countdown: 0,
            done_after: 0,
            done_countdown: 0,
            fail_writes: 0,
            fail_reads: 0,
            pending: None,
        }
    }

    /// Load the FIFO and mirror its length into the size registers.
    pub fn set_fifo(&mut self, data: Vec<u8>) {
        let len = data.len() as u32;
        self.regs[0x45] = (len & 0xFF) as u8;
        self.regs[0x46] = ((len >> 8) & 0xFF) as u8;
        self.regs[0x47] = ((len >> 16) & 0xFF) as u8;
        self.fifo = data;
        self.fifo_pos = 0;
    }

    fn read_model(&mut self, addr: u8) -> u8 {
        if addr == 0x44 {
            let mut value = 0u8;
            if self.idle_countdown == 0 {
                value |= 0x02;
            } else {
                self.idle_countdown -= 1;
            }
            if self.captures > 0 {
                if self.done_countdown == 0 {
                    value |= 0x04;
                } else {
                    self.done_countdown -= 1;
                }
            }
            value
        } else {
            self.regs[(addr & 0x7F) as usize]
        }
    }

    fn write_model(&mut self, addr: u8, value: u8) {
        self.writes.push((addr, value));
        self.regs[addr as usize] = value;

        // A capture start rewinds the FIFO and re-arms the done countdown
        if addr == 0x04 && value & 0x02 != 0 {
            self.captures += 1;
            self.done_countdown = self.done_after;
            self.fifo_pos = 0;
        }
    }
}

/// SPI peripheral fake decoding the module's wire protocol.
#[derive(Clone)]
pub struct FakeSpi(pub Rc<RefCell<ChipState>>);

impl Write<u8> for FakeSpi {
    type Error = FakeSpiError;

    fn write(&mut self, words: &[u8]) -> Result<(), FakeSpiError> {
        let mut chip = self.0.borrow_mut();
        if chip.fail_writes > 0 {
            chip.fail_writes -= 1;
            return Err(FakeSpiError);
        }

        match words {
            [0x3C, 0x00] => chip.pending = Some(PendingRead::Burst(true)),
            [0x3C] => chip.pending = Some(PendingRead::Burst(false)),
            [0x3D, 0x00] => chip.pending = Some(PendingRead::FifoByte),
            [addr] if addr & 0x80 == 0 => chip.pending = Some(PendingRead::Register(*addr)),
            [addr, value] if addr & 0x80 != 0 => {
                let reg = addr & 0x7F;
                let value = *value;
                chip.write_model(reg, value);
            }
            _ => panic!("unexpected spi write: {:?}", words),
        }

        Ok(())
    }
}

impl Transfer<u8> for FakeSpi {
    type Error = FakeSpiError;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], FakeSpiError> {
        let mut chip = self.0.borrow_mut();
        if chip.fail_reads > 0 {
            chip.fail_reads -= 1;
            chip.pending = None;
            return Err(FakeSpiError);
        }

        match chip.pending.take() {
            Some(PendingRead::Register(addr)) => {
                let value = chip.read_model(addr);
                if let Some(last) = words.last_mut() {
                    *last = value;
                }
            }
            Some(PendingRead::Burst(first)) => {
                chip.burst_prefixes.push(first);
                let pos = chip.fifo_pos;
                let n = words.len().min(chip.fifo.len().saturating_sub(pos));
                words[..n].copy_from_slice(&chip.fifo[pos..pos + n]);
                chip.fifo_pos += n;
            }
            Some(PendingRead::FifoByte) => {
                let pos = chip.fifo_pos;
                words[0] = if pos < chip.fifo.len() {
                    chip.fifo[pos]
                } else {
                    0
                };
                chip.fifo_pos += 1;
            }
            None => panic!("transfer without a preceding command"),
        }

        Ok(words)
    }
}

/// Chip-select fake; selection bookkeeping lives in the SPI fake.
pub struct FakeCs;

impl OutputPin for FakeCs {
    type Error = core::convert::Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Delay fake accumulating the total milliseconds slept.
#[derive(Clone)]
pub struct CountingDelay(pub Rc<Cell<u32>>);

impl DelayMs<u16> for CountingDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.0.set(self.0.get() + u32::from(ms));
    }
}

/// Manually advanced monotonic clock.
#[derive(Clone)]
pub struct FakeClock(pub Rc<Cell<u32>>);

impl Monotonic for FakeClock {
    fn now_ms(&mut self) -> u32 {
        self.0.get()
    }
}

/// One fake camera rig: shared chip model, sleep counter, and clock.
pub struct Rig {
    pub chip: Rc<RefCell<ChipState>>,
    pub slept: Rc<Cell<u32>>,
    pub clock: Rc<Cell<u32>>,
}

pub fn rig(sensor_id: u8) -> Rig {
    Rig {
        chip: Rc::new(RefCell::new(ChipState::new(sensor_id))),
        slept: Rc::new(Cell::new(0)),
        clock: Rc::new(Cell::new(0)),
    }
}

impl Rig {
    pub fn camera<'b>(&self) -> MegaCamera<'b, FakeSpi, FakeCs, CountingDelay, FakeClock> {
        MegaCamera::new(
            FakeSpi(self.chip.clone()),
            FakeCs,
            CountingDelay(self.slept.clone()),
            FakeClock(self.clock.clone()),
        )
    }

    /// Advance the fake clock.
    pub fn tick(&self, ms: u32) {
        self.clock.set(self.clock.get().wrapping_add(ms));
    }

    pub fn writes(&self) -> Vec<(u8, u8)> {
        self.chip.borrow().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.chip.borrow_mut().writes.clear();
    }
}

/// Recording sink for the JPEG spooling tests.
pub struct RecordingSink {
    pub data: Vec<u8>,
    pub appends: Vec<usize>,
    pub opens: usize,
    pub closes: usize,
}

impl RecordingSink {
    pub fn new() -> RecordingSink {
        RecordingSink {
            data: Vec::new(),
            appends: Vec::new(),
            opens: 0,
            closes: 0,
        }
    }
}

impl Sink for RecordingSink {
    type Error = ();

    fn open(&mut self) -> Result<(), ()> {
        self.opens += 1;
        Ok(())
    }

    fn append(&mut self, block: &[u8]) -> Result<(), ()> {
        self.appends.push(block.len());
        self.data.extend_from_slice(block);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ()> {
        self.closes += 1;
        Ok(())
    }
}
