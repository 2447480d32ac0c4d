//! A generic driver for the register bus on the camera module. Tested with
//! mocked peripherals, but in theory should work on any microcontroller
//! implementing the embedded-hal blocking SPI interface.
//!
//! Wire protocol: a register write is the address with bit 7 set followed
//! by the value; a register read is the address (bit 7 clear) followed by
//! three clocked-in bytes of which only the third is meaningful, the first
//! two being pipeline-delay artifacts. FIFO data leaves the module through
//! a burst command (`0x3C`, dummy byte on the first burst of a drain) or a
//! single-byte command (`0x3D`).

use super::regs::{BURST_FIFO_READ, READ_MASK, SINGLE_FIFO_READ, WRITE_BIT};
use core::marker::PhantomData;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;

/// Number of attempts for a single register transaction.
const REG_RETRIES: u8 = 3;

/// Pause between register transaction attempts, in milliseconds.
const RETRY_PAUSE_MS: u16 = 5;

/// Bus errors.
#[derive(Debug, Eq, PartialEq)]
pub enum BusError<SpiE, PinE> {
    /// Register write failed after all retries.
    WriteFailed(SpiE),
    /// Register or FIFO read failed (register reads after all retries,
    /// FIFO reads immediately).
    ReadFailed(SpiE),
    /// Chip-select pin error.
    Pin(PinE),
}

/// Register bus driver. Owns the chip-select pin; the SPI peripheral and
/// delay provider are borrowed per call so the caller can keep sharing
/// them with other devices.
pub struct SpiBus<SPI, CS> {
    /// Marker to ensure the same SPI type is used in all calls.
    spi: PhantomData<SPI>,
    /// Chip-select pin, asserted low for the whole of each transaction.
    cs: CS,
}

impl<SPI, CS, SpiE, PinE> SpiBus<SPI, CS>
where
    SPI: Transfer<u8, Error = SpiE> + Write<u8, Error = SpiE>,
    CS: OutputPin<Error = PinE>,
{
    /// Creates a new bus driver associated with an SPI peripheral.
    pub fn new(_spi: &SPI, cs: CS) -> Self {
        SpiBus {
            spi: PhantomData,
            cs,
        }
    }

    fn select(&mut self) -> Result<(), BusError<SpiE, PinE>> {
        self.cs.set_low().map_err(BusError::Pin)
    }

    fn deselect(&mut self) -> Result<(), BusError<SpiE, PinE>> {
        self.cs.set_high().map_err(BusError::Pin)
    }

    /// Write a register: address with the write bit set, then the value.
    /// Retried with a fixed pause; fails for good once the attempts are
    /// exhausted.
    pub fn write_register<D: DelayMs<u16>>(
        &mut self,
        spi: &mut SPI,
        delay: &mut D,
        addr: u8,
        value: u8,
    ) -> Result<(), BusError<SpiE, PinE>> {
        let frame = [addr | WRITE_BIT, value];
        let mut tries = REG_RETRIES;

        loop {
            self.select()?;
            let res = spi.write(&frame);
            self.deselect()?;

            match res {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tries -= 1;
                    if tries == 0 {
                        log::error!("failed to write {:#04x} to {:#04x}", value, addr);
                        return Err(BusError::WriteFailed(e));
                    }
                    delay.delay_ms(RETRY_PAUSE_MS);
                }
            }
        }
    }

    /// Read a register: one address byte out, three bytes back, keeping
    /// only the third. Same retry policy as `write_register`.
    pub fn read_register<D: DelayMs<u16>>(
        &mut self,
        spi: &mut SPI,
        delay: &mut D,
        addr: u8,
    ) -> Result<u8, BusError<SpiE, PinE>> {
        let mut tries = REG_RETRIES;

        loop {
            self.select()?;
            let res = Self::read_exchange(spi, addr);
            self.deselect()?;

            match res {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tries -= 1;
                    if tries == 0 {
                        log::error!("failed to read register {:#04x}", addr);
                        return Err(BusError::ReadFailed(e));
                    }
                    delay.delay_ms(RETRY_PAUSE_MS);
                }
            }
        }
    }

    fn read_exchange(spi: &mut SPI, addr: u8) -> Result<u8, SpiE> {
        spi.write(&[addr & READ_MASK])?;
        let mut buf = [0u8; 3];
        spi.transfer(&mut buf)?;
        Ok(buf[2])
    }

    /// Burst-read FIFO bytes into `dst`. The first burst of a drain sends
    /// the command byte plus a dummy byte, later bursts only the command
    /// byte. Not retried: a partial burst cannot be replayed mid-stream.
    pub fn read_block(
        &mut self,
        spi: &mut SPI,
        dst: &mut [u8],
        first: bool,
    ) -> Result<(), BusError<SpiE, PinE>> {
        let cmd = [BURST_FIFO_READ, 0x00];
        let prefix = if first { &cmd[..] } else { &cmd[..1] };

        self.select()?;
        let res = Self::block_exchange(spi, prefix, dst);
        self.deselect()?;

        res.map_err(BusError::ReadFailed)
    }

    fn block_exchange(spi: &mut SPI, prefix: &[u8], dst: &mut [u8]) -> Result<(), SpiE> {
        spi.write(prefix)?;
        spi.transfer(dst)?;
        Ok(())
    }

    /// Read a single FIFO byte (command plus dummy byte, then one data
    /// byte). Used by the byte-at-a-time JPEG spooling path.
    pub fn read_fifo_byte(&mut self, spi: &mut SPI) -> Result<u8, BusError<SpiE, PinE>> {
        self.select()?;
        let res = Self::byte_exchange(spi);
        self.deselect()?;

        res.map_err(BusError::ReadFailed)
    }

    fn byte_exchange(spi: &mut SPI) -> Result<u8, SpiE> {
        spi.write(&[SINGLE_FIFO_READ, 0x00])?;
        let mut buf = [0u8; 1];
        spi.transfer(&mut buf)?;
        Ok(buf[0])
    }
}
