//! Camera module driver: connection probe, control dispatch, still
//! capture, the streaming producer, and JPEG spooling.
//!
//! The driver owns the SPI peripheral, chip-select pin, delay provider,
//! and monotonic clock, so every multi-step register sequence holds the
//! bus for its whole duration; nothing can interleave with it. The
//! streaming producer is cooperative: the application arms it with
//! [`MegaCamera::start`] and drives it by calling [`MegaCamera::service`]
//! periodically (e.g. from a timer task).

pub mod bus;
pub mod control;
pub mod regs;
pub mod sensor;

use crate::frame_buf::{FrameBuffer, FrameQueue, Monotonic};
use crate::jpeg::{JpegScanner, ScanState, Sink};
use bus::{BusError, SpiBus};
pub use control::Control;
use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::blocking::spi::{Transfer, Write};
use embedded_hal::digital::v2::OutputPin;
use regs::*;
use sensor::{FormatDescriptor, PixelFormat, SdkVersion, SensorId, SensorInfo};

/// Time between streaming capture cycles in milliseconds (30 fps nominal).
pub const FRAME_INTERVAL_MS: u32 = 1000 / 30;

/// Poll interval while waiting for sensor idle or capture done.
const POLL_PAUSE_MS: u16 = 2;

// Idle-wait try budgets, per the register's documented settle time
const IDLE_TRIES_SIMPLE: u8 = 3;
const IDLE_TRIES_RECOMPUTE: u8 = 10;
const IDLE_TRIES_FORMAT: u8 = 30;
const IDLE_TRIES_PROBE: u8 = 255;

/// Try budget while polling for capture done.
const CAPTURE_TRIES: u16 = 200;

/// Settle time after a soft reset.
const RESET_SETTLE_MS: u16 = 1000;

/// Driver errors.
#[derive(Debug, Eq, PartialEq)]
pub enum Error<SpiE, PinE> {
    /// Bus transaction failed for good (retries exhausted where they apply).
    Bus(BusError<SpiE, PinE>),
    /// Idle-wait or capture-done polling exhausted its try budget.
    Timeout,
    /// Requested control or format is not in the sensor's capability table.
    /// No state was mutated.
    Unsupported,
    /// Still capture requested while streaming, stream started twice, or a
    /// frame signal is already registered.
    AlreadyActive,
    /// Connection probe did not recognize any known sensor id.
    NoDevice,
    /// The pending queue already holds `QUEUE_DEPTH` buffers.
    QueueFull,
    /// No frame became ready within the dequeue timeout.
    WouldBlock,
}

impl<SpiE, PinE> From<BusError<SpiE, PinE>> for Error<SpiE, PinE> {
    fn from(e: BusError<SpiE, PinE>) -> Self {
        Error::Bus(e)
    }
}

/// Error from the JPEG spooling path, which can fail on either side.
#[derive(Debug, Eq, PartialEq)]
pub enum SpoolError<CamE, SinkE> {
    Camera(CamE),
    Sink(SinkE),
}

/// Capture-path state, mutated only by the capture and streaming paths.
struct CaptureState {
    /// Bytes left in the module FIFO; a read request is always clamped to
    /// this, so it never goes negative.
    fifo_remaining: u32,
    /// The next burst is the first of the current drain (longer command
    /// prefix on the wire).
    first_read: bool,
    streaming: bool,
    /// Deadline for the next streaming producer activation.
    next_cycle_ms: u32,
}

/// Camera driver instance. Generic over the SPI peripheral, chip-select
/// pin, delay provider, and monotonic clock; `'b` is the lifetime of the
/// caller-supplied frame buffer storage.
pub struct MegaCamera<'b, SPI, CS, D, M> {
    bus: SpiBus<SPI, CS>,
    spi: SPI,
    delay: D,
    clock: M,
    sensor: Option<SensorInfo>,
    version: Option<SdkVersion>,
    format: FormatDescriptor,
    state: CaptureState,
    queue: FrameQueue<'b>,
    frame_signal: Option<fn()>,
}

impl<'b, SPI, CS, D, M, SpiE, PinE> MegaCamera<'b, SPI, CS, D, M>
where
    SPI: Transfer<u8, Error = SpiE> + Write<u8, Error = SpiE>,
    CS: OutputPin<Error = PinE>,
    D: DelayMs<u16>,
    M: Monotonic,
{
    /// Creates a new driver. Call [`MegaCamera::connect`] before anything
    /// else.
    pub fn new(spi: SPI, cs: CS, delay: D, clock: M) -> Self {
        MegaCamera {
            bus: SpiBus::new(&spi, cs),
            spi,
            delay,
            clock,
            sensor: None,
            version: None,
            format: FormatDescriptor::default(),
            state: CaptureState {
                fifo_remaining: 0,
                first_read: false,
                streaming: false,
                next_cycle_ms: 0,
            },
            queue: FrameQueue::new(),
            frame_signal: None,
        }
    }

    fn write_reg(&mut self, addr: u8, value: u8) -> Result<(), Error<SpiE, PinE>> {
        self.bus
            .write_register(&mut self.spi, &mut self.delay, addr, value)
            .map_err(Error::Bus)
    }

    fn read_reg(&mut self, addr: u8) -> Result<u8, Error<SpiE, PinE>> {
        self.bus
            .read_register(&mut self.spi, &mut self.delay, addr)
            .map_err(Error::Bus)
    }

    /// Poll the sensor-state register until the sensor reports idle,
    /// bounded by `tries` polls of 2 ms each.
    fn await_idle(&mut self, mut tries: u8) -> Result<(), Error<SpiE, PinE>> {
        while (self.read_reg(Register::SENSOR_STATE)? & SENSOR_STATE_MASK) != SENSOR_STATE_IDLE {
            if tries == 0 {
                return Err(Error::Timeout);
            }
            tries -= 1;
            self.delay.delay_ms(POLL_PAUSE_MS);
        }

        Ok(())
    }

    /// Soft-reset the module. Any streaming in progress is abandoned.
    pub fn soft_reset(&mut self) -> Result<(), Error<SpiE, PinE>> {
        self.state.streaming = false;
        self.write_reg(Register::SENSOR_RESET, SENSOR_RESET_ENABLE)?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        Ok(())
    }

    /// Read the sensor id and select its capability profile.
    fn check_connection(&mut self) -> Result<(), Error<SpiE, PinE>> {
        self.await_idle(IDLE_TRIES_PROBE)?;

        let raw = self.read_reg(Register::SENSOR_ID)?;
        if raw & 0x87 == 0 {
            log::error!("camera not detected ({:#04x})", raw);
            return Err(Error::NoDevice);
        }

        let id = SensorId::from_reg(raw).ok_or(Error::NoDevice)?;
        self.sensor = Some(sensor::info_for(id));
        log::info!("detected sensor id {:#04x}", raw);

        Ok(())
    }

    /// Establish communication with the module: soft reset, probe the
    /// sensor id, read the firmware build registers, and apply the default
    /// 96x96 RGB565 format.
    pub fn connect(&mut self) -> Result<(), Error<SpiE, PinE>> {
        self.soft_reset()?;
        self.check_connection()?;

        let version = SdkVersion {
            year: self.read_reg(Register::SDK_YEAR)? & 0x3F,
            month: self.read_reg(Register::SDK_MONTH)? & 0x0F,
            day: self.read_reg(Register::SDK_DAY)? & 0x1F,
            fpga: self.read_reg(Register::FPGA_VERSION)?,
        };
        log::info!(
            "camera firmware {}-{}-{}, fpga {:#04x}",
            version.year,
            version.month,
            version.day,
            version.fpga
        );
        self.version = Some(version);

        self.set_format(96, 96, PixelFormat::Rgb565)
    }

    /// Capability profile of the detected sensor.
    pub fn info(&self) -> Option<&SensorInfo> {
        self.sensor.as_ref()
    }

    /// Firmware build information read at connection time.
    pub fn sdk_version(&self) -> Option<&SdkVersion> {
        self.version.as_ref()
    }

    /// The active capture format.
    pub fn format(&self) -> &FormatDescriptor {
        &self.format
    }

    /// Bytes left in the module FIFO from the last capture.
    pub fn fifo_remaining(&self) -> u32 {
        self.state.fifo_remaining
    }

    /// Whether the streaming producer is armed.
    pub fn is_streaming(&self) -> bool {
        self.state.streaming
    }

    /// Validate and apply a capture format. An unsupported combination
    /// fails without touching the current format or the hardware.
    pub fn set_format(
        &mut self,
        width: u16,
        height: u16,
        pixel_format: PixelFormat,
    ) -> Result<(), Error<SpiE, PinE>> {
        let info = self.sensor.ok_or(Error::NoDevice)?;
        let resolution = match sensor::resolution_for(width, height, &info) {
            Some(code) => code,
            None => {
                log::error!("resolution {}x{} not supported", width, height);
                return Err(Error::Unsupported);
            }
        };

        if self.format.width == width
            && self.format.height == height
            && self.format.pixel_format == pixel_format
        {
            // Nothing to do
            return Ok(());
        }

        self.await_idle(IDLE_TRIES_SIMPLE)?;
        self.write_reg(Register::FORMAT, pixel_format as u8)?;
        self.await_idle(IDLE_TRIES_FORMAT)?;

        self.write_reg(Register::CAPTURE_RESOLUTION, resolution as u8)?;
        self.await_idle(IDLE_TRIES_RECOMPUTE)?;

        self.format = FormatDescriptor {
            width,
            height,
            pixel_format,
            pitch: width * 2,
        };

        Ok(())
    }

    /// Apply a camera control.
    pub fn set_control(&mut self, control: Control) -> Result<(), Error<SpiE, PinE>> {
        match control {
            Control::Brightness(level) => self.write_tuning_reg(Register::BRIGHTNESS, level as u8),
            Control::Contrast(level) => self.write_tuning_reg(Register::CONTRAST, level as u8),
            Control::Saturation(level) => self.write_tuning_reg(Register::SATURATION, level as u8),
            Control::ExposureValue(level) => {
                self.write_tuning_reg(Register::EXPOSURE_VALUE, level as u8)
            }
            Control::WhiteBalance(mode) => {
                self.write_tuning_reg(Register::WHITE_BALANCE, mode as u8)
            }
            Control::SpecialEffect(fx) => self.set_special_effect(fx),
            Control::Sharpness(level) => self.set_sharpness(level),
            Control::AutoFocus(on) => self.set_auto_focus(on),
            Control::Quality(quality) => self.set_quality(quality),
            Control::AutoGain(on) => self.set_auto_control(AUTO_CTRL_GAIN, on),
            Control::AutoExposure(on) => self.set_auto_control(AUTO_CTRL_EXPOSURE, on),
            Control::AutoWhiteBalance(on) => self.set_auto_control(AUTO_CTRL_WHITE_BALANCE, on),
            Control::ManualGain(value) => self.set_gain(value),
            Control::ManualExposure(value) => self.set_exposure(value),
            Control::LowPower(on) => self.set_low_power(on),
            Control::Reset => {
                self.soft_reset()?;
                self.check_connection()
            }
        }
    }

    /// Plain tuning register write: wait for idle, then write.
    fn write_tuning_reg(&mut self, addr: u8, value: u8) -> Result<(), Error<SpiE, PinE>> {
        self.await_idle(IDLE_TRIES_SIMPLE)?;
        self.write_reg(addr, value)
    }

    fn set_special_effect(&mut self, fx: control::ColorFx) -> Result<(), Error<SpiE, PinE>> {
        let info = self.sensor.ok_or(Error::NoDevice)?;
        if info.special_effects & (1 << fx as u16) == 0 {
            log::error!("special effect {:?} not supported by this sensor", fx);
            return Err(Error::Unsupported);
        }

        self.write_tuning_reg(Register::SPECIAL_EFFECT, fx as u8)
    }

    fn set_sharpness(&mut self, level: control::SharpnessLevel) -> Result<(), Error<SpiE, PinE>> {
        let info = self.sensor.ok_or(Error::NoDevice)?;
        if !info.enable_sharpness {
            log::error!("sharpness control not supported by this sensor");
            return Err(Error::Unsupported);
        }

        self.write_tuning_reg(Register::SHARPNESS, level as u8)
    }

    fn set_auto_focus(&mut self, on: bool) -> Result<(), Error<SpiE, PinE>> {
        let info = self.sensor.ok_or(Error::NoDevice)?;
        if !info.enable_focus {
            log::error!("focus control not supported by this sensor");
            return Err(Error::Unsupported);
        }

        self.write_tuning_reg(Register::AUTO_FOCUS, on as u8)
    }

    fn set_quality(&mut self, quality: control::ImageQuality) -> Result<(), Error<SpiE, PinE>> {
        if self.format.pixel_format != PixelFormat::Jpeg {
            log::error!("image quality only applies to the JPEG format");
            return Err(Error::Unsupported);
        }

        self.write_tuning_reg(Register::IMAGE_QUALITY, quality as u8)
    }

    /// Enable or disable one of the automatic control loops. The firmware
    /// recomputes internal state afterwards, hence the longer settle wait.
    fn set_auto_control(&mut self, code: u8, on: bool) -> Result<(), Error<SpiE, PinE>> {
        self.await_idle(IDLE_TRIES_SIMPLE)?;

        let value = if on { code | AUTO_CTRL_ENABLE } else { code };
        self.write_reg(Register::AUTO_CONTROL, value)?;

        self.await_idle(IDLE_TRIES_RECOMPUTE)
    }

    fn set_gain(&mut self, value: u16) -> Result<(), Error<SpiE, PinE>> {
        let info = self.sensor.ok_or(Error::NoDevice)?;
        let value = value.clamp(info.gain_min, info.gain_max);

        self.await_idle(IDLE_TRIES_SIMPLE)?;
        self.write_reg(Register::GAIN_HIGH, (value >> 8) as u8)?;
        self.await_idle(IDLE_TRIES_RECOMPUTE)?;
        self.write_reg(Register::GAIN_LOW, value as u8)?;
        self.await_idle(IDLE_TRIES_RECOMPUTE)
    }

    fn set_exposure(&mut self, value: u32) -> Result<(), Error<SpiE, PinE>> {
        let info = self.sensor.ok_or(Error::NoDevice)?;
        let value = value.clamp(info.exposure_min, info.exposure_max);

        self.await_idle(IDLE_TRIES_SIMPLE)?;
        self.write_reg(Register::EXPOSURE_HIGH, (value >> 16) as u8)?;
        self.await_idle(IDLE_TRIES_RECOMPUTE)?;
        self.write_reg(Register::EXPOSURE_MID, (value >> 8) as u8)?;
        self.await_idle(IDLE_TRIES_RECOMPUTE)?;
        self.write_reg(Register::EXPOSURE_LOW, value as u8)?;
        self.await_idle(IDLE_TRIES_RECOMPUTE)
    }

    fn set_low_power(&mut self, on: bool) -> Result<(), Error<SpiE, PinE>> {
        let info = self.sensor.ok_or(Error::NoDevice)?;
        let on = if info.id.inverted_power_polarity() {
            !on
        } else {
            on
        };

        let value = if on { POWER_LOW } else { POWER_NORMAL };
        self.write_reg(Register::POWER_CONTROL, value)
    }

    /// Clear the FIFO flags, start a hardware capture, and poll for the
    /// done flag.
    fn trigger_capture(&mut self) -> Result<(), Error<SpiE, PinE>> {
        self.write_reg(Register::FIFO_CONTROL, FIFO_CLEAR_MASK)?;
        self.write_reg(Register::FIFO_CONTROL, FIFO_START_MASK)?;

        let mut tries = CAPTURE_TRIES;
        while (self.read_reg(Register::TRIGGER)? & CAP_DONE_MASK) == 0 {
            if tries == 0 {
                log::error!("capture timeout");
                return Err(Error::Timeout);
            }
            tries -= 1;
            self.delay.delay_ms(POLL_PAUSE_MS);
        }

        Ok(())
    }

    /// Read the 24-bit captured length from the three FIFO size registers.
    fn read_fifo_length(&mut self) -> Result<u32, Error<SpiE, PinE>> {
        let len1 = u32::from(self.read_reg(Register::FIFO_SIZE_1)?);
        let len2 = u32::from(self.read_reg(Register::FIFO_SIZE_2)?);
        let len3 = u32::from(self.read_reg(Register::FIFO_SIZE_3)?);

        Ok(((len3 << 16) | (len2 << 8) | len1) & 0x00FF_FFFF)
    }

    /// Still capture: trigger the hardware and learn the FIFO length.
    /// Drain the FIFO afterwards with [`MegaCamera::read_fifo_chunk`] or
    /// [`MegaCamera::spool_frame`]. Rejected while streaming.
    pub fn capture(&mut self) -> Result<u32, Error<SpiE, PinE>> {
        if self.state.streaming {
            log::error!("still capture rejected while streaming");
            return Err(Error::AlreadyActive);
        }

        self.trigger_capture()?;

        let length = self.read_fifo_length()?;
        self.state.fifo_remaining = length;
        self.state.first_read = true;

        Ok(length)
    }

    /// Drain up to one buffer's worth of FIFO bytes. Returns the number of
    /// bytes placed, which is `min(buffer capacity, bytes remaining)`;
    /// repeated calls walk the remaining length down to exactly zero.
    pub fn read_fifo_chunk(
        &mut self,
        buf: &mut FrameBuffer<'_>,
    ) -> Result<usize, Error<SpiE, PinE>> {
        let len = core::cmp::min(buf.capacity() as u32, self.state.fifo_remaining) as usize;

        if len > 0 {
            let first = self.state.first_read;
            self.bus
                .read_block(&mut self.spi, &mut buf.storage_mut()[..len], first)
                .map_err(Error::Bus)?;
        }

        self.state.first_read = false;
        self.state.fifo_remaining -= len as u32;
        buf.set_bytes_used(len);

        Ok(len)
    }

    /// Read one FIFO byte and account for it.
    pub fn read_fifo_byte(&mut self) -> Result<u8, Error<SpiE, PinE>> {
        let byte = self
            .bus
            .read_fifo_byte(&mut self.spi)
            .map_err(Error::Bus)?;
        self.state.fifo_remaining = self.state.fifo_remaining.saturating_sub(1);

        Ok(byte)
    }

    /// Scan the captured FIFO for one JPEG image and spool it to `sink`,
    /// stopping at the end-of-image marker even if the FIFO has not been
    /// fully consumed. Call [`MegaCamera::capture`] first. Returns the
    /// number of bytes written to the sink.
    pub fn spool_frame<S: Sink>(
        &mut self,
        sink: &mut S,
    ) -> Result<u32, SpoolError<Error<SpiE, PinE>, S::Error>> {
        let mut scanner = JpegScanner::new();

        while self.state.fifo_remaining > 0 {
            let byte = self.read_fifo_byte().map_err(SpoolError::Camera)?;
            if scanner.feed(byte, sink).map_err(SpoolError::Sink)? == ScanState::Complete {
                break;
            }
        }

        // A truncated frame (FIFO exhausted before the end marker) is
        // still flushed and the sink closed
        scanner.finish(sink).map_err(SpoolError::Sink)?;

        Ok(scanner.bytes_written() as u32)
    }

    /// Hand an empty buffer to the streaming producer.
    pub fn enqueue(&mut self, buf: FrameBuffer<'b>) -> Result<(), Error<SpiE, PinE>> {
        log::debug!("enqueue buffer, capacity {}", buf.capacity());
        self.queue
            .pending
            .push_back(buf)
            .map_err(|_| Error::QueueFull)
    }

    /// Take the oldest completed frame, polling for up to `timeout_ms`
    /// milliseconds. A zero timeout polls once without blocking.
    pub fn dequeue(&mut self, timeout_ms: u32) -> Result<FrameBuffer<'b>, Error<SpiE, PinE>> {
        let mut waited = 0;

        loop {
            if let Some(buf) = self.queue.ready.pop_front() {
                log::debug!("dequeue frame, {} bytes", buf.bytes_used());
                return Ok(buf);
            }
            if waited >= timeout_ms {
                return Err(Error::WouldBlock);
            }
            self.delay.delay_ms(1);
            waited += 1;
        }
    }

    /// Arm the streaming producer. The first activation is due one frame
    /// interval from now.
    pub fn start(&mut self) -> Result<(), Error<SpiE, PinE>> {
        if self.state.streaming {
            return Err(Error::AlreadyActive);
        }

        self.state.streaming = true;
        self.state.next_cycle_ms = self.clock.now_ms().wrapping_add(FRAME_INTERVAL_MS);
        log::info!("stream start");

        Ok(())
    }

    /// Disarm the streaming producer. Producer activations run on the
    /// caller's thread of control, so none can be in flight when this
    /// returns, and no capture will run until [`MegaCamera::start`] is
    /// called again.
    pub fn stop(&mut self) {
        self.state.streaming = false;
        log::info!("stream stop");
    }

    /// Register a completion notifier, raised after each frame lands in
    /// the ready queue.
    pub fn set_frame_signal(&mut self, signal: fn()) -> Result<(), Error<SpiE, PinE>> {
        if self.frame_signal.is_some() {
            return Err(Error::AlreadyActive);
        }
        self.frame_signal = Some(signal);

        Ok(())
    }

    pub fn clear_frame_signal(&mut self) {
        self.frame_signal = None;
    }

    /// Run one streaming producer activation if the frame interval has
    /// elapsed. The deadline is re-armed before any bus traffic, so a
    /// failed cycle does not stall the stream. A cycle with no pending
    /// buffer (or a full ready queue) triggers the hardware but skips the
    /// drain; nothing is lost since the next cycle re-triggers. Returns
    /// `Ok(true)` when a frame was delivered to the ready queue.
    pub fn service(&mut self) -> Result<bool, Error<SpiE, PinE>> {
        if !self.state.streaming {
            return Ok(false);
        }

        let now = self.clock.now_ms();
        if (now.wrapping_sub(self.state.next_cycle_ms) as i32) < 0 {
            return Ok(false);
        }
        self.state.next_cycle_ms = now.wrapping_add(FRAME_INTERVAL_MS);

        self.trigger_capture()?;

        if self.queue.ready.is_full() {
            log::debug!("ready queue full, skipping cycle");
            return Ok(false);
        }

        let mut buf = match self.queue.pending.pop_front() {
            Some(buf) => buf,
            None => return Ok(false),
        };

        let length = match self.read_fifo_length() {
            Ok(length) => length,
            Err(e) => {
                // The buffer stays owned by the pipeline
                self.queue.pending.push_front(buf).ok();
                return Err(e);
            }
        };
        self.state.fifo_remaining = length;
        self.state.first_read = true;

        // One buffer per cycle; a frame longer than the buffer is truncated
        // and the leftover is dropped by the next cycle's FIFO clear.
        match self.read_fifo_chunk(&mut buf) {
            Ok(_) => {}
            Err(e) => {
                self.queue.pending.push_front(buf).ok();
                return Err(e);
            }
        }

        let timestamp = self.clock.now_ms();
        buf.stamp(timestamp);

        // Capacity checked above, the push cannot fail
        self.queue.ready.push_back(buf).ok();

        if let Some(signal) = self.frame_signal {
            signal();
        }

        Ok(true)
    }
}
