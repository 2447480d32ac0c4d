//! Camera control operations and their register value encodings.
//!
//! Each control is a closed enum variant carrying its typed payload, so an
//! unsupported control id is unrepresentable rather than a runtime default
//! case. The level encodings interleave negative steps on even codes, as
//! the module firmware expects.

/// Brightness adjustment steps.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BrightnessLevel {
    Minus4 = 8,
    Minus3 = 6,
    Minus2 = 4,
    Minus1 = 2,
    Default = 0,
    Plus1 = 1,
    Plus2 = 3,
    Plus3 = 5,
    Plus4 = 7,
}

/// Contrast adjustment steps.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ContrastLevel {
    Minus3 = 6,
    Minus2 = 4,
    Minus1 = 2,
    Default = 0,
    Plus1 = 1,
    Plus2 = 3,
    Plus3 = 5,
}

/// Saturation adjustment steps.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SaturationLevel {
    Minus3 = 6,
    Minus2 = 4,
    Minus1 = 2,
    Default = 0,
    Plus1 = 1,
    Plus2 = 3,
    Plus3 = 5,
}

/// Exposure-value compensation steps.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EvLevel {
    Minus3 = 6,
    Minus2 = 4,
    Minus1 = 2,
    Default = 0,
    Plus1 = 1,
    Plus2 = 3,
    Plus3 = 5,
}

/// Sharpness levels (3 MP sensors only).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SharpnessLevel {
    Auto = 0,
    Level1 = 1,
    Level2 = 2,
    Level3 = 3,
    Level4 = 4,
    Level5 = 5,
    Level6 = 6,
    Level7 = 7,
    Level8 = 8,
}

/// Special color effects. Availability is gated by the sensor's
/// special-effect bitmask.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ColorFx {
    None = 0,
    Blueish = 1,
    Redish = 2,
    BlackWhite = 3,
    Sepia = 4,
    Negative = 5,
    GrassGreen = 6,
    OverExposure = 7,
    Solarize = 8,
}

/// Fixed white balance modes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WhiteBalanceMode {
    Auto = 0,
    Sunny = 1,
    Office = 2,
    Cloudy = 3,
    Home = 4,
}

/// JPEG compression quality (JPEG format only).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ImageQuality {
    High = 0,
    Default = 1,
    Low = 2,
}

/// Camera control operations, each mapping to one or more register writes
/// with the documented idle waits in between.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Control {
    Brightness(BrightnessLevel),
    Contrast(ContrastLevel),
    Saturation(SaturationLevel),
    ExposureValue(EvLevel),
    WhiteBalance(WhiteBalanceMode),
    SpecialEffect(ColorFx),
    /// Gated on `SensorInfo::enable_sharpness`.
    Sharpness(SharpnessLevel),
    /// Gated on `SensorInfo::enable_focus`.
    AutoFocus(bool),
    /// Only valid while the active format is JPEG.
    Quality(ImageQuality),
    AutoGain(bool),
    AutoExposure(bool),
    AutoWhiteBalance(bool),
    /// Manual gain, clamped to the sensor's gain range. Written as two
    /// bytes, high then low.
    ManualGain(u16),
    /// Manual exposure, clamped to the sensor's exposure range. Written as
    /// three bytes, high to low.
    ManualExposure(u32),
    LowPower(bool),
    /// Soft reset followed by a fresh connection probe.
    Reset,
}
