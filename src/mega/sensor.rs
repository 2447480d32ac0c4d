//! Sensor identity, capability profiles, and the format capability table.
//!
//! The module family ships with one of four image sensors. The id register
//! distinguishes them, and each id selects one of two capability profiles:
//! the 5 MP parts support lens focus control, the 3 MP parts support a
//! sharpness control. The mark-II parts reuse their mark-I profile but
//! differ in native maximum frame size and in power-control polarity.

/// Sensor identifiers reported by the id register.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SensorId {
    /// 5 MP part, native 2592x1944.
    Mp5 = 0x81,
    /// 3 MP part, native 2048x1536.
    Mp3 = 0x82,
    /// 5 MP mark II, native 2592x1936.
    Mp5MkII = 0x83,
    /// 3 MP mark II, native 2048x1536.
    Mp3MkII = 0x84,
}

impl SensorId {
    pub(crate) fn from_reg(raw: u8) -> Option<SensorId> {
        match raw {
            0x81 => Some(SensorId::Mp5),
            0x82 => Some(SensorId::Mp3),
            0x83 => Some(SensorId::Mp5MkII),
            0x84 => Some(SensorId::Mp3MkII),
            _ => None,
        }
    }

    /// The mark-II parts invert the sense of the power-control register.
    pub(crate) fn inverted_power_polarity(self) -> bool {
        matches!(self, SensorId::Mp5MkII | SensorId::Mp3MkII)
    }
}

/// Resolution codes written to the capture-resolution register.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Resolution {
    Qqvga = 0x00,
    Qvga = 0x01,
    Vga = 0x02,
    Svga = 0x03,
    Hd = 0x04,
    Sxgam = 0x05,
    Uxga = 0x06,
    Fhd = 0x07,
    Qxga = 0x08,
    Wqxga2 = 0x09,
    R96x96 = 0x0A,
    R128x128 = 0x0B,
    R320x320 = 0x0C,
}

/// On-wire pixel format codes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PixelFormat {
    Jpeg = 0x01,
    Rgb565 = 0x02,
    Yuv = 0x03,
}

/// Camera identity and capability flags, selected once at connection time
/// and read-only afterwards.
#[derive(Debug, Clone, Copy)]
pub struct SensorInfo {
    pub id: SensorId,
    /// Bitmask of supported resolution codes (bit n = code n).
    pub resolutions: u16,
    /// Bitmask of supported special-effect codes (bit n = effect code n).
    pub special_effects: u16,
    pub exposure_min: u32,
    pub exposure_max: u32,
    pub gain_min: u16,
    pub gain_max: u16,
    pub enable_focus: bool,
    pub enable_sharpness: bool,
    /// Sensor-internal bus address, reported for debug tooling.
    pub device_address: u8,
    /// Native maximum frame dimensions.
    pub max_frame: (u16, u16),
    /// Resolution code selecting the native maximum frame.
    pub max_resolution: Resolution,
}

const PROFILE_5MP: SensorInfo = SensorInfo {
    id: SensorId::Mp5,
    resolutions: 0x1ED6,
    special_effects: 0x003F,
    exposure_min: 1,
    exposure_max: 30_000,
    gain_min: 1,
    gain_max: 1023,
    enable_focus: true,
    enable_sharpness: false,
    device_address: 0x78,
    max_frame: (2592, 1944),
    max_resolution: Resolution::Wqxga2,
};

const PROFILE_3MP: SensorInfo = SensorInfo {
    id: SensorId::Mp3,
    resolutions: 0x1DD6,
    special_effects: 0x013F,
    exposure_min: 1,
    exposure_max: 30_000,
    gain_min: 1,
    gain_max: 1023,
    enable_focus: false,
    enable_sharpness: true,
    device_address: 0x78,
    max_frame: (2048, 1536),
    max_resolution: Resolution::Qxga,
};

/// Select the capability profile for a detected sensor id.
pub(crate) fn info_for(id: SensorId) -> SensorInfo {
    match id {
        SensorId::Mp5 => SensorInfo { id, ..PROFILE_5MP },
        SensorId::Mp3 => SensorInfo { id, ..PROFILE_3MP },
        SensorId::Mp5MkII => SensorInfo {
            id,
            max_frame: (2592, 1936),
            ..PROFILE_5MP
        },
        SensorId::Mp3MkII => SensorInfo { id, ..PROFILE_3MP },
    }
}

/// Fixed (width, height) to resolution-code table, shared by every sensor.
/// The per-sensor resolution bitmask decides which rows actually apply;
/// native maximum frames are resolved through `SensorInfo::max_frame`.
const DIMENSIONS: &[(u16, u16, Resolution)] = &[
    (96, 96, Resolution::R96x96),
    (128, 128, Resolution::R128x128),
    (320, 240, Resolution::Qvga),
    (320, 320, Resolution::R320x320),
    (640, 480, Resolution::Vga),
    (1280, 720, Resolution::Hd),
    (1600, 1200, Resolution::Uxga),
    (1920, 1080, Resolution::Fhd),
];

/// Resolve a requested frame size to a resolution code, or `None` when the
/// sensor cannot produce it.
pub(crate) fn resolution_for(width: u16, height: u16, info: &SensorInfo) -> Option<Resolution> {
    if (width, height) == info.max_frame {
        return Some(info.max_resolution);
    }

    DIMENSIONS
        .iter()
        .find(|&&(w, h, code)| {
            w == width && h == height && info.resolutions & (1 << code as u16) != 0
        })
        .map(|&(_, _, code)| code)
}

/// Active capture format. `pitch` is the row stride in bytes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FormatDescriptor {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub pitch: u16,
}

impl Default for FormatDescriptor {
    fn default() -> Self {
        FormatDescriptor {
            width: 0,
            height: 0,
            pixel_format: PixelFormat::Rgb565,
            pitch: 0,
        }
    }
}

/// Firmware build information read from the SDK registers after probe.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SdkVersion {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub fpga: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_id_selects_a_profile() {
        let info = info_for(SensorId::Mp5MkII);
        assert_eq!(info.id, SensorId::Mp5MkII);
        assert!(info.enable_focus);
        assert!(!info.enable_sharpness);
        assert_eq!(info.max_frame, (2592, 1936));

        let info = info_for(SensorId::Mp3MkII);
        assert_eq!(info.id, SensorId::Mp3MkII);
        assert!(info.enable_sharpness);
        assert_eq!(info.max_frame, (2048, 1536));
    }

    #[test]
    fn unknown_id_is_rejected() {
        assert_eq!(SensorId::from_reg(0x00), None);
        assert_eq!(SensorId::from_reg(0x85), None);
        assert_eq!(SensorId::from_reg(0x82), Some(SensorId::Mp3));
    }

    #[test]
    fn common_resolutions_resolve_for_both_profiles() {
        let five = info_for(SensorId::Mp5);
        let three = info_for(SensorId::Mp3);

        for info in [&five, &three].iter() {
            assert_eq!(resolution_for(320, 240, info), Some(Resolution::Qvga));
            assert_eq!(resolution_for(1920, 1080, info), Some(Resolution::Fhd));
            assert_eq!(resolution_for(96, 96, info), Some(Resolution::R96x96));
        }
    }

    #[test]
    fn native_maximum_is_per_sensor() {
        let five = info_for(SensorId::Mp5);
        assert_eq!(resolution_for(2592, 1944, &five), Some(Resolution::Wqxga2));
        assert_eq!(resolution_for(2048, 1536, &five), None);

        let three = info_for(SensorId::Mp3);
        assert_eq!(resolution_for(2048, 1536, &three), Some(Resolution::Qxga));
        assert_eq!(resolution_for(2592, 1944, &three), None);

        let five_mk2 = info_for(SensorId::Mp5MkII);
        assert_eq!(
            resolution_for(2592, 1936, &five_mk2),
            Some(Resolution::Wqxga2)
        );
        assert_eq!(resolution_for(2592, 1944, &five_mk2), None);
    }

    #[test]
    fn unlisted_sizes_are_rejected() {
        let info = info_for(SensorId::Mp5);
        assert_eq!(resolution_for(123, 45, &info), None);
        assert_eq!(resolution_for(800, 600, &info), None);
    }
}
