//! Value types shared by file metadata and pixel buffers.

/// Maximum number of channels a [`Buffer`](super::Buffer) or [`FileInfo`](super::FileInfo) describes.
pub const MAX_CHANNELS: usize = 4;
/// Maximum number of entries in an indexed-colour lookup table.
pub const MAX_LUT_ENTRIES: usize = 256;
/// Maximum number of quality layers an encoder produces.
pub const MAX_LAYERS: u8 = 50;

/// Container kind, detected from file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Unknown,
    /// Raw codestream without boxes.
    J2c,
    /// JP2 container (ISO/IEC 15444-1 Annex I).
    Jp2,
    /// JPX container (ISO/IEC 15444-2).
    Jpx,
}

/// Relationship between alpha samples and colour samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alpha {
    #[default]
    None,
    Unknown,
    Premultiplied,
    Straight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    Unknown,
    Srgb,
    /// sRGB-gamma greyscale.
    SLum,
    Sycc,
    EsRgb,
    EsYcc,
    Romm,
    Cmyk,
    CieLab,
    /// Monochrome ICC profile attached.
    IccLum,
    /// Three-component matrix/TRC ICC profile attached.
    IccRgb,
    /// Any other ICC profile attached.
    IccAny,
}

impl ColorSpace {
    pub fn has_icc_profile(self) -> bool {
        matches!(self, Self::IccLum | Self::IccRgb | Self::IccAny)
    }
}

/// Semantic role of a decoded plane or of a lookup-table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelName {
    Red = 0,
    Green,
    Blue,
    Alpha,
    Cyan,
    Magenta,
    Yellow,
    Black,
}

/// Pixel aspect ratio. `(0, 1)` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i32,
    pub den: u32,
}

impl Rational {
    pub const UNKNOWN: Rational = Rational { num: 0, den: 1 };

    /// Builds a ratio, keeping `den` non-zero.
    pub fn new(num: i32, den: u32) -> Self {
        if den == 0 {
            return Self::UNKNOWN;
        }
        Self { num, den }
    }

    pub fn is_unknown(&self) -> bool {
        self.num == 0
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Reduces by the greatest common divisor.
    pub fn reduced(self) -> Self {
        let g = gcd(self.num.unsigned_abs() as u64, self.den as u64);
        if g <= 1 {
            return self;
        }
        Self {
            num: (self.num as i64 / g as i64) as i32,
            den: (self.den as u64 / g) as u32,
        }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

pub(crate) fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Per-channel subsampling: `width * x == full width`, rounded per [`subsampled_size`](super::subsampled_size).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subsampling {
    pub x: u32,
    pub y: u32,
}

impl Subsampling {
    pub const NONE: Subsampling = Subsampling { x: 1, y: 1 };

    pub fn new(x: u32, y: u32) -> Self {
        Self {
            x: x.max(1),
            y: y.max(1),
        }
    }
}

impl Default for Subsampling {
    fn default() -> Self {
        Self::NONE
    }
}

/// One lookup-table row: a value per output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LutEntry(pub [u8; MAX_CHANNELS]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_defaults_to_unknown() {
        let r = Rational::default();
        assert!(r.is_unknown());
        assert_eq!(r, Rational::new(5, 0));
        assert_eq!(Rational::new(6, 4).reduced(), Rational::new(3, 2));
        assert_eq!(Rational::new(-6, 4).reduced(), Rational::new(-3, 2));
    }

    #[test]
    fn test_reduce_at_extremes() {
        let r = Rational { num: i32::MIN, den: 1 << 31 };
        assert_eq!(r.reduced(), Rational { num: -1, den: 1 });
        let r = Rational { num: i32::MIN, den: u32::MAX };
        assert_eq!(r.reduced(), r);
        let r = Rational { num: i32::MAX, den: i32::MAX as u32 };
        assert_eq!(r.reduced(), Rational { num: 1, den: 1 });
    }

    #[test]
    fn test_subsampling_is_positive() {
        assert_eq!(Subsampling::new(0, 2), Subsampling { x: 1, y: 2 });
        assert_eq!(Subsampling::default(), Subsampling::NONE);
    }
}
