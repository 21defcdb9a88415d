use super::settings::CompressionSettings;
use super::types::{
    Alpha, ChannelName, ColorSpace, Format, LutEntry, MAX_CHANNELS, Rational, Subsampling,
};

/// Description of one image: geometry, colour, channel roles and encode intent.
///
/// Filled by [`Codec::file_info`](super::Codec::file_info) on read and supplied by the
/// caller on write. A plain value: cloning it clones the ICC profile and LUT too.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Significant bits per sample.
    pub depth: u8,
    pub subsampling: [Subsampling; MAX_CHANNELS],

    pub format: Format,
    pub pixel_aspect: Rational,
    /// Dots per inch; 0 when unknown.
    pub dpi: f32,
    pub alpha: Alpha,

    pub color_space: ColorSpace,
    /// Embedded ICC profile, owned by this value.
    pub icc_profile: Option<Vec<u8>>,

    /// Role of each codestream channel, in buffer order.
    pub channel_map: [ChannelName; MAX_CHANNELS],
    /// Role of each lookup-table column.
    pub lut_map: [ChannelName; MAX_CHANNELS],
    /// Indexed-colour table; empty means direct values.
    pub lut: Vec<LutEntry>,
    /// Number of meaningful columns in each [`LutEntry`].
    pub lut_channels: u8,

    pub settings: CompressionSettings,
}

const DEFAULT_MAP: [ChannelName; MAX_CHANNELS] = [
    ChannelName::Red,
    ChannelName::Green,
    ChannelName::Blue,
    ChannelName::Alpha,
];

impl Default for FileInfo {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            channels: 0,
            depth: 0,
            subsampling: [Subsampling::NONE; MAX_CHANNELS],
            format: Format::Unknown,
            pixel_aspect: Rational::UNKNOWN,
            dpi: 0.0,
            alpha: Alpha::None,
            color_space: ColorSpace::Unknown,
            icc_profile: None,
            channel_map: DEFAULT_MAP,
            lut_map: DEFAULT_MAP,
            lut: Vec::new(),
            lut_channels: 0,
            settings: CompressionSettings::default(),
        }
    }
}

impl FileInfo {
    pub fn new(width: u32, height: u32, channels: u8, depth: u8) -> Self {
        Self {
            width,
            height,
            channels,
            depth,
            ..Self::default()
        }
    }

    pub fn profile_len(&self) -> usize {
        self.icc_profile.as_ref().map_or(0, Vec::len)
    }

    pub fn lut_size(&self) -> usize {
        self.lut.len()
    }

    pub fn has_alpha(&self) -> bool {
        self.alpha != Alpha::None
    }

    /// Channels a decoder delivers once the LUT has been applied.
    pub fn output_channels(&self) -> u8 {
        if self.lut.is_empty() {
            self.channels
        } else {
            self.lut_channels
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let info = FileInfo::default();
        assert_eq!(info.format, Format::Unknown);
        assert!(info.pixel_aspect.is_unknown());
        assert_eq!(info.channel_map, DEFAULT_MAP);
        assert_eq!(info.lut_map, DEFAULT_MAP);
        assert_eq!(info.lut_size(), 0);
        assert_eq!(info.profile_len(), 0);
        assert_eq!(info.subsampling, [Subsampling::NONE; MAX_CHANNELS]);
    }
}
