//! Encoding policy carried in [`FileInfo`](super::FileInfo).

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// Reversible 5/3 wavelet, every bit-plane kept.
    #[default]
    Lossless,
    /// Rate-controlled to at most `file_size` KiB.
    Size,
    /// Single quantization step derived from `quality`.
    Quality,
    /// Digital Cinema Initiatives profile selected by `dci_profile`.
    Cinema,
}

/// Progression order; the discriminant is the COD wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Order {
    Lrcp = 0,
    Rlcp = 1,
    #[default]
    Rpcl = 2,
    Pcrl = 3,
    Cprl = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DciProfile {
    #[default]
    Dci2k,
    Dci4k,
}

impl DciProfile {
    /// Largest frame the profile admits.
    pub fn max_size(self) -> (u32, u32) {
        match self {
            Self::Dci2k => (2048, 1080),
            Self::Dci4k => (4096, 2160),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionSettings {
    pub method: CompressionMethod,
    /// Budget in KiB (1 KiB = 1024 bytes), used by [`CompressionMethod::Size`].
    pub file_size: usize,
    /// 0..=100, used by [`CompressionMethod::Quality`].
    pub quality: u8,
    pub layers: u8,
    pub order: Order,
    pub dci_profile: DciProfile,
    /// Tile edge in pixels; 0 codes the image as a single tile.
    pub tile_size: u16,
    /// Apply the multi-component colour transform to RGB input.
    pub ycc: bool,
    /// Use the reversible 5/3 wavelet for lossy methods.
    pub reversible: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            method: CompressionMethod::Lossless,
            file_size: 50,
            quality: 50,
            layers: 12,
            order: Order::Rpcl,
            dci_profile: DciProfile::Dci2k,
            tile_size: 1024,
            ycc: false,
            reversible: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = CompressionSettings::default();
        assert_eq!(s.method, CompressionMethod::Lossless);
        assert_eq!(s.file_size, 50);
        assert_eq!(s.quality, 50);
        assert_eq!(s.layers, 12);
        assert_eq!(s.order, Order::Rpcl);
        assert_eq!(s.tile_size, 1024);
        assert!(!s.ycc && !s.reversible);
    }

    #[test]
    fn test_order_wire_values() {
        assert_eq!(u8::from(Order::Cprl), 4);
        assert_eq!(Order::try_from(1u8).unwrap(), Order::Rlcp);
        assert!(Order::try_from(5u8).is_err());
    }
}
