//! Codestream marker codes (ISO/IEC 15444-1 Table A.2).

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Second byte of a `0xFFxx` codestream marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum J2kMarker {
    StartOfCodestream = 0x4F,
    Capability = 0x50,
    ImageAndTileSize = 0x51,
    CodingStyleDefault = 0x52,
    CodingStyleComponent = 0x53,
    TilePartLengths = 0x55,
    PacketLengthsMain = 0x57,
    PacketLengthsTilePart = 0x58,
    QuantizationDefault = 0x5C,
    QuantizationComponent = 0x5D,
    RegionOfInterest = 0x5E,
    ProgressionOrderChange = 0x5F,
    PackedPacketHeadersMain = 0x60,
    PackedPacketHeadersTilePart = 0x61,
    ComponentRegistration = 0x63,
    Comment = 0x64,
    StartOfTile = 0x90,
    StartOfPacket = 0x91,
    EndOfPacketHeader = 0x92,
    StartOfData = 0x93,
    EndOfCodestream = 0xD9,
}

impl J2kMarker {
    /// Full two-byte marker value.
    pub fn code(self) -> u16 {
        0xFF00 | u8::from(self) as u16
    }

    /// Markers that stand alone without a length field.
    pub fn is_delimiter(self) -> bool {
        matches!(
            self,
            Self::StartOfCodestream | Self::StartOfData | Self::EndOfCodestream | Self::EndOfPacketHeader
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_codes() {
        assert_eq!(J2kMarker::ImageAndTileSize.code(), 0xFF51);
        assert_eq!(J2kMarker::try_from(0x90u8).unwrap(), J2kMarker::StartOfTile);
        assert!(J2kMarker::try_from(0x4Eu8).is_err());
        assert!(J2kMarker::StartOfData.is_delimiter());
        assert!(!J2kMarker::Comment.is_delimiter());
    }
}
