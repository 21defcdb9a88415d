//! Caller-owned pixel planes described by per-channel geometry and strides.

use super::types::{MAX_CHANNELS, Subsampling};
use crate::error::{J2kError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleType {
    #[default]
    UChar,
    UShort,
    UInt,
    Int,
}

/// Storage size of one sample in bytes.
pub fn size_of_sample(sample_type: SampleType) -> usize {
    match sample_type {
        SampleType::UChar => 1,
        SampleType::UShort => 2,
        SampleType::UInt | SampleType::Int => 4,
    }
}

/// `ceil(size / factor)`: the extent of a plane subsampled by `factor`.
pub fn subsampled_size(size: u32, factor: u32) -> u32 {
    size.div_ceil(factor.max(1))
}

/// Geometry of one plane inside a [`Buffer`].
///
/// The sample at `(x, y)` lives at byte `offset + x * colbytes + y * rowbytes` of
/// storage plane `plane`. Negative strides describe bottom-up or mirrored layouts;
/// interleaved channels share a plane and differ by `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub width: u32,
    pub height: u32,
    pub subsampling: Subsampling,
    pub sample_type: SampleType,
    pub depth: u8,
    pub signed: bool,
    pub plane: usize,
    pub offset: usize,
    pub colbytes: isize,
    pub rowbytes: isize,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            subsampling: Subsampling::NONE,
            sample_type: SampleType::UChar,
            depth: 8,
            signed: false,
            plane: 0,
            offset: 0,
            colbytes: 0,
            rowbytes: 0,
        }
    }
}

impl Channel {
    /// A tightly packed, top-down plane using all bits of `sample_type`.
    pub fn new(width: u32, height: u32, sample_type: SampleType) -> Self {
        let size = size_of_sample(sample_type);
        Self {
            width,
            height,
            sample_type,
            depth: (size * 8) as u8,
            colbytes: size as isize,
            rowbytes: (width as usize * size) as isize,
            ..Self::default()
        }
    }

    pub fn with_depth(mut self, depth: u8, signed: bool) -> Self {
        self.depth = depth;
        self.signed = signed;
        self
    }

    pub fn with_subsampling(mut self, subsampling: Subsampling) -> Self {
        self.subsampling = subsampling;
        self
    }

    pub fn at(mut self, plane: usize, offset: usize) -> Self {
        self.plane = plane;
        self.offset = offset;
        self
    }

    pub fn with_strides(mut self, colbytes: isize, rowbytes: isize) -> Self {
        self.colbytes = colbytes;
        self.rowbytes = rowbytes;
        self
    }

    pub fn min_value(&self) -> i64 {
        if self.signed {
            -(1i64 << (self.depth - 1))
        } else {
            0
        }
    }

    pub fn max_value(&self) -> i64 {
        if self.signed {
            (1i64 << (self.depth - 1)) - 1
        } else {
            (1i64 << self.depth) - 1
        }
    }

    fn byte_offset(&self, x: u32, y: u32) -> usize {
        (self.offset as isize + x as isize * self.colbytes + y as isize * self.rowbytes) as usize
    }

    fn check(&self, index: usize, plane_len: usize) -> Result<()> {
        let size = size_of_sample(self.sample_type);
        if self.width == 0 || self.height == 0 {
            return Err(J2kError::BufferMismatch(format!("channel {index} is empty")));
        }
        if self.depth == 0 || self.depth as usize > size * 8 {
            return Err(J2kError::BufferMismatch(format!(
                "channel {index}: depth {} does not fit {:?}",
                self.depth, self.sample_type
            )));
        }
        let (w, h) = (self.width as isize - 1, self.height as isize - 1);
        let corners = [
            0,
            w * self.colbytes,
            h * self.rowbytes,
            w * self.colbytes + h * self.rowbytes,
        ];
        let base = self.offset as isize;
        let lo = corners.iter().map(|c| base + c).min().unwrap_or(base);
        let hi = corners.iter().map(|c| base + c).max().unwrap_or(base);
        if lo < 0 || hi + size as isize > plane_len as isize {
            return Err(J2kError::BufferMismatch(format!(
                "channel {index}: strides address bytes {lo}..{} of a {plane_len}-byte plane",
                hi + size as isize
            )));
        }
        Ok(())
    }
}

/// Up to [`MAX_CHANNELS`] channels over borrowed (or owned) storage planes.
///
/// `Buffer<&mut [u8]>` is the decode target and `Buffer<&[u8]>` the encode source.
#[derive(Debug)]
pub struct Buffer<P> {
    planes: Vec<P>,
    channels: Vec<Channel>,
}

impl<P> Default for Buffer<P> {
    fn default() -> Self {
        Self {
            planes: Vec::new(),
            channels: Vec::new(),
        }
    }
}

impl<P> Buffer<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a storage plane and returns its index for [`Channel::at`].
    pub fn add_plane(&mut self, plane: P) -> usize {
        self.planes.push(plane);
        self.planes.len() - 1
    }

    pub fn push_channel(&mut self, channel: Channel) -> Result<()> {
        if self.channels.len() >= MAX_CHANNELS {
            return Err(J2kError::BufferMismatch(format!(
                "at most {MAX_CHANNELS} channels"
            )));
        }
        self.channels.push(channel);
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    pub fn planes(&self) -> &[P] {
        &self.planes
    }

    pub fn into_planes(self) -> Vec<P> {
        self.planes
    }
}

impl<P: AsRef<[u8]>> Buffer<P> {
    /// Channels interleaved in one top-down plane (`RGBRGB...`).
    pub fn interleaved(
        data: P,
        width: u32,
        height: u32,
        channels: u8,
        sample_type: SampleType,
    ) -> Result<Self> {
        let size = size_of_sample(sample_type);
        let pixel = size * channels as usize;
        let mut buffer = Self::new();
        let plane = buffer.add_plane(data);
        for c in 0..channels as usize {
            buffer.push_channel(
                Channel::new(width, height, sample_type)
                    .at(plane, c * size)
                    .with_strides(pixel as isize, (pixel * width as usize) as isize),
            )?;
        }
        buffer.validate()?;
        Ok(buffer)
    }

    /// One tightly packed top-down plane per channel.
    pub fn planar(planes: Vec<P>, width: u32, height: u32, sample_type: SampleType) -> Result<Self> {
        let mut buffer = Self::new();
        for data in planes {
            let plane = buffer.add_plane(data);
            buffer.push_channel(Channel::new(width, height, sample_type).at(plane, 0))?;
        }
        buffer.validate()?;
        Ok(buffer)
    }

    /// Checks that every channel addresses only bytes of its plane.
    pub fn validate(&self) -> Result<()> {
        for (i, ch) in self.channels.iter().enumerate() {
            let plane = self.planes.get(ch.plane).ok_or_else(|| {
                J2kError::BufferMismatch(format!("channel {i} refers to missing plane {}", ch.plane))
            })?;
            ch.check(i, plane.as_ref().len())?;
        }
        Ok(())
    }

    /// Reads one sample. Callers validate the buffer first.
    pub fn sample(&self, channel: usize, x: u32, y: u32) -> i64 {
        let ch = &self.channels[channel];
        let at = ch.byte_offset(x, y);
        let bytes = self.planes[ch.plane].as_ref();
        match (ch.sample_type, ch.signed) {
            (SampleType::UChar, false) => bytes[at] as i64,
            (SampleType::UChar, true) => bytes[at] as i8 as i64,
            (SampleType::UShort, signed) => {
                let raw = u16::from_ne_bytes([bytes[at], bytes[at + 1]]);
                if signed { raw as i16 as i64 } else { raw as i64 }
            }
            (SampleType::UInt, false) => u32::from_ne_bytes(word(bytes, at)) as i64,
            (SampleType::UInt, true) | (SampleType::Int, _) => {
                i32::from_ne_bytes(word(bytes, at)) as i64
            }
        }
    }
}

fn word(bytes: &[u8], at: usize) -> [u8; 4] {
    [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
}

impl<P: AsRef<[u8]> + AsMut<[u8]>> Buffer<P> {
    /// Stores one sample, clamped to the channel's range.
    pub fn set_sample(&mut self, channel: usize, x: u32, y: u32, value: i64) {
        let ch = &self.channels[channel];
        let v = value.clamp(ch.min_value(), ch.max_value());
        let at = ch.byte_offset(x, y);
        let sample_type = ch.sample_type;
        let bytes = self.planes[ch.plane].as_mut();
        match sample_type {
            SampleType::UChar => bytes[at] = v as u8,
            SampleType::UShort => bytes[at..at + 2].copy_from_slice(&(v as u16).to_ne_bytes()),
            SampleType::UInt | SampleType::Int => {
                bytes[at..at + 4].copy_from_slice(&(v as u32).to_ne_bytes())
            }
        }
    }
}

/// Re-expresses a sample of one precision in another by bit shifting.
pub(crate) fn convert_sample(
    value: i64,
    from_depth: u8,
    from_signed: bool,
    to_depth: u8,
    to_signed: bool,
) -> i64 {
    let mut v = value;
    if from_signed {
        v += 1i64 << (from_depth - 1);
    }
    if to_depth >= from_depth {
        v <<= to_depth - from_depth;
    } else {
        v >>= from_depth - to_depth;
    }
    if to_signed {
        v -= 1i64 << (to_depth - 1);
    }
    v
}

/// Copies every sample of `source` into `destination`.
///
/// Both buffers must have the same channel count and per-channel extent; anything
/// else is rejected before a byte is written. Samples are converted between depths
/// and signedness, so equal channel formats copy bit-exactly.
pub fn copy_buffer<D, S>(destination: &mut Buffer<D>, source: &Buffer<S>) -> Result<()>
where
    D: AsRef<[u8]> + AsMut<[u8]>,
    S: AsRef<[u8]>,
{
    if destination.channel_count() != source.channel_count() {
        return Err(J2kError::BufferMismatch(format!(
            "destination has {} channels, source has {}",
            destination.channel_count(),
            source.channel_count()
        )));
    }
    for (i, (d, s)) in destination.channels.iter().zip(&source.channels).enumerate() {
        if d.width != s.width || d.height != s.height {
            return Err(J2kError::BufferMismatch(format!(
                "channel {i}: {}x{} destination, {}x{} source",
                d.width, d.height, s.width, s.height
            )));
        }
    }
    destination.validate()?;
    source.validate()?;

    for c in 0..source.channel_count() {
        let s = &source.channels[c];
        let (d_depth, d_signed) = (destination.channels[c].depth, destination.channels[c].signed);
        for y in 0..s.height {
            for x in 0..s.width {
                let v = convert_sample(source.sample(c, x, y), s.depth, s.signed, d_depth, d_signed);
                destination.set_sample(c, x, y, v);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsampled_size_rounds_up() {
        assert_eq!(subsampled_size(11, 4), 3);
        assert_eq!(subsampled_size(8, 4), 2);
        assert_eq!(subsampled_size(1, 8), 1);
        assert_eq!(subsampled_size(7, 1), 7);
        assert_eq!(subsampled_size(7, 0), 7);
    }

    #[test]
    fn test_size_of_sample() {
        assert_eq!(size_of_sample(SampleType::UChar), 1);
        assert_eq!(size_of_sample(SampleType::UShort), 2);
        assert_eq!(size_of_sample(SampleType::UInt), 4);
        assert_eq!(size_of_sample(SampleType::Int), 4);
    }

    #[test]
    fn test_interleaved_addressing() {
        let data: Vec<u8> = (0..12).collect();
        let buf = Buffer::interleaved(&data[..], 2, 2, 3, SampleType::UChar).unwrap();
        assert_eq!(buf.sample(0, 0, 0), 0);
        assert_eq!(buf.sample(1, 1, 0), 4);
        assert_eq!(buf.sample(2, 1, 1), 11);
    }

    #[test]
    fn test_validate_rejects_out_of_range_strides() {
        let data = vec![0u8; 8];
        let mut buf = Buffer::new();
        let plane = buf.add_plane(&data[..]);
        buf.push_channel(Channel::new(4, 4, SampleType::UChar).at(plane, 0))
            .unwrap();
        assert!(matches!(buf.validate(), Err(J2kError::BufferMismatch(_))));
    }

    #[test]
    fn test_bottom_up_strides() {
        let mut data = vec![0u8; 6];
        let mut buf = Buffer::new();
        let plane = buf.add_plane(&mut data[..]);
        // Row 0 is stored last.
        buf.push_channel(
            Channel::new(3, 2, SampleType::UChar)
                .at(plane, 3)
                .with_strides(1, -3),
        )
        .unwrap();
        buf.validate().unwrap();
        buf.set_sample(0, 2, 0, 9);
        buf.set_sample(0, 0, 1, 7);
        assert_eq!(data, vec![7, 0, 0, 0, 0, 9]);
    }

    #[test]
    fn test_set_sample_clamps() {
        let mut data = vec![0u8; 2];
        let mut buf = Buffer::planar(vec![&mut data[..]], 1, 1, SampleType::UShort).unwrap();
        buf.channels_mut()[0].depth = 10;
        buf.set_sample(0, 0, 0, 5000);
        assert_eq!(buf.sample(0, 0, 0), 1023);
    }

    #[test]
    fn test_convert_sample() {
        assert_eq!(convert_sample(255, 8, false, 16, false), 65280);
        assert_eq!(convert_sample(4095, 12, false, 8, false), 255);
        assert_eq!(convert_sample(0, 8, false, 8, true), -128);
        assert_eq!(convert_sample(-1, 8, true, 8, false), 127);
        assert_eq!(convert_sample(77, 8, false, 8, false), 77);
    }
}
