//! The codec contract: metadata, pixel buffers, capability flags and the
//! static helpers every JPEG 2000 codec shares.
//!
//! A [`Codec`] reads a file into a caller-owned [`Buffer`] or writes a buffer out
//! as J2C/JP2/JPX. Codecs are registered once at startup in the
//! [`registry`] and looked up from there.

use std::io::{Read, Seek, SeekFrom, Write};

use bitflags::bitflags;

use crate::error::Result;
use crate::jpeg2000::jp2;

mod buffer;
mod file_info;
pub mod native;
mod progress;
pub mod registry;
mod settings;
mod types;

pub use buffer::{Buffer, Channel, SampleType, copy_buffer, size_of_sample, subsampled_size};
pub(crate) use buffer::convert_sample;
pub use file_info::FileInfo;
pub use native::{NativeCodec, NativeOptions};
pub use progress::Progress;
pub(crate) use progress::ProgressMeter;
pub use settings::{CompressionMethod, CompressionSettings, DciProfile, Order};
pub use types::{
    Alpha, ChannelName, ColorSpace, Format, LutEntry, MAX_CHANNELS, MAX_LAYERS, MAX_LUT_ENTRIES,
    Rational, Subsampling,
};

pub use crate::icc::{create_profile, is_srgb_profile};

bitflags! {
    /// What a codec can do when reading.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReadFlags: u32 {
        const CAN_READ = 0x0001;
        /// Accepts power-of-two `subsample` factors above 1.
        const CAN_SUBSAMPLE = 0x0002;
        /// Expands indexed colour through the LUT instead of returning indices.
        const APPLIES_LUT = 0x0004;
    }
}

bitflags! {
    /// What a codec can do when writing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteFlags: u32 {
        const CAN_WRITE = 0x0001;
    }
}

/// A seekable byte source.
pub trait InputFile: Read + Seek {}
impl<T: Read + Seek + ?Sized> InputFile for T {}

/// A byte sink.
pub trait OutputFile: Write {}
impl<T: Write + ?Sized> OutputFile for T {}

/// Outcome of a read or write that did not fail.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Complete,
    /// Stopped through [`Progress`]; the destination was left untouched.
    Cancelled,
}

impl Completion {
    pub fn is_complete(self) -> bool {
        self == Self::Complete
    }
}

pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;

    /// Four ASCII characters identifying the implementation.
    fn four_char_code(&self) -> &'static str;

    fn read_flags(&self) -> ReadFlags;

    fn write_flags(&self) -> WriteFlags;

    /// Whether this codec recognises `file`. Codecs without a cheap check say no.
    fn verify(&self, _file: &mut dyn InputFile) -> bool {
        false
    }

    fn file_info(&self, file: &mut dyn InputFile) -> Result<FileInfo>;

    /// Decodes into `buffer`, reduced by `subsample` (a power of two).
    ///
    /// Each channel must be `subsampled_size(width, subsampling * subsample)` wide
    /// and likewise high. The buffer is written only once the whole image is ready.
    fn read_file(
        &self,
        file: &mut dyn InputFile,
        buffer: &mut Buffer<&mut [u8]>,
        subsample: u32,
        progress: Option<&Progress>,
    ) -> Result<Completion>;

    /// Encodes `buffer` described by `info`; nothing reaches `file` unless the
    /// whole stream was built.
    fn write_file(
        &self,
        file: &mut dyn OutputFile,
        info: &FileInfo,
        buffer: &Buffer<&[u8]>,
        progress: Option<&Progress>,
    ) -> Result<Completion>;
}

/// Identifies the container from the first bytes of `file`.
///
/// I/O failures and unrecognised content both yield [`Format::Unknown`].
pub fn get_file_format(file: &mut dyn InputFile) -> Format {
    let mut head = Vec::with_capacity(jp2::SNIFF_LEN);
    let read = match file.seek(SeekFrom::Start(0)) {
        Ok(_) => (&mut *file).take(jp2::SNIFF_LEN as u64).read_to_end(&mut head),
        Err(e) => Err(e),
    };
    let _ = file.seek(SeekFrom::Start(0));
    match read {
        Ok(_) => jp2::detect_format(&head),
        Err(_) => Format::Unknown,
    }
}

/// Logical processors available to this process, at least 1.
pub fn number_of_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_get_file_format_rejects_garbage() {
        let mut f = Cursor::new(b"GIF89a not a codestream".to_vec());
        assert_eq!(get_file_format(&mut f), Format::Unknown);
        let mut empty = Cursor::new(Vec::new());
        assert_eq!(get_file_format(&mut empty), Format::Unknown);
    }

    #[test]
    fn test_get_file_format_raw_codestream() {
        let mut f = Cursor::new(vec![0xFF, 0x4F, 0xFF, 0x51, 0x00, 0x29]);
        assert_eq!(get_file_format(&mut f), Format::J2c);
        assert_eq!(f.position(), 0);
    }

    #[test]
    fn test_number_of_cpus_is_positive() {
        assert!(number_of_cpus() >= 1);
    }

    #[test]
    fn test_flags() {
        let f = ReadFlags::CAN_READ | ReadFlags::CAN_SUBSAMPLE;
        assert!(f.contains(ReadFlags::CAN_READ));
        assert!(!f.contains(ReadFlags::APPLIES_LUT));
        assert!(WriteFlags::default().is_empty());
    }
}
