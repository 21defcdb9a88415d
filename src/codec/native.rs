//! The built-in JPEG 2000 codec backed by [`crate::jpeg2000`].

use std::io::SeekFrom;

use log::{debug, info};

use super::{
    Buffer, Codec, Completion, CompressionMethod, FileInfo, Format, InputFile, MAX_CHANNELS,
    MAX_LAYERS, OutputFile, Progress, ReadFlags, Subsampling, WriteFlags, convert_sample,
    get_file_format, number_of_cpus, subsampled_size,
};
use crate::error::{J2kError, Result};
use crate::jpeg2000::jp2::{self, Jp2Header};
use crate::jpeg2000::parser::{J2kHeader, J2kParser};
use crate::jpeg2000::{ComponentPlane, J2kDecoder, J2kEncoder};

/// Per-instance settings of [`NativeCodec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeOptions {
    /// Expand palettised images through their LUT on read.
    pub apply_lut: bool,
    /// Worker threads per call; 0 uses [`number_of_cpus`].
    pub threads: usize,
    /// Written as a COM marker into every encoded codestream.
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NativeCodec {
    options: NativeOptions,
}

impl NativeCodec {
    pub fn new(options: NativeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &NativeOptions {
        &self.options
    }

    /// COM texts of the main header.
    pub fn comments(&self, file: &mut dyn InputFile) -> Result<Vec<String>> {
        let data = read_all(file)?;
        let (_, codestream) = jp2::read_container(&data)?;
        Ok(J2kParser::new(codestream).parse_main_header()?.comments)
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        let threads = match self.options.threads {
            0 => number_of_cpus(),
            n => n,
        };
        Ok(rayon::ThreadPoolBuilder::new().num_threads(threads).build()?)
    }
}

fn read_all(file: &mut dyn InputFile) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;
    Ok(data)
}

/// Metadata of a codestream and its container.
fn describe(header: &J2kHeader, container: &Jp2Header) -> Result<FileInfo> {
    let siz = &header.siz;
    let components = siz.components.len();
    let channels = u8::try_from(components)
        .map_err(|_| J2kError::unsupported(format!("{components} components")))?;
    let mut info = FileInfo::new(
        siz.width(),
        siz.height(),
        channels,
        siz.components.iter().map(|c| c.depth).max().unwrap_or(0),
    );
    for (slot, c) in info.subsampling.iter_mut().zip(&siz.components) {
        *slot = Subsampling::new(c.dx as u32, c.dy as u32);
    }

    let cod = &header.cod;
    let settings = &mut info.settings;
    settings.reversible = cod.style.reversible;
    settings.method = if cod.style.reversible {
        CompressionMethod::Lossless
    } else {
        CompressionMethod::Quality
    };
    settings.layers = cod.layers.min(MAX_LAYERS as u16) as u8;
    settings.order = cod.order;
    settings.ycc = cod.mct == 1;
    settings.tile_size = if siz.tile_count() > 1 {
        u16::try_from(siz.tile_width.max(siz.tile_height)).unwrap_or(0)
    } else {
        0
    };

    container.apply(&mut info);
    Ok(info)
}

/// Where a buffer channel takes its samples from.
enum Source<'a> {
    Plane(&'a ComponentPlane),
    Lut {
        indices: &'a ComponentPlane,
        info: &'a FileInfo,
        column: usize,
    },
}

impl Source<'_> {
    fn plane(&self) -> &ComponentPlane {
        match self {
            Self::Plane(p) => p,
            Self::Lut { indices, .. } => indices,
        }
    }

    /// Value at plane coordinates with its depth and signedness.
    fn value(&self, x: u32, y: u32) -> (i64, u8, bool) {
        match self {
            Self::Plane(p) => (p.sample(x, y) as i64, p.depth, p.signed),
            Self::Lut { indices, info, column } => {
                let last = info.lut.len().saturating_sub(1) as i32;
                let index = indices.sample(x, y).clamp(0, last) as usize;
                (info.lut[index].0[*column] as i64, 8, false)
            }
        }
    }
}

impl Codec for NativeCodec {
    fn name(&self) -> &'static str {
        "JPEG 2000 (native)"
    }

    fn four_char_code(&self) -> &'static str {
        "NJ2K"
    }

    fn read_flags(&self) -> ReadFlags {
        let flags = ReadFlags::CAN_READ | ReadFlags::CAN_SUBSAMPLE;
        if self.options.apply_lut {
            flags | ReadFlags::APPLIES_LUT
        } else {
            flags
        }
    }

    fn write_flags(&self) -> WriteFlags {
        WriteFlags::CAN_WRITE
    }

    fn verify(&self, file: &mut dyn InputFile) -> bool {
        get_file_format(file) != Format::Unknown
    }

    fn file_info(&self, file: &mut dyn InputFile) -> Result<FileInfo> {
        let data = read_all(file)?;
        let (container, codestream) = jp2::read_container(&data)?;
        let header = J2kParser::new(codestream).parse_main_header()?;
        describe(&header, &container)
    }

    fn read_file(
        &self,
        file: &mut dyn InputFile,
        buffer: &mut Buffer<&mut [u8]>,
        subsample: u32,
        progress: Option<&Progress>,
    ) -> Result<Completion> {
        if subsample == 0 || !subsample.is_power_of_two() {
            return Err(J2kError::argument(format!("subsample {subsample} is not a power of two")));
        }
        let data = read_all(file)?;
        let (container, codestream) = jp2::read_container(&data)?;
        let decoder = J2kDecoder::new(codestream)?;
        let info = describe(decoder.header(), &container)?;
        let use_lut = self.options.apply_lut && !info.lut.is_empty();

        buffer.validate()?;
        let available = if use_lut {
            info.lut_channels as usize
        } else {
            decoder.siz().components.len()
        };
        let wanted = buffer.channel_count();
        if wanted == 0 || wanted > available.min(MAX_CHANNELS) {
            return Err(J2kError::BufferMismatch(format!(
                "buffer has {wanted} channels, the image provides {available}"
            )));
        }
        for (i, ch) in buffer.channels().iter().enumerate() {
            let w = subsampled_size(info.width, ch.subsampling.x.saturating_mul(subsample));
            let h = subsampled_size(info.height, ch.subsampling.y.saturating_mul(subsample));
            if ch.width != w || ch.height != h {
                return Err(J2kError::BufferMismatch(format!(
                    "channel {i}: expected {w}x{h} at subsample {subsample}, buffer has {}x{}",
                    ch.width, ch.height
                )));
            }
        }

        let reduce = subsample.trailing_zeros();
        let planes = match self.pool()?.install(|| decoder.decode(reduce, progress)) {
            Ok(planes) => planes,
            Err(J2kError::Cancelled) => {
                info!("decode cancelled");
                return Ok(Completion::Cancelled);
            }
            Err(e) => return Err(e),
        };

        let siz = decoder.siz();
        for i in 0..wanted {
            let (source, dx, dy) = if use_lut {
                let component = &siz.components[0];
                (
                    Source::Lut {
                        indices: &planes[0],
                        info: &info,
                        column: i,
                    },
                    component.dx,
                    component.dy,
                )
            } else {
                (Source::Plane(&planes[i]), siz.components[i].dx, siz.components[i].dy)
            };
            let plane = source.plane();
            let ch = buffer.channels()[i].clone();
            // Channel and plane scales on the reference grid.
            let sx = ch.subsampling.x as u64 * subsample as u64;
            let sy = ch.subsampling.y as u64 * subsample as u64;
            let px = (dx as u64) << plane.reduction;
            let py = (dy as u64) << plane.reduction;
            for y in 0..ch.height {
                let src_y = ((y as u64 * sy / py) as u32).min(plane.height.saturating_sub(1));
                for x in 0..ch.width {
                    let src_x = ((x as u64 * sx / px) as u32).min(plane.width.saturating_sub(1));
                    let (v, depth, signed) = source.value(src_x, src_y);
                    buffer.set_sample(i, x, y, convert_sample(v, depth, signed, ch.depth, ch.signed));
                }
            }
        }
        debug!("decoded {wanted} channels at subsample {subsample}");
        Ok(Completion::Complete)
    }

    fn write_file(
        &self,
        file: &mut dyn OutputFile,
        info: &FileInfo,
        buffer: &Buffer<&[u8]>,
        progress: Option<&Progress>,
    ) -> Result<Completion> {
        let encoder = J2kEncoder::new(info).with_comment(self.options.comment.as_deref());
        let bytes = match self.pool()?.install(|| encoder.encode(buffer, progress)) {
            Ok(bytes) => bytes,
            Err(J2kError::Cancelled) => {
                info!("encode cancelled");
                return Ok(Completion::Cancelled);
            }
            Err(e) => return Err(e),
        };
        file.write_all(&bytes)?;
        file.flush()?;
        debug!("wrote {} bytes", bytes.len());
        Ok(Completion::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SampleType;
    use std::io::Cursor;

    fn encode_gray(codec: &NativeCodec, info: &FileInfo, data: &[u8]) -> Vec<u8> {
        let buffer = Buffer::interleaved(data, info.width, info.height, 1, SampleType::UChar).unwrap();
        let mut out = Vec::new();
        assert!(codec.write_file(&mut out, info, &buffer, None).unwrap().is_complete());
        out
    }

    #[test]
    fn test_flags() {
        let codec = NativeCodec::default();
        assert_eq!(codec.four_char_code(), "NJ2K");
        assert!(!codec.read_flags().contains(ReadFlags::APPLIES_LUT));
        let lut = NativeCodec::new(NativeOptions {
            apply_lut: true,
            ..NativeOptions::default()
        });
        assert!(lut.read_flags().contains(ReadFlags::APPLIES_LUT | ReadFlags::CAN_SUBSAMPLE));
        assert_eq!(lut.write_flags(), WriteFlags::CAN_WRITE);
    }

    #[test]
    fn test_file_info_reports_settings() {
        let codec = NativeCodec::new(NativeOptions {
            threads: 2,
            comment: Some("made here".into()),
            ..NativeOptions::default()
        });
        let mut info = FileInfo::new(24, 16, 1, 8);
        info.settings.layers = 3;
        let bytes = encode_gray(&codec, &info, &[7u8; 24 * 16]);
        let mut file = Cursor::new(bytes);
        assert!(codec.verify(&mut file));
        let read = codec.file_info(&mut file).unwrap();
        assert_eq!((read.width, read.height, read.channels, read.depth), (24, 16, 1, 8));
        assert_eq!(read.format, Format::Jp2);
        assert_eq!(read.settings.layers, 3);
        assert!(read.settings.reversible);
        assert_eq!(codec.comments(&mut file).unwrap(), vec!["made here".to_string()]);
    }

    #[test]
    fn test_read_rejects_bad_subsample_and_geometry() {
        let codec = NativeCodec::default();
        let info = FileInfo::new(8, 8, 1, 8);
        let mut file = Cursor::new(encode_gray(&codec, &info, &[1u8; 64]));
        let mut pixels = vec![0u8; 64];
        let mut buffer = Buffer::interleaved(&mut pixels[..], 8, 8, 1, SampleType::UChar).unwrap();
        assert!(matches!(
            codec.read_file(&mut file, &mut buffer, 3, None),
            Err(J2kError::InvalidArgument(_))
        ));
        assert!(matches!(
            codec.read_file(&mut file, &mut buffer, 2, None),
            Err(J2kError::BufferMismatch(_))
        ));
        assert!(codec.read_file(&mut file, &mut buffer, 1, None).unwrap().is_complete());
        assert_eq!(pixels, vec![1u8; 64]);
    }
}
